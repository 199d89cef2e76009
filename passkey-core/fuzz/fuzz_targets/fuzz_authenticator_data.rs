#![no_main]

//! Fuzz target for AuthenticatorData::parse()
//!
//! Authenticator data is attacker-controlled binary with a variable-length
//! credential id and embedded CBOR. Parsing must never panic.
//!
//! Run with: cargo +nightly fuzz run fuzz_authenticator_data

use libfuzzer_sys::fuzz_target;
use passkey_core::AuthenticatorData;

fuzz_target!(|data: &[u8]| {
    if let Ok(parsed) = AuthenticatorData::parse(data) {
        let _ = parsed.check(&[0u8; 32], true);
    }
});
