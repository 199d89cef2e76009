#![no_main]

//! Fuzz target for client data JSON and COSE key decoding
//!
//! Run with: cargo +nightly fuzz run fuzz_client_data

use libfuzzer_sys::fuzz_target;
use passkey_core::{Challenge, CollectedClientData, CosePublicKey};

fuzz_target!(|data: &[u8]| {
    if let Ok(client_data) = CollectedClientData::parse(data) {
        let _ = client_data.check_challenge(&Challenge::from_bytes(vec![0u8; 32]));
        let _ = client_data.check_origin(&["http://localhost:4455".to_string()]);
    }

    if let Ok(key) = CosePublicKey::from_cbor(data) {
        let _ = key.verify(key.algorithm(), b"message", &[0u8; 64]);
    }
});
