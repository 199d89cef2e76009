//! Authenticator data parsing
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! rpIdHash (32) | flags (1) | signCount (4)
//!   [ aaguid (16) | credIdLen (2) | credId | COSE_Key ]   if AT
//!   [ extensions CBOR map ]                               if ED
//! ```

use ciborium::value::Value;
use sha2::{Digest, Sha256};

use crate::cose::CosePublicKey;
use crate::error::{PasskeyError, Result};

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
const AAGUID_LEN: usize = 16;
/// Upper bound on credential id length set by WebAuthn Level 2.
const MAX_CREDENTIAL_ID_LEN: usize = 1023;

/// Authenticator flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatorFlags(pub u8);

impl AuthenticatorFlags {
    pub const USER_PRESENT: u8 = 0x01;
    pub const USER_VERIFIED: u8 = 0x04;
    pub const BACKUP_ELIGIBLE: u8 = 0x08;
    pub const BACKED_UP: u8 = 0x10;
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    pub const EXTENSION_DATA: u8 = 0x80;

    fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn user_present(self) -> bool {
        self.has(Self::USER_PRESENT)
    }

    pub fn user_verified(self) -> bool {
        self.has(Self::USER_VERIFIED)
    }

    pub fn backup_eligible(self) -> bool {
        self.has(Self::BACKUP_ELIGIBLE)
    }

    pub fn backed_up(self) -> bool {
        self.has(Self::BACKED_UP)
    }

    pub fn attested_credential_data(self) -> bool {
        self.has(Self::ATTESTED_CREDENTIAL_DATA)
    }

    pub fn extension_data(self) -> bool {
        self.has(Self::EXTENSION_DATA)
    }
}

/// Credential data present when the AT flag is set.
#[derive(Debug, Clone)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; AAGUID_LEN],
    pub credential_id: Vec<u8>,
    pub public_key: CosePublicKey,
    /// The COSE_Key exactly as encoded by the authenticator.
    pub public_key_cbor: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: AuthenticatorFlags,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(PasskeyError::malformed(format!(
                "authenticator data is {} bytes, need at least {HEADER_LEN}",
                data.len()
            )));
        }

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(&data[..RP_ID_HASH_LEN]);
        let flags = AuthenticatorFlags(data[RP_ID_HASH_LEN]);
        let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

        let mut rest = &data[HEADER_LEN..];

        let attested_credential = if flags.attested_credential_data() {
            Some(parse_attested_credential(&mut rest)?)
        } else {
            None
        };

        if flags.extension_data() {
            let extensions: Value = ciborium::from_reader(&mut rest)
                .map_err(|e| PasskeyError::malformed(format!("extensions: {e}")))?;
            if !matches!(extensions, Value::Map(_)) {
                return Err(PasskeyError::malformed("extensions are not a CBOR map"));
            }
        }

        if !rest.is_empty() {
            return Err(PasskeyError::malformed(format!(
                "{} trailing bytes after authenticator data",
                rest.len()
            )));
        }

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        })
    }

    /// Check the relying party binding and presence/verification flags.
    pub fn check(&self, rp_id_hash: &[u8; 32], require_user_verification: bool) -> Result<()> {
        use subtle::ConstantTimeEq;

        if !bool::from(self.rp_id_hash.ct_eq(rp_id_hash)) {
            return Err(PasskeyError::RelyingPartyMismatch);
        }
        if !self.flags.user_present() {
            return Err(PasskeyError::UserPresenceMissing);
        }
        if require_user_verification && !self.flags.user_verified() {
            return Err(PasskeyError::UserVerificationMissing);
        }
        Ok(())
    }
}

fn parse_attested_credential(rest: &mut &[u8]) -> Result<AttestedCredentialData> {
    let truncated = || PasskeyError::malformed("attested credential data truncated");

    if rest.len() < AAGUID_LEN + 2 {
        return Err(truncated());
    }
    let mut aaguid = [0u8; AAGUID_LEN];
    aaguid.copy_from_slice(&rest[..AAGUID_LEN]);
    let id_len = u16::from_be_bytes([rest[AAGUID_LEN], rest[AAGUID_LEN + 1]]) as usize;
    *rest = &rest[AAGUID_LEN + 2..];

    if id_len == 0 || id_len > MAX_CREDENTIAL_ID_LEN {
        return Err(PasskeyError::malformed(format!(
            "credential id length {id_len} out of range"
        )));
    }
    if rest.len() < id_len {
        return Err(truncated());
    }
    let credential_id = rest[..id_len].to_vec();
    *rest = &rest[id_len..];

    // The COSE key is self-delimiting; decode it to learn where it ends.
    let before = *rest;
    let value: Value = ciborium::from_reader(&mut *rest)
        .map_err(|e| PasskeyError::malformed(format!("credential public key: {e}")))?;
    let consumed = before.len() - rest.len();
    let public_key_cbor = before[..consumed].to_vec();
    let public_key = CosePublicKey::from_value(&value)?;

    Ok(AttestedCredentialData {
        aaguid,
        credential_id,
        public_key,
        public_key_cbor,
    })
}

/// SHA-256 of the relying party id, as embedded in authenticator data.
pub fn rp_id_hash(rp_id: &str) -> [u8; 32] {
    Sha256::digest(rp_id.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(flags: u8, count: u32) -> Vec<u8> {
        let mut data = rp_id_hash("localhost").to_vec();
        data.push(flags);
        data.extend_from_slice(&count.to_be_bytes());
        data
    }

    fn with_credential(flags: u8) -> (Vec<u8>, Vec<u8>) {
        let key = CosePublicKey::P256 {
            x: [0x11; 32],
            y: [0x22; 32],
        }
        .to_cbor()
        .unwrap();
        let mut data = header(flags | AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA, 0);
        data.extend_from_slice(&[0xAA; 16]);
        data.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(&[1, 2, 3, 4]);
        data.extend_from_slice(&key);
        (data, key)
    }

    #[test]
    fn test_assertion_layout() {
        let data = header(0x05, 42);
        let parsed = AuthenticatorData::parse(&data).unwrap();
        assert_eq!(parsed.sign_count, 42);
        assert!(parsed.flags.user_present());
        assert!(parsed.flags.user_verified());
        assert!(parsed.attested_credential.is_none());
    }

    #[test]
    fn test_attested_credential_layout() {
        let (data, key) = with_credential(0x01);
        let parsed = AuthenticatorData::parse(&data).unwrap();
        let cred = parsed.attested_credential.unwrap();
        assert_eq!(cred.aaguid, [0xAA; 16]);
        assert_eq!(cred.credential_id, vec![1, 2, 3, 4]);
        assert_eq!(cred.public_key_cbor, key);
        assert_eq!(cred.public_key.algorithm(), crate::CoseAlgorithm::Es256);
    }

    #[test]
    fn test_extensions_are_consumed() {
        let (mut data, _) = with_credential(0x01 | AuthenticatorFlags::EXTENSION_DATA);
        let mut ext = Vec::new();
        ciborium::into_writer(
            &Value::Map(vec![(Value::Text("credProtect".into()), Value::Integer(1i64.into()))]),
            &mut ext,
        )
        .unwrap();
        data.extend_from_slice(&ext);
        assert!(AuthenticatorData::parse(&data).is_ok());
    }

    #[test]
    fn test_rejects_truncated_and_trailing() {
        assert!(matches!(
            AuthenticatorData::parse(&[0u8; 36]),
            Err(PasskeyError::MalformedPayload(_))
        ));

        let mut data = header(0x01, 1);
        data.push(0xFF);
        assert!(matches!(
            AuthenticatorData::parse(&data),
            Err(PasskeyError::MalformedPayload(_))
        ));

        let (data, _) = with_credential(0x01);
        assert!(matches!(
            AuthenticatorData::parse(&data[..data.len() - 3]),
            Err(PasskeyError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_check_flags_and_rp() {
        let expected = rp_id_hash("localhost");

        let parsed = AuthenticatorData::parse(&header(0x01, 0)).unwrap();
        parsed.check(&expected, false).unwrap();
        assert!(matches!(
            parsed.check(&expected, true),
            Err(PasskeyError::UserVerificationMissing)
        ));
        assert!(matches!(
            parsed.check(&rp_id_hash("example.com"), false),
            Err(PasskeyError::RelyingPartyMismatch)
        ));

        let absent = AuthenticatorData::parse(&header(0x00, 0)).unwrap();
        assert!(matches!(
            absent.check(&expected, false),
            Err(PasskeyError::UserPresenceMissing)
        ));
    }
}
