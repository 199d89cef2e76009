//! Collected client data
//!
//! The client serialises `{type, challenge, origin, crossOrigin}` as JSON and
//! the authenticator signs over its SHA-256 hash, so the raw bytes are kept
//! exactly as received for hashing.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::challenge::Challenge;
use crate::encoding;
use crate::error::{PasskeyError, Result};

/// Ceremony marker carried in the client data `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDataType {
    /// `webauthn.create`, a registration response
    Create,
    /// `webauthn.get`, an authentication response
    Get,
}

impl ClientDataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "webauthn.create",
            Self::Get => "webauthn.get",
        }
    }
}

/// Parsed `clientDataJSON`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub ty: String,
    pub challenge: String,
    pub origin: String,
    #[serde(default)]
    pub cross_origin: bool,
}

impl CollectedClientData {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| PasskeyError::malformed(format!("clientDataJSON: {e}")))
    }

    /// Decoded bytes of the embedded challenge.
    pub fn challenge_bytes(&self) -> Result<Vec<u8>> {
        encoding::decode("clientDataJSON.challenge", &self.challenge)
    }

    /// Constant-time comparison of the embedded challenge with `expected`.
    pub fn check_challenge(&self, expected: &Challenge) -> Result<()> {
        let presented = self.challenge_bytes()?;
        if bool::from(presented.as_slice().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(PasskeyError::ChallengeMismatch)
        }
    }

    pub fn check_type(&self, expected: ClientDataType) -> Result<()> {
        if self.ty == expected.as_str() {
            Ok(())
        } else {
            Err(PasskeyError::TypeMismatch {
                expected: expected.as_str(),
                actual: self.ty.clone(),
            })
        }
    }

    /// The origin must serialise identically to one of `allowed`.
    pub fn check_origin(&self, allowed: &[String]) -> Result<()> {
        let origin = normalize_origin(&self.origin)
            .ok_or_else(|| PasskeyError::OriginMismatch(self.origin.clone()))?;
        if self.cross_origin || !allowed.iter().any(|a| *a == origin) {
            return Err(PasskeyError::OriginMismatch(self.origin.clone()));
        }
        Ok(())
    }
}

/// ASCII serialisation of a URL's origin, e.g. `https://example.com:8443`.
pub fn normalize_origin(origin: &str) -> Option<String> {
    let url = url::Url::parse(origin).ok()?;
    match url.origin() {
        url::Origin::Tuple(..) => Some(url.origin().ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

/// SHA-256 of the raw client data bytes.
pub fn client_data_hash(raw: &[u8]) -> [u8; 32] {
    Sha256::digest(raw).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_data(ty: &str, challenge: &[u8], origin: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": ty,
            "challenge": encoding::encode(challenge),
            "origin": origin,
            "crossOrigin": false,
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_and_checks() {
        let challenge = Challenge::from_bytes(vec![7; 32]);
        let raw = client_data("webauthn.get", challenge.as_bytes(), "http://localhost:4455");
        let data = CollectedClientData::parse(&raw).unwrap();

        data.check_challenge(&challenge).unwrap();
        data.check_type(ClientDataType::Get).unwrap();
        data.check_origin(&["http://localhost:4455".to_string()])
            .unwrap();
    }

    #[test]
    fn test_challenge_mismatch() {
        let raw = client_data("webauthn.get", &[1; 32], "http://localhost:4455");
        let data = CollectedClientData::parse(&raw).unwrap();
        let err = data
            .check_challenge(&Challenge::from_bytes(vec![2; 32]))
            .unwrap_err();
        assert!(matches!(err, PasskeyError::ChallengeMismatch));

        // A prefix of the right challenge is still a mismatch
        let err = data
            .check_challenge(&Challenge::from_bytes(vec![1; 16]))
            .unwrap_err();
        assert!(matches!(err, PasskeyError::ChallengeMismatch));
    }

    #[test]
    fn test_type_mismatch() {
        let raw = client_data("webauthn.create", &[1; 32], "http://localhost:4455");
        let data = CollectedClientData::parse(&raw).unwrap();
        let err = data.check_type(ClientDataType::Get).unwrap_err();
        assert!(matches!(
            err,
            PasskeyError::TypeMismatch { expected: "webauthn.get", ref actual } if actual == "webauthn.create"
        ));
    }

    #[test]
    fn test_origin_normalisation() {
        assert_eq!(
            normalize_origin("https://Example.com:443/path").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(normalize_origin("not a url"), None);

        let raw = client_data("webauthn.get", &[1; 32], "https://evil.example");
        let data = CollectedClientData::parse(&raw).unwrap();
        assert!(matches!(
            data.check_origin(&["https://example.com".to_string()]),
            Err(PasskeyError::OriginMismatch(_))
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            CollectedClientData::parse(b"{not json"),
            Err(PasskeyError::MalformedPayload(_))
        ));
        assert!(matches!(
            CollectedClientData::parse(br#"{"type":"webauthn.get"}"#),
            Err(PasskeyError::MalformedPayload(_))
        ));
    }
}
