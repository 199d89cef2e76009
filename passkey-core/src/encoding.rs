//! Base64url helpers
//!
//! Identifiers cross the wire as unpadded base64url. Decoding is lenient about
//! trailing `=` padding because some clients emit it.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::error::{PasskeyError, Result};

const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode bytes as unpadded base64url.
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    BASE64URL.encode(bytes)
}

/// Decode base64url, reporting failures as [`PasskeyError::MalformedPayload`].
pub fn decode(field: &str, value: &str) -> Result<Vec<u8>> {
    BASE64URL
        .decode(value)
        .map_err(|e| PasskeyError::malformed(format!("{field} is not valid base64url: {e}")))
}

/// Serde adapter storing `Vec<u8>` fields as base64url strings.
pub mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::BASE64URL;
    use base64::Engine;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64URL.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64URL.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_unpadded_url_safe() {
        assert_eq!(encode([0xfb, 0xff]), "-_8");
    }

    #[test]
    fn test_decode_accepts_padding() {
        assert_eq!(decode("f", "-_8=").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode("f", "-_8").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn test_decode_rejects_standard_alphabet() {
        let err = decode("challenge", "+/8").unwrap_err();
        assert!(matches!(err, PasskeyError::MalformedPayload(ref m) if m.contains("challenge")));
    }
}
