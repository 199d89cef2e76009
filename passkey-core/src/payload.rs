//! Client-submitted credential payloads
//!
//! These mirror the JSON produced by `navigator.credentials.create()` and
//! `.get()` after base64url-encoding every `ArrayBuffer`. Fields default to
//! empty so that a structurally incomplete payload still reaches the
//! verifier, which consumes the challenge before rejecting it.

use serde::{Deserialize, Serialize};

use crate::client_data::CollectedClientData;
use crate::encoding;
use crate::error::{PasskeyError, Result};

const PUBLIC_KEY_TYPE: &str = "public-key";

/// Response to a registration challenge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCredential {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub raw_id: String,
    #[serde(default, rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub response: AttestationResponse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponse {
    #[serde(default, rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(default)]
    pub attestation_object: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<String>,
}

/// Response to an authentication challenge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AssertionCredential {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub raw_id: String,
    #[serde(default, rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub response: AssertionResponse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    #[serde(default, rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(default)]
    pub authenticator_data: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
}

/// Registration payload with every byte field decoded.
#[derive(Debug, Clone)]
pub struct DecodedRegistration {
    pub raw_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub client_data: CollectedClientData,
    pub attestation_object: Vec<u8>,
    pub transports: Vec<String>,
}

/// Assertion payload with every byte field decoded.
#[derive(Debug, Clone)]
pub struct DecodedAssertion {
    pub raw_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub client_data: CollectedClientData,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
}

fn decode_raw_id(id: &str, raw_id: &str, ty: &str) -> Result<Vec<u8>> {
    if ty != PUBLIC_KEY_TYPE {
        return Err(PasskeyError::malformed(format!(
            "credential type must be {PUBLIC_KEY_TYPE:?}, got {ty:?}"
        )));
    }
    let raw_id = encoding::decode("rawId", raw_id)?;
    if raw_id.is_empty() {
        return Err(PasskeyError::malformed("rawId is empty"));
    }
    if encoding::decode("id", id)? != raw_id {
        return Err(PasskeyError::malformed("id does not match rawId"));
    }
    Ok(raw_id)
}

impl RegistrationCredential {
    pub fn decode(&self) -> Result<DecodedRegistration> {
        let raw_id = decode_raw_id(&self.id, &self.raw_id, &self.ty)?;
        let client_data_json =
            encoding::decode("clientDataJSON", &self.response.client_data_json)?;
        let client_data = CollectedClientData::parse(&client_data_json)?;
        let attestation_object =
            encoding::decode("attestationObject", &self.response.attestation_object)?;

        Ok(DecodedRegistration {
            raw_id,
            client_data_json,
            client_data,
            attestation_object,
            transports: self.response.transports.clone(),
        })
    }
}

impl AssertionCredential {
    pub fn decode(&self) -> Result<DecodedAssertion> {
        let raw_id = decode_raw_id(&self.id, &self.raw_id, &self.ty)?;
        let client_data_json =
            encoding::decode("clientDataJSON", &self.response.client_data_json)?;
        let client_data = CollectedClientData::parse(&client_data_json)?;
        let authenticator_data =
            encoding::decode("authenticatorData", &self.response.authenticator_data)?;
        let signature = encoding::decode("signature", &self.response.signature)?;
        let user_handle = self
            .response
            .user_handle
            .as_deref()
            .filter(|handle| !handle.is_empty())
            .map(|handle| encoding::decode("userHandle", handle))
            .transpose()?;

        Ok(DecodedAssertion {
            raw_id,
            client_data_json,
            client_data,
            authenticator_data,
            signature,
            user_handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_data_json() -> String {
        encoding::encode(
            br#"{"type":"webauthn.get","challenge":"AAAA","origin":"http://localhost:4455"}"#,
        )
    }

    fn assertion() -> AssertionCredential {
        AssertionCredential {
            id: encoding::encode([1, 2, 3]),
            raw_id: encoding::encode([1, 2, 3]),
            ty: "public-key".into(),
            response: AssertionResponse {
                client_data_json: client_data_json(),
                authenticator_data: encoding::encode([0; 37]),
                signature: encoding::encode([9; 64]),
                user_handle: Some(encoding::encode(b"alice")),
            },
        }
    }

    #[test]
    fn test_decode_assertion() {
        let decoded = assertion().decode().unwrap();
        assert_eq!(decoded.raw_id, vec![1, 2, 3]);
        assert_eq!(decoded.client_data.ty, "webauthn.get");
        assert_eq!(decoded.authenticator_data.len(), 37);
        assert_eq!(decoded.user_handle.as_deref(), Some(&b"alice"[..]));
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(assertion()).unwrap();
        assert!(json["rawId"].is_string());
        assert_eq!(json["type"], "public-key");
        assert!(json["response"]["clientDataJSON"].is_string());
        assert!(json["response"]["authenticatorData"].is_string());
        assert!(json["response"]["userHandle"].is_string());
    }

    #[test]
    fn test_id_must_match_raw_id() {
        let mut payload = assertion();
        payload.id = encoding::encode([4, 5, 6]);
        assert!(matches!(
            payload.decode(),
            Err(PasskeyError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_wrong_type_is_malformed() {
        let mut payload = assertion();
        payload.ty = "password".into();
        assert!(matches!(
            payload.decode(),
            Err(PasskeyError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_missing_fields_default_then_fail_decode() {
        let payload: RegistrationCredential = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            payload.decode(),
            Err(PasskeyError::MalformedPayload(_))
        ));
    }
}
