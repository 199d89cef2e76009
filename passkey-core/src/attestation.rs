//! Attestation objects
//!
//! A registration response carries a CBOR map `{fmt, authData, attStmt}`.
//! The authenticator data is parsed in full. The statement is checked only
//! where it carries its own verifying key:
//!
//! - `none`: the statement must be empty
//! - `packed` without `x5c`: self attestation, signed by the credential key
//! - `packed` with `x5c`: signed by the leaf certificate key, chain not walked
//!
//! Every other known format is accepted as [`AttestationType::Unverified`].

use ciborium::value::Value;
use openssl::hash::MessageDigest;
use openssl::x509::X509;
use serde::{Deserialize, Serialize};

use crate::authenticator_data::AuthenticatorData;
use crate::cose::{as_int, verify_with_pkey, CoseAlgorithm, CosePublicKey};
use crate::error::{PasskeyError, Result};

/// Attestation statement format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationFormat {
    /// Standard packed format
    Packed,
    /// TPM attestation (Windows)
    Tpm,
    /// Android Key attestation (hardware-backed)
    AndroidKey,
    /// Android SafetyNet
    AndroidSafetyNet,
    /// Apple anonymous attestation
    Apple,
    /// FIDO U2F
    FidoU2f,
    /// No attestation
    #[default]
    None,
}

impl AttestationFormat {
    /// Parse the registry identifier used in the `fmt` field.
    pub fn from_identifier(fmt: &str) -> Option<Self> {
        match fmt {
            "packed" => Some(Self::Packed),
            "tpm" => Some(Self::Tpm),
            "android-key" => Some(Self::AndroidKey),
            "android-safetynet" => Some(Self::AndroidSafetyNet),
            "apple" => Some(Self::Apple),
            "fido-u2f" => Some(Self::FidoU2f),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn identifier(self) -> &'static str {
        match self {
            Self::Packed => "packed",
            Self::Tpm => "tpm",
            Self::AndroidKey => "android-key",
            Self::AndroidSafetyNet => "android-safetynet",
            Self::Apple => "apple",
            Self::FidoU2f => "fido-u2f",
            Self::None => "none",
        }
    }
}

/// What the attestation statement established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationType {
    /// `none` format, nothing attested
    #[default]
    None,
    /// Signed by the credential key itself
    SelfAttestation,
    /// Signed by an attestation certificate (chain not validated)
    Basic,
    /// Format recognised but statement not checked
    Unverified,
}

/// Decoded attestation object.
#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub format: AttestationFormat,
    /// Authenticator data bytes as signed by the authenticator
    pub auth_data_raw: Vec<u8>,
    pub auth_data: AuthenticatorData,
    statement: Vec<(Value, Value)>,
}

impl AttestationObject {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = ciborium::from_reader(bytes)
            .map_err(|e| PasskeyError::malformed(format!("attestationObject: {e}")))?;
        let Value::Map(entries) = value else {
            return Err(PasskeyError::malformed("attestationObject is not a CBOR map"));
        };

        let mut fmt = None;
        let mut auth_data_raw = None;
        let mut statement = None;
        for (key, value) in entries {
            match (key.as_text(), value) {
                (Some("fmt"), Value::Text(text)) => fmt = Some(text),
                (Some("authData"), Value::Bytes(bytes)) => auth_data_raw = Some(bytes),
                (Some("attStmt"), Value::Map(map)) => statement = Some(map),
                (Some(field @ ("fmt" | "authData" | "attStmt")), _) => {
                    return Err(PasskeyError::malformed(format!(
                        "attestationObject.{field} has the wrong CBOR type"
                    )));
                }
                _ => {}
            }
        }

        let fmt = fmt.ok_or_else(|| PasskeyError::malformed("attestationObject.fmt missing"))?;
        let format = AttestationFormat::from_identifier(&fmt).ok_or_else(|| {
            PasskeyError::malformed(format!("unknown attestation format {fmt:?}"))
        })?;
        let auth_data_raw = auth_data_raw
            .ok_or_else(|| PasskeyError::malformed("attestationObject.authData missing"))?;
        let statement =
            statement.ok_or_else(|| PasskeyError::malformed("attestationObject.attStmt missing"))?;
        let auth_data = AuthenticatorData::parse(&auth_data_raw)?;

        Ok(Self {
            format,
            auth_data_raw,
            auth_data,
            statement,
        })
    }

    /// Check the attestation statement against `client_data_hash`.
    pub fn verify_statement(&self, client_data_hash: &[u8; 32]) -> Result<AttestationType> {
        match self.format {
            AttestationFormat::None => {
                if !self.statement.is_empty() {
                    return Err(PasskeyError::malformed(
                        "none attestation must have an empty statement",
                    ));
                }
                Ok(AttestationType::None)
            }
            AttestationFormat::Packed => self.verify_packed(client_data_hash),
            _ => Ok(AttestationType::Unverified),
        }
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.statement
            .iter()
            .find_map(|(k, v)| (k.as_text() == Some(name)).then_some(v))
    }

    fn verify_packed(&self, client_data_hash: &[u8; 32]) -> Result<AttestationType> {
        let alg = self
            .field("alg")
            .and_then(as_int)
            .and_then(|alg| i64::try_from(alg).ok())
            .ok_or_else(|| PasskeyError::malformed("packed attestation has no alg"))?;
        let alg = CoseAlgorithm::try_from(alg)?;
        let Some(Value::Bytes(sig)) = self.field("sig") else {
            return Err(PasskeyError::malformed("packed attestation has no sig"));
        };

        let mut message = self.auth_data_raw.clone();
        message.extend_from_slice(client_data_hash);

        match self.field("x5c") {
            None => {
                let credential = self.credential_key()?;
                if credential.algorithm() != alg {
                    return Err(PasskeyError::malformed(format!(
                        "self attestation alg {alg} does not match credential {}",
                        credential.algorithm()
                    )));
                }
                credential.verify(alg, &message, sig)?;
                Ok(AttestationType::SelfAttestation)
            }
            Some(Value::Array(chain)) => {
                let Some(Value::Bytes(leaf)) = chain.first() else {
                    return Err(PasskeyError::malformed("x5c has no leaf certificate"));
                };
                verify_with_certificate(leaf, alg, &message, sig)?;
                Ok(AttestationType::Basic)
            }
            Some(_) => Err(PasskeyError::malformed("x5c is not an array")),
        }
    }

    fn credential_key(&self) -> Result<&CosePublicKey> {
        self.auth_data
            .attested_credential
            .as_ref()
            .map(|cred| &cred.public_key)
            .ok_or_else(|| PasskeyError::malformed("attested credential data missing"))
    }
}

fn verify_with_certificate(
    der: &[u8],
    alg: CoseAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let invalid = |e: openssl::error::ErrorStack| {
        PasskeyError::malformed(format!("attestation certificate: {e}"))
    };
    let certificate = X509::from_der(der).map_err(invalid)?;
    let key = certificate.public_key().map_err(invalid)?;

    match alg {
        CoseAlgorithm::Es256 | CoseAlgorithm::Rs256 => {
            verify_with_pkey(&key, MessageDigest::sha256(), message, signature)
        }
        CoseAlgorithm::EdDsa => {
            let mut verifier = openssl::sign::Verifier::new_without_digest(&key)
                .map_err(|e| PasskeyError::SignatureInvalid(format!("verifier error: {e}")))?;
            match verifier.verify_oneshot(signature, message) {
                Ok(true) => Ok(()),
                Ok(false) | Err(_) => Err(PasskeyError::SignatureInvalid(
                    "attestation signature does not verify".into(),
                )),
            }
        }
    }
}
