//! COSE algorithms and public keys
//!
//! Credential public keys arrive as COSE_Key CBOR maps inside the attested
//! credential data. Three key types are accepted:
//!
//! | alg  | kty     | curve / params | signature encoding            |
//! |------|---------|----------------|-------------------------------|
//! | -8   | OKP (1) | Ed25519 (6)    | raw 64 bytes                  |
//! | -7   | EC2 (2) | P-256 (1)      | ASN.1 DER ECDSA, SHA-256      |
//! | -257 | RSA (3) | n, e           | PKCS#1 v1.5, SHA-256          |

use ciborium::value::{Integer, Value};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use serde::{Deserialize, Serialize};

use crate::error::{PasskeyError, Result};

const KEY_KTY: i128 = 1;
const KEY_ALG: i128 = 3;
const KEY_CRV_OR_N: i128 = -1;
const KEY_X_OR_E: i128 = -2;
const KEY_Y: i128 = -3;

const KTY_OKP: i128 = 1;
const KTY_EC2: i128 = 2;
const KTY_RSA: i128 = 3;

const CRV_P256: i128 = 1;
const CRV_ED25519: i128 = 6;

/// Smallest RSA modulus accepted for RS256 credentials.
const MIN_RSA_MODULUS_BITS: usize = 2048;

/// Signature algorithms accepted for credentials, by COSE identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum CoseAlgorithm {
    /// EdDSA over Ed25519
    EdDsa,
    /// ECDSA P-256 with SHA-256
    Es256,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    Rs256,
}

impl CoseAlgorithm {
    /// Every accepted algorithm, in the order offered to clients.
    pub const SUPPORTED: [CoseAlgorithm; 3] = [Self::Es256, Self::EdDsa, Self::Rs256];

    pub fn id(self) -> i64 {
        match self {
            Self::EdDsa => -8,
            Self::Es256 => -7,
            Self::Rs256 => -257,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            -8 => Some(Self::EdDsa),
            -7 => Some(Self::Es256),
            -257 => Some(Self::Rs256),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::EdDsa => "Ed25519",
            Self::Es256 => "ES256",
            Self::Rs256 => "RS256",
        }
    }
}

impl From<CoseAlgorithm> for i64 {
    fn from(alg: CoseAlgorithm) -> Self {
        alg.id()
    }
}

impl TryFrom<i64> for CoseAlgorithm {
    type Error = PasskeyError;

    fn try_from(id: i64) -> Result<Self> {
        Self::from_id(id).ok_or(PasskeyError::UnsupportedAlgorithm(id))
    }
}

impl std::fmt::Display for CoseAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

/// A parsed credential public key.
#[derive(Clone, PartialEq, Eq)]
pub enum CosePublicKey {
    Ed25519 { x: [u8; 32] },
    P256 { x: [u8; 32], y: [u8; 32] },
    Rsa { n: Vec<u8>, e: Vec<u8> },
}

impl CosePublicKey {
    /// Parse a complete COSE_Key document.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value: Value = ciborium::from_reader(bytes)
            .map_err(|e| PasskeyError::malformed(format!("COSE key is not valid CBOR: {e}")))?;
        Self::from_value(&value)
    }

    /// Parse an already decoded COSE_Key map.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Map(entries) = value else {
            return Err(PasskeyError::malformed("COSE key is not a map"));
        };
        let get = |label: i128| {
            entries
                .iter()
                .find_map(|(k, v)| (as_int(k) == Some(label)).then_some(v))
        };

        let alg = get(KEY_ALG)
            .and_then(as_int)
            .ok_or_else(|| PasskeyError::malformed("COSE key has no algorithm"))?;
        let alg = i64::try_from(alg).map_err(|_| PasskeyError::malformed("COSE alg out of range"))?;
        let algorithm = CoseAlgorithm::try_from(alg)?;

        let kty = get(KEY_KTY)
            .and_then(as_int)
            .ok_or_else(|| PasskeyError::malformed("COSE key has no key type"))?;

        match (algorithm, kty) {
            (CoseAlgorithm::EdDsa, KTY_OKP) => {
                if get(KEY_CRV_OR_N).and_then(as_int) != Some(CRV_ED25519) {
                    return Err(PasskeyError::UnsupportedAlgorithm(alg));
                }
                let x = fixed_bytes::<32>(get(KEY_X_OR_E), "Ed25519 x")?;
                Ok(Self::Ed25519 { x })
            }
            (CoseAlgorithm::Es256, KTY_EC2) => {
                if get(KEY_CRV_OR_N).and_then(as_int) != Some(CRV_P256) {
                    return Err(PasskeyError::UnsupportedAlgorithm(alg));
                }
                let x = fixed_bytes::<32>(get(KEY_X_OR_E), "P-256 x")?;
                let y = fixed_bytes::<32>(get(KEY_Y), "P-256 y")?;
                Ok(Self::P256 { x, y })
            }
            (CoseAlgorithm::Rs256, KTY_RSA) => {
                let n = byte_string(get(KEY_CRV_OR_N), "RSA modulus")?;
                let e = byte_string(get(KEY_X_OR_E), "RSA exponent")?;
                if modulus_bits(&n) < MIN_RSA_MODULUS_BITS {
                    return Err(PasskeyError::UnsupportedAlgorithm(alg));
                }
                Ok(Self::Rsa { n, e })
            }
            (_, other) => Err(PasskeyError::malformed(format!(
                "COSE key type {other} does not match algorithm {algorithm}"
            ))),
        }
    }

    pub fn algorithm(&self) -> CoseAlgorithm {
        match self {
            Self::Ed25519 { .. } => CoseAlgorithm::EdDsa,
            Self::P256 { .. } => CoseAlgorithm::Es256,
            Self::Rsa { .. } => CoseAlgorithm::Rs256,
        }
    }

    /// Encode as a canonical COSE_Key map.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let int = |i: i64| Value::Integer(Integer::from(i));
        let alg = int(self.algorithm().id());
        let map = match self {
            Self::Ed25519 { x } => vec![
                (int(1), int(1)),
                (int(3), alg),
                (int(-1), int(6)),
                (int(-2), Value::Bytes(x.to_vec())),
            ],
            Self::P256 { x, y } => vec![
                (int(1), int(2)),
                (int(3), alg),
                (int(-1), int(1)),
                (int(-2), Value::Bytes(x.to_vec())),
                (int(-3), Value::Bytes(y.to_vec())),
            ],
            Self::Rsa { n, e } => vec![
                (int(1), int(3)),
                (int(3), alg),
                (int(-1), Value::Bytes(n.clone())),
                (int(-2), Value::Bytes(e.clone())),
            ],
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Map(map), &mut buf)
            .map_err(|e| PasskeyError::malformed(format!("COSE key encoding failed: {e}")))?;
        Ok(buf)
    }

    /// Verify `signature` over `message` with this key under `algorithm`.
    pub fn verify(&self, algorithm: CoseAlgorithm, message: &[u8], signature: &[u8]) -> Result<()> {
        if algorithm != self.algorithm() {
            return Err(PasskeyError::SignatureInvalid(format!(
                "algorithm {algorithm} does not match {} key",
                self.algorithm().name()
            )));
        }

        match self {
            Self::Ed25519 { x } => verify_ed25519(x, message, signature),
            Self::P256 { x, y } => verify_es256(x, y, message, signature),
            Self::Rsa { n, e } => verify_rs256(n, e, message, signature),
        }
    }
}

impl std::fmt::Debug for CosePublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ed25519 { .. } => f.write_str("CosePublicKey::Ed25519"),
            Self::P256 { .. } => f.write_str("CosePublicKey::P256"),
            Self::Rsa { n, .. } => write!(f, "CosePublicKey::Rsa({} bits)", modulus_bits(n)),
        }
    }
}

fn verify_ed25519(x: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()> {
    use ed25519_dalek::{Signature, VerifyingKey};

    let key = VerifyingKey::from_bytes(x)
        .map_err(|e| PasskeyError::SignatureInvalid(format!("invalid Ed25519 key: {e}")))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| PasskeyError::SignatureInvalid(format!("invalid Ed25519 signature: {e}")))?;

    // verify_strict rejects small-order keys and non-canonical signatures
    key.verify_strict(message, &signature)
        .map_err(|_| PasskeyError::SignatureInvalid("Ed25519 verification failed".into()))
}

fn verify_es256(x: &[u8; 32], y: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()> {
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::{Signature, VerifyingKey};

    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(x);
    sec1.extend_from_slice(y);

    let key = VerifyingKey::from_sec1_bytes(&sec1)
        .map_err(|e| PasskeyError::SignatureInvalid(format!("invalid P-256 key: {e}")))?;
    let signature = Signature::from_der(signature)
        .map_err(|e| PasskeyError::SignatureInvalid(format!("invalid ECDSA signature: {e}")))?;

    // The verifier hashes the message with SHA-256 itself
    key.verify(message, &signature)
        .map_err(|_| PasskeyError::SignatureInvalid("ES256 verification failed".into()))
}

fn verify_rs256(n: &[u8], e: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    let invalid = |e: openssl::error::ErrorStack| {
        PasskeyError::SignatureInvalid(format!("RSA key error: {e}"))
    };

    let rsa = Rsa::from_public_components(
        BigNum::from_slice(n).map_err(invalid)?,
        BigNum::from_slice(e).map_err(invalid)?,
    )
    .map_err(invalid)?;
    let key = PKey::from_rsa(rsa).map_err(invalid)?;
    verify_with_pkey(&key, MessageDigest::sha256(), message, signature)
}

/// Verify with an OpenSSL public key (RSA keys use PKCS#1 v1.5 padding).
pub(crate) fn verify_with_pkey<T: openssl::pkey::HasPublic>(
    key: &openssl::pkey::PKeyRef<T>,
    digest: MessageDigest,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let invalid = |e: openssl::error::ErrorStack| {
        PasskeyError::SignatureInvalid(format!("verifier error: {e}"))
    };

    let mut verifier = openssl::sign::Verifier::new(digest, key).map_err(invalid)?;
    verifier.update(message).map_err(invalid)?;
    // OpenSSL reports a bad signature either as Ok(false) or as an error
    match verifier.verify(signature) {
        Ok(true) => Ok(()),
        Ok(false) | Err(_) => Err(PasskeyError::SignatureInvalid(
            "signature does not verify".into(),
        )),
    }
}

pub(crate) fn as_int(value: &Value) -> Option<i128> {
    match value {
        Value::Integer(i) => Some(i128::from(*i)),
        _ => None,
    }
}

fn byte_string(value: Option<&Value>, what: &str) -> Result<Vec<u8>> {
    match value {
        Some(Value::Bytes(bytes)) if !bytes.is_empty() => Ok(bytes.clone()),
        _ => Err(PasskeyError::malformed(format!("COSE key missing {what}"))),
    }
}

fn fixed_bytes<const N: usize>(value: Option<&Value>, what: &str) -> Result<[u8; N]> {
    let bytes = byte_string(value, what)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| PasskeyError::malformed(format!("{what} must be {N} bytes")))
}

fn modulus_bits(n: &[u8]) -> usize {
    let n: Vec<u8> = n.iter().copied().skip_while(|&b| b == 0).collect();
    match n.first() {
        Some(first) => (n.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
        None => 0,
    }
}
