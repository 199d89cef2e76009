//! Software authenticator for tests.
//!
//! WARNING: Do not use in production. Keys live in process memory and the
//! builder can produce deliberately broken payloads.

use ciborium::value::Value;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::authenticator_data::{rp_id_hash, AuthenticatorFlags};
use crate::challenge::Challenge;
use crate::client_data::client_data_hash;
use crate::cose::{CoseAlgorithm, CosePublicKey};
use crate::encoding;
use crate::payload::{
    AssertionCredential, AssertionResponse, AttestationResponse, RegistrationCredential,
};

enum SigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    P256(p256::ecdsa::SigningKey),
    Rsa(PKey<Private>),
}

impl SigningKey {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Ed25519(key) => {
                use ed25519_dalek::Signer;
                key.sign(message).to_bytes().to_vec()
            }
            Self::P256(key) => {
                use p256::ecdsa::signature::Signer;
                let signature: p256::ecdsa::Signature = key.sign(message);
                signature.to_der().as_bytes().to_vec()
            }
            Self::Rsa(key) => sign_with_pkey(key, CoseAlgorithm::Rs256, message),
        }
    }

    fn public_key(&self) -> CosePublicKey {
        match self {
            Self::Ed25519(key) => CosePublicKey::Ed25519 {
                x: key.verifying_key().to_bytes(),
            },
            Self::P256(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                let mut x = [0u8; 32];
                let mut y = [0u8; 32];
                x.copy_from_slice(point.x().expect("uncompressed point has x"));
                y.copy_from_slice(point.y().expect("uncompressed point has y"));
                CosePublicKey::P256 { x, y }
            }
            Self::Rsa(key) => {
                let rsa = key.rsa().expect("RSA key");
                CosePublicKey::Rsa {
                    n: rsa.n().to_vec(),
                    e: rsa.e().to_vec(),
                }
            }
        }
    }
}

/// Attestation statement produced at registration.
enum Attestation {
    None,
    PackedSelf,
    /// Signed by a separate key whose self-signed certificate goes in `x5c`
    PackedCertificate {
        key: PKey<Private>,
        certificate: Vec<u8>,
    },
}

/// In-memory authenticator producing signed registration and assertion payloads.
pub struct SoftAuthenticator {
    key: SigningKey,
    credential_id: Vec<u8>,
    aaguid: [u8; 16],
    rp_id: String,
    origin: String,
    client_data_type: Option<String>,
    flags: u8,
    attestation: Attestation,
    corrupt_attestation_signature: bool,
    user_handle: Option<Vec<u8>>,
}

impl SoftAuthenticator {
    fn with_key(key: SigningKey) -> Self {
        let mut credential_id = vec![0u8; 16];
        OsRng.fill_bytes(&mut credential_id);
        Self {
            key,
            credential_id,
            aaguid: [0u8; 16],
            rp_id: "localhost".to_string(),
            origin: "http://localhost:4455".to_string(),
            client_data_type: None,
            flags: AuthenticatorFlags::USER_PRESENT | AuthenticatorFlags::USER_VERIFIED,
            attestation: Attestation::None,
            corrupt_attestation_signature: false,
            user_handle: None,
        }
    }

    pub fn ed25519() -> Self {
        Self::with_key(SigningKey::Ed25519(ed25519_dalek::SigningKey::generate(
            &mut OsRng,
        )))
    }

    pub fn es256() -> Self {
        Self::with_key(SigningKey::P256(p256::ecdsa::SigningKey::random(&mut OsRng)))
    }

    pub fn rs256() -> Self {
        let rsa = Rsa::generate(2048).expect("RSA key generation");
        Self::with_key(SigningKey::Rsa(PKey::from_rsa(rsa).expect("RSA PKey")))
    }

    pub fn for_algorithm(algorithm: CoseAlgorithm) -> Self {
        match algorithm {
            CoseAlgorithm::EdDsa => Self::ed25519(),
            CoseAlgorithm::Es256 => Self::es256(),
            CoseAlgorithm::Rs256 => Self::rs256(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_rp_id(mut self, rp_id: impl Into<String>) -> Self {
        self.rp_id = rp_id.into();
        self
    }

    /// Override the `type` field written into client data.
    pub fn with_client_data_type(mut self, ty: impl Into<String>) -> Self {
        self.client_data_type = Some(ty.into());
        self
    }

    pub fn with_credential_id(mut self, credential_id: impl Into<Vec<u8>>) -> Self {
        self.credential_id = credential_id.into();
        self
    }

    pub fn with_aaguid(mut self, aaguid: [u8; 16]) -> Self {
        self.aaguid = aaguid;
        self
    }

    pub fn without_user_verification(mut self) -> Self {
        self.flags &= !AuthenticatorFlags::USER_VERIFIED;
        self
    }

    pub fn without_user_presence(mut self) -> Self {
        self.flags &= !AuthenticatorFlags::USER_PRESENT;
        self
    }

    /// Report the credential as backup eligible and backed up.
    pub fn with_backup(mut self) -> Self {
        self.flags |= AuthenticatorFlags::BACKUP_ELIGIBLE | AuthenticatorFlags::BACKED_UP;
        self
    }

    /// Attest with a packed self-attestation statement instead of `none`.
    pub fn with_packed_attestation(mut self) -> Self {
        self.attestation = Attestation::PackedSelf;
        self
    }

    /// Attest with a packed statement carrying an `x5c` leaf certificate.
    /// The attestation key is fresh and uses the credential's algorithm.
    pub fn with_certificate_attestation(mut self) -> Self {
        let algorithm = self.algorithm();
        let key = attestation_key(algorithm);
        let certificate = self_signed_certificate(&key, algorithm);
        self.attestation = Attestation::PackedCertificate { key, certificate };
        self
    }

    pub fn with_corrupt_attestation_signature(mut self) -> Self {
        self.corrupt_attestation_signature = true;
        self
    }

    pub fn with_user_handle(mut self, handle: impl Into<Vec<u8>>) -> Self {
        self.user_handle = Some(handle.into());
        self
    }

    pub fn credential_id(&self) -> Vec<u8> {
        self.credential_id.clone()
    }

    pub fn algorithm(&self) -> CoseAlgorithm {
        self.key.public_key().algorithm()
    }

    pub fn public_key(&self) -> CosePublicKey {
        self.key.public_key()
    }

    fn client_data(&self, default_type: &str, challenge: &Challenge) -> Vec<u8> {
        let ty = self.client_data_type.as_deref().unwrap_or(default_type);
        serde_json::to_vec(&serde_json::json!({
            "type": ty,
            "challenge": challenge.to_base64url(),
            "origin": self.origin,
            "crossOrigin": false,
        }))
        .expect("client data serializes")
    }

    fn authenticator_data(&self, flags: u8, counter: u32, attested: bool) -> Vec<u8> {
        let mut data = rp_id_hash(&self.rp_id).to_vec();
        data.push(flags);
        data.extend_from_slice(&counter.to_be_bytes());
        if attested {
            let id_len = u16::try_from(self.credential_id.len()).expect("credential id length");
            data.extend_from_slice(&self.aaguid);
            data.extend_from_slice(&id_len.to_be_bytes());
            data.extend_from_slice(&self.credential_id);
            data.extend_from_slice(&self.key.public_key().to_cbor().expect("COSE key encodes"));
        }
        data
    }

    /// Registration response over `challenge`, with counter 0.
    pub fn register(&self, challenge: &Challenge) -> RegistrationCredential {
        self.register_with_counter(challenge, 0)
    }

    pub fn register_with_counter(
        &self,
        challenge: &Challenge,
        counter: u32,
    ) -> RegistrationCredential {
        let client_data_json = self.client_data("webauthn.create", challenge);
        let auth_data = self.authenticator_data(
            self.flags | AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA,
            counter,
            true,
        );

        let text = |s: &str| Value::Text(s.to_string());
        let mut message = auth_data.clone();
        message.extend_from_slice(&client_data_hash(&client_data_json));
        let alg = (text("alg"), Value::Integer(self.algorithm().id().into()));

        let (fmt, statement) = match &self.attestation {
            Attestation::None => ("none", Vec::new()),
            Attestation::PackedSelf => {
                let sig = self.attestation_signature(self.key.sign(&message));
                ("packed", vec![alg, (text("sig"), Value::Bytes(sig))])
            }
            Attestation::PackedCertificate { key, certificate } => {
                let sig =
                    self.attestation_signature(sign_with_pkey(key, self.algorithm(), &message));
                (
                    "packed",
                    vec![
                        alg,
                        (text("sig"), Value::Bytes(sig)),
                        (
                            text("x5c"),
                            Value::Array(vec![Value::Bytes(certificate.clone())]),
                        ),
                    ],
                )
            }
        };

        let object = Value::Map(vec![
            (text("fmt"), text(fmt)),
            (text("attStmt"), Value::Map(statement)),
            (text("authData"), Value::Bytes(auth_data)),
        ]);
        let mut attestation_object = Vec::new();
        ciborium::into_writer(&object, &mut attestation_object)
            .expect("attestation object encodes");

        RegistrationCredential {
            id: encoding::encode(&self.credential_id),
            raw_id: encoding::encode(&self.credential_id),
            ty: "public-key".to_string(),
            response: AttestationResponse {
                client_data_json: encoding::encode(&client_data_json),
                attestation_object: encoding::encode(&attestation_object),
                transports: vec!["internal".to_string()],
            },
        }
    }

    fn attestation_signature(&self, mut sig: Vec<u8>) -> Vec<u8> {
        if self.corrupt_attestation_signature {
            flip_last_byte(&mut sig);
        }
        sig
    }

    /// Assertion over `challenge` reporting signature counter `counter`.
    pub fn authenticate(&self, challenge: &Challenge, counter: u32) -> AssertionCredential {
        let client_data_json = self.client_data("webauthn.get", challenge);
        let auth_data = self.authenticator_data(self.flags, counter, false);

        let mut message = auth_data.clone();
        message.extend_from_slice(&client_data_hash(&client_data_json));
        let signature = self.key.sign(&message);

        AssertionCredential {
            id: encoding::encode(&self.credential_id),
            raw_id: encoding::encode(&self.credential_id),
            ty: "public-key".to_string(),
            response: AssertionResponse {
                client_data_json: encoding::encode(&client_data_json),
                authenticator_data: encoding::encode(&auth_data),
                signature: encoding::encode(&signature),
                user_handle: self.user_handle.as_ref().map(encoding::encode),
            },
        }
    }
}

/// Flip one bit in the signature of an otherwise valid assertion.
pub fn tamper_signature(payload: &mut AssertionCredential) {
    let mut signature =
        encoding::decode("signature", &payload.response.signature).expect("signature decodes");
    flip_last_byte(&mut signature);
    payload.response.signature = encoding::encode(&signature);
}

fn sign_with_pkey(key: &PKey<Private>, algorithm: CoseAlgorithm, message: &[u8]) -> Vec<u8> {
    match algorithm {
        CoseAlgorithm::EdDsa => openssl::sign::Signer::new_without_digest(key)
            .and_then(|mut signer| signer.sign_oneshot_to_vec(message))
            .expect("Ed25519 signature"),
        CoseAlgorithm::Es256 | CoseAlgorithm::Rs256 => {
            let mut signer =
                openssl::sign::Signer::new(MessageDigest::sha256(), key).expect("signer");
            signer.update(message).expect("signer update");
            signer.sign_to_vec().expect("signature")
        }
    }
}

fn attestation_key(algorithm: CoseAlgorithm) -> PKey<Private> {
    match algorithm {
        CoseAlgorithm::EdDsa => PKey::generate_ed25519().expect("Ed25519 key generation"),
        CoseAlgorithm::Es256 => {
            let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("P-256 group");
            let key = EcKey::generate(&group).expect("P-256 key generation");
            PKey::from_ec_key(key).expect("P-256 PKey")
        }
        CoseAlgorithm::Rs256 => {
            let rsa = Rsa::generate(2048).expect("RSA key generation");
            PKey::from_rsa(rsa).expect("RSA PKey")
        }
    }
}

/// DER of a one-year self-signed certificate for `key`.
fn self_signed_certificate(key: &PKey<Private>, algorithm: CoseAlgorithm) -> Vec<u8> {
    // Ed25519 certificates are signed without a separate digest
    let digest = match algorithm {
        CoseAlgorithm::EdDsa => MessageDigest::null(),
        CoseAlgorithm::Es256 | CoseAlgorithm::Rs256 => MessageDigest::sha256(),
    };

    let mut name = X509NameBuilder::new().expect("X509 name builder");
    name.append_entry_by_text("O", "Soft Authenticator")
        .expect("X509 organisation");
    name.append_entry_by_text("CN", "Soft Authenticator Attestation")
        .expect("X509 common name");
    let name = name.build();

    let serial = BigNum::from_u32(1)
        .and_then(|n| n.to_asn1_integer())
        .expect("X509 serial");
    let not_before = Asn1Time::days_from_now(0).expect("X509 not before");
    let not_after = Asn1Time::days_from_now(365).expect("X509 not after");

    let mut builder = X509Builder::new().expect("X509 builder");
    builder.set_version(2).expect("X509 version");
    builder.set_serial_number(&serial).expect("X509 serial number");
    builder.set_subject_name(&name).expect("X509 subject");
    builder.set_issuer_name(&name).expect("X509 issuer");
    builder.set_pubkey(key).expect("X509 public key");
    builder.set_not_before(&not_before).expect("X509 validity start");
    builder.set_not_after(&not_after).expect("X509 validity end");
    builder.sign(key, digest).expect("X509 signature");
    builder.build().to_der().expect("X509 DER")
}

fn flip_last_byte(bytes: &mut [u8]) {
    if let Some(last) = bytes.last_mut() {
        *last ^= 0x01;
    }
}
