use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum PasskeyError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Challenge missing or expired")]
    ChallengeMissingOrExpired,

    #[error("Challenge mismatch")]
    ChallengeMismatch,

    #[error("Client data type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("Origin not allowed: {0}")]
    OriginMismatch(String),

    #[error("Relying party id hash mismatch")]
    RelyingPartyMismatch,

    #[error("User presence flag not set")]
    UserPresenceMissing,

    #[error("User verification required but flag not set")]
    UserVerificationMissing,

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(i64),

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Replay detected: presented counter {presented} <= stored counter {stored}")]
    ReplayDetected { stored: u32, presented: u32 },

    #[error("No credential: {0}")]
    NoCredential(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
}

/// Copyable classification of [`PasskeyError`] for transport mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidIdentity,
    MalformedPayload,
    ChallengeMissingOrExpired,
    ChallengeMismatch,
    TypeMismatch,
    OriginMismatch,
    RelyingPartyMismatch,
    UserPresenceMissing,
    UserVerificationMissing,
    UnsupportedAlgorithm,
    SignatureInvalid,
    ReplayDetected,
    NoCredential,
    StorageUnavailable,
}

impl ErrorKind {
    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::InvalidIdentity => "INVALID_IDENTITY",
            Self::MalformedPayload => "MALFORMED_PAYLOAD",
            Self::ChallengeMissingOrExpired => "CHALLENGE_MISSING_OR_EXPIRED",
            Self::ChallengeMismatch => "CHALLENGE_MISMATCH",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::OriginMismatch => "ORIGIN_MISMATCH",
            Self::RelyingPartyMismatch => "RELYING_PARTY_MISMATCH",
            Self::UserPresenceMissing => "USER_PRESENCE_MISSING",
            Self::UserVerificationMissing => "USER_VERIFICATION_MISSING",
            Self::UnsupportedAlgorithm => "UNSUPPORTED_ALGORITHM",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::ReplayDetected => "REPLAY_DETECTED",
            Self::NoCredential => "NO_CREDENTIAL",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl PasskeyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidIdentity(_) => ErrorKind::InvalidIdentity,
            Self::MalformedPayload(_) => ErrorKind::MalformedPayload,
            Self::ChallengeMissingOrExpired => ErrorKind::ChallengeMissingOrExpired,
            Self::ChallengeMismatch => ErrorKind::ChallengeMismatch,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::OriginMismatch(_) => ErrorKind::OriginMismatch,
            Self::RelyingPartyMismatch => ErrorKind::RelyingPartyMismatch,
            Self::UserPresenceMissing => ErrorKind::UserPresenceMissing,
            Self::UserVerificationMissing => ErrorKind::UserVerificationMissing,
            Self::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            Self::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            Self::ReplayDetected { .. } => ErrorKind::ReplayDetected,
            Self::NoCredential(_) => ErrorKind::NoCredential,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PasskeyError>;
