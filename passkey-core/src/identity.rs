//! Account identity

use serde::{Deserialize, Serialize};

use crate::error::{PasskeyError, Result};

/// Maximum identity length in characters.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Validated account identity (username).
///
/// Identities are used verbatim inside storage keys, so they must be
/// non-empty, bounded and free of control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(PasskeyError::InvalidIdentity("identity is empty".into()));
        }
        if value.chars().count() > MAX_IDENTITY_LEN {
            return Err(PasskeyError::InvalidIdentity(format!(
                "identity longer than {MAX_IDENTITY_LEN} characters"
            )));
        }
        if value.chars().any(char::is_control) {
            return Err(PasskeyError::InvalidIdentity(
                "identity contains control characters".into(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Opaque user handle handed to authenticators: base64url of the identity bytes.
    pub fn handle(&self) -> String {
        crate::encoding::encode(self.0.as_bytes())
    }
}

impl TryFrom<String> for Identity {
    type Error = PasskeyError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
