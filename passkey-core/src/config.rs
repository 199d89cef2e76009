//! Relying Party configuration
//!
//! Identity of the relying party plus the challenge policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::authenticator_data::rp_id_hash;
use crate::challenge::MIN_CHALLENGE_BYTES;
use crate::client_data::normalize_origin;

/// Longest challenge lifetime accepted.
const MAX_CHALLENGE_TTL_SECS: u64 = 24 * 60 * 60;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid origin URL: {0}")]
    InvalidOrigin(String),

    #[error("Invalid relying party id: {0}")]
    InvalidRpId(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// User verification requirement, as advertised to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    #[default]
    Required,
    Preferred,
    Discouraged,
}

impl UserVerification {
    /// Only `required` makes a missing UV flag fatal.
    pub fn is_required(self) -> bool {
        self == Self::Required
    }
}

impl std::str::FromStr for UserVerification {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "required" => Ok(Self::Required),
            "preferred" => Ok(Self::Preferred),
            "discouraged" => Ok(Self::Discouraged),
            _ => Err(ConfigError::InvalidValue {
                name: "WEBAUTHN_USER_VERIFICATION",
                value: s.to_string(),
            }),
        }
    }
}

/// Relying party configuration
#[derive(Debug, Clone)]
pub struct RelyingPartyConfig {
    /// Relying Party ID (a registrable domain, e.g. "example.com")
    pub rp_id: String,
    /// Human-readable name shown by authenticators
    pub rp_name: String,
    /// Allowed client origins, normalised (e.g. "https://example.com")
    pub origins: Vec<String>,
    /// Lifetime of an issued challenge
    pub challenge_ttl: Duration,
    /// Random bytes per challenge (at least 16)
    pub challenge_bytes: usize,
    /// Whether issuing replaces a live challenge or fails with a conflict
    pub allow_challenge_overwrite: bool,
    pub user_verification: UserVerification,
    /// Client-side ceremony timeout advertised in options
    pub ceremony_timeout: Duration,
}

impl Default for RelyingPartyConfig {
    fn default() -> Self {
        Self {
            rp_id: "localhost".to_string(),
            rp_name: "My Web App".to_string(),
            origins: vec!["http://localhost:4455".to_string()],
            challenge_ttl: Duration::from_secs(600),
            challenge_bytes: 32,
            allow_challenge_overwrite: true,
            user_verification: UserVerification::Required,
            ceremony_timeout: Duration::from_millis(60_000),
        }
    }
}

impl RelyingPartyConfig {
    /// Create a configuration for one relying party id and origin set.
    pub fn new(
        rp_id: impl Into<String>,
        origins: impl IntoIterator<Item = impl AsRef<str>>,
        rp_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            rp_id: rp_id.into(),
            rp_name: rp_name.into(),
            origins: origins
                .into_iter()
                .map(|origin| parse_origin(origin.as_ref()))
                .collect::<Result<_, _>>()?,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `WEBAUTHN_RP_ID` - Relying Party ID (default: "localhost")
    /// - `WEBAUTHN_RP_ORIGIN` - comma-separated origins (default: "http://localhost:4455")
    /// - `WEBAUTHN_RP_NAME` - RP display name (default: "My Web App")
    /// - `CHALLENGE_TTL_SECS` - challenge lifetime (default: 600)
    /// - `CHALLENGE_BYTES` - random bytes per challenge (default: 32)
    /// - `ALLOW_CHALLENGE_OVERWRITE` - replace live challenges (default: true)
    /// - `WEBAUTHN_USER_VERIFICATION` - required | preferred | discouraged (default: required)
    /// - `WEBAUTHN_TIMEOUT_MS` - ceremony timeout advertised to clients (default: 60000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let rp_id = std::env::var("WEBAUTHN_RP_ID").unwrap_or(defaults.rp_id);
        let rp_name = std::env::var("WEBAUTHN_RP_NAME").unwrap_or(defaults.rp_name);
        let origins = match std::env::var("WEBAUTHN_RP_ORIGIN") {
            Ok(value) => value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_origin)
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => defaults.origins,
        };

        let challenge_ttl = env_parse("CHALLENGE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.challenge_ttl);
        let challenge_bytes = env_parse("CHALLENGE_BYTES")?.unwrap_or(defaults.challenge_bytes);
        let allow_challenge_overwrite =
            env_parse("ALLOW_CHALLENGE_OVERWRITE")?.unwrap_or(defaults.allow_challenge_overwrite);
        let user_verification = match std::env::var("WEBAUTHN_USER_VERIFICATION") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.user_verification,
        };
        let ceremony_timeout = env_parse("WEBAUTHN_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.ceremony_timeout);

        let config = Self {
            rp_id,
            rp_name,
            origins,
            challenge_ttl,
            challenge_bytes,
            allow_challenge_overwrite,
            user_verification,
            ceremony_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rp_id = &self.rp_id;
        if rp_id.is_empty() || rp_id.contains(['/', ':', ' ']) {
            return Err(ConfigError::InvalidRpId(rp_id.clone()));
        }
        if self.origins.is_empty() {
            return Err(ConfigError::InvalidOrigin("no origins configured".into()));
        }
        if self.challenge_bytes < MIN_CHALLENGE_BYTES {
            return Err(ConfigError::InvalidValue {
                name: "CHALLENGE_BYTES",
                value: self.challenge_bytes.to_string(),
            });
        }
        if self.challenge_ttl.is_zero()
            || self.challenge_ttl > Duration::from_secs(MAX_CHALLENGE_TTL_SECS)
        {
            return Err(ConfigError::InvalidValue {
                name: "CHALLENGE_TTL_SECS",
                value: format!("{:?}", self.challenge_ttl),
            });
        }
        Ok(())
    }

    /// SHA-256 of the relying party id, expected in authenticator data.
    pub fn rp_id_hash(&self) -> [u8; 32] {
        rp_id_hash(&self.rp_id)
    }
}

/// The checks shared by registration and assertion verification.
#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    pub rp_id_hash: [u8; 32],
    pub origins: Vec<String>,
    pub require_user_verification: bool,
}

impl From<&RelyingPartyConfig> for VerificationPolicy {
    fn from(config: &RelyingPartyConfig) -> Self {
        Self {
            rp_id_hash: config.rp_id_hash(),
            origins: config.origins.clone(),
            require_user_verification: config.user_verification.is_required(),
        }
    }
}

fn parse_origin(origin: &str) -> Result<String, ConfigError> {
    normalize_origin(origin).ok_or_else(|| ConfigError::InvalidOrigin(origin.to_string()))
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RelyingPartyConfig::default();
        config.validate().unwrap();
        assert_eq!(config.challenge_ttl, Duration::from_secs(600));
        assert!(config.allow_challenge_overwrite);
        assert!(config.user_verification.is_required());
    }

    #[test]
    fn test_new_normalises_origins() {
        let config = RelyingPartyConfig::new(
            "example.com",
            ["https://Example.com/", "https://app.example.com:8443"],
            "Example",
        )
        .unwrap();
        assert_eq!(
            config.origins,
            vec!["https://example.com", "https://app.example.com:8443"]
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            RelyingPartyConfig::new("localhost", ["not a url"], "x"),
            Err(ConfigError::InvalidOrigin(_))
        ));
        assert!(matches!(
            RelyingPartyConfig::new("https://localhost", ["http://localhost"], "x"),
            Err(ConfigError::InvalidRpId(_))
        ));

        let config = RelyingPartyConfig {
            challenge_bytes: 8,
            ..RelyingPartyConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                name: "CHALLENGE_BYTES",
                ..
            })
        ));
    }

    #[test]
    fn test_user_verification_parsing() {
        assert_eq!(
            "Preferred".parse::<UserVerification>().unwrap(),
            UserVerification::Preferred
        );
        assert!("sometimes".parse::<UserVerification>().is_err());
    }
}
