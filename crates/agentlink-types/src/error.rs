//! Configuration and identity errors.
//!
//! Everything in here is fatal at startup: a `ConfigError` is returned to the
//! caller before any listener is bound.

use crate::identity::SEED_ENV_VAR;
use thiserror::Error;

/// Errors raised while validating configuration or deriving the identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The target agent address was not supplied.
    #[error("agent_address is required")]
    MissingAgentAddress,

    /// The target agent address is not a well-formed network address.
    #[error("Invalid agent address '{0}'")]
    InvalidAgentAddress(String),

    /// A configuration value is out of range or unparseable.
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue {
        /// The configuration key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// No seed is available and generating one is not permitted.
    #[error("No bridge seed configured: set `seed` in the config or {}", SEED_ENV_VAR)]
    MissingSeed,

    /// The seed is present but unusable.
    #[error("Invalid bridge seed: {0}")]
    InvalidSeed(String),

    /// The configuration document could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// The configuration file could not be read.
    #[error("Failed to read config file {path}: {reason}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Alias for Result with ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
