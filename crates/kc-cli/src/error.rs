//! CLI error types.

use kc_federation::FederationError;
use kc_federation_ldap::LdapError;
use thiserror::Error;

/// CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Identity provider error.
    #[error(transparent)]
    Federation(#[from] FederationError),

    /// Provider construction error.
    #[error(transparent)]
    Ldap(#[from] LdapError),

    /// Resource not found.
    #[error("{resource_type} not found: {id}")]
    NotFound {
        /// Type of resource.
        resource_type: String,
        /// Resource identifier.
        id: String,
    },

    /// Terminal or filesystem failure.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Output could not be serialized.
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Federation(FederationError::Connectivity(_)) => 3,
            Self::Federation(
                FederationError::AuthenticationFailed(_)
                | FederationError::AccountLocked(_)
                | FederationError::PasswordExpired(_),
            ) => 4,
            Self::Federation(
                FederationError::Configuration(_) | FederationError::InvalidArgument(_),
            )
            | Self::Config(_)
            | Self::Ldap(_)
            | Self::InvalidArgument(_) => 2,
            _ => 1,
        }
    }
}

/// CLI result type.
pub type CliResult<T> = Result<T, CliError>;
