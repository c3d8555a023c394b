//! Federation error types.
//!
//! ## Security Note
//!
//! Messages surfaced to callers carry the principal being resolved and a
//! short reason. Filters, base DNs and directory diagnostics stay in the
//! logs of the provider that produced them.

use thiserror::Error;

/// Errors returned by identity providers.
#[derive(Debug, Error)]
pub enum FederationError {
    /// Principal not found, ambiguous, or malformed.
    #[error("Invalid principal '{principal}': {message}")]
    InvalidPrincipal {
        /// Reason.
        message: String,
        /// Best-effort UPN or DN of the principal.
        principal: String,
    },

    /// No directory endpoint could be reached.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Unpaged result exceeded the configured ceiling.
    #[error("Search returned more than {limit} entries; narrow the query")]
    SizeLimitExceeded {
        /// Ceiling that was exceeded.
        limit: usize,
    },

    /// Account is locked out.
    #[error("Account is locked: {0}")]
    AccountLocked(String),

    /// Account password has expired.
    #[error("Password has expired: {0}")]
    PasswordExpired(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Caller supplied an argument the provider cannot honor.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal federation error: {0}")]
    Internal(String),
}

impl FederationError {
    /// Creates an invalid principal error.
    #[must_use]
    pub fn invalid_principal(message: impl Into<String>, principal: impl Into<String>) -> Self {
        Self::InvalidPrincipal {
            message: message.into(),
            principal: principal.into(),
        }
    }

    /// Creates a connectivity error.
    #[must_use]
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    /// Creates an authentication failed error.
    #[must_use]
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed(msg.into())
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Checks if this is an invalid principal error.
    #[must_use]
    pub const fn is_invalid_principal(&self) -> bool {
        matches!(self, Self::InvalidPrincipal { .. })
    }

    /// Checks if this is a connectivity error.
    #[must_use]
    pub const fn is_connectivity_error(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Checks if this is an authentication error.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::AccountLocked(_) | Self::PasswordExpired(_)
        )
    }

    /// Checks if the end user can act on this error (unlock or reset).
    #[must_use]
    pub const fn is_user_actionable(&self) -> bool {
        matches!(self, Self::AccountLocked(_) | Self::PasswordExpired(_))
    }
}

/// Result type for federation operations.
pub type FederationResult<T> = Result<T, FederationError>;
