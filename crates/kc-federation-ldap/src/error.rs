//! LDAP-specific error types.
//!
//! ## Security Note
//!
//! Error messages must not leak sensitive information like
//! passwords, bind credentials, or internal LDAP structure.
//! Filters and base DNs are logged at the point of failure and
//! dropped when an error crosses into [`FederationError`].

use kc_federation::FederationError;
use thiserror::Error;

/// Result code: size limit exceeded.
pub const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;
/// Result code: unavailable critical extension.
pub const RC_UNAVAILABLE_CRITICAL_EXTENSION: u32 = 12;
/// Result code: no such object.
pub const RC_NO_SUCH_OBJECT: u32 = 32;
/// Result code: invalid credentials.
pub const RC_INVALID_CREDENTIALS: u32 = 49;

/// LDAP-specific errors.
#[derive(Debug, Error)]
pub enum LdapError {
    /// Invalid configuration.
    #[error("LDAP configuration error: {0}")]
    Configuration(String),

    /// Plaintext URL without explicit opt-in.
    #[error("Security error: plain ldap:// URLs require allow_plaintext; use ldaps://")]
    InsecureProtocol,

    /// Connection failed.
    #[error("LDAP connection failed: {0}")]
    Connection(String),

    /// Every candidate endpoint refused the connection.
    #[error("No directory endpoint reachable for {domain}: {message}")]
    NoEndpointReachable {
        /// Domain being connected to.
        domain: String,
        /// Last failure.
        message: String,
    },

    /// Topology discovery failed.
    #[error("Domain controller discovery failed for {domain}: {message}")]
    Topology {
        /// Domain being discovered.
        domain: String,
        /// Failure reason.
        message: String,
    },

    /// Bind rejected with invalid credentials (result code 49).
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Bind failed for another reason.
    #[error("LDAP bind failed: {0}")]
    Bind(String),

    /// Server rejected a critical control (result code 12).
    #[error("Unavailable critical extension: {0}")]
    UnavailableCriticalExtension(String),

    /// Result count exceeded the requested or configured limit (result code 4).
    #[error("Size limit exceeded ({limit} entries)")]
    SizeLimitExceeded {
        /// Limit in effect.
        limit: usize,
    },

    /// Search base does not exist (result code 32).
    #[error("No such object: {0}")]
    NoSuchObject(String),

    /// Principal not found or ambiguous.
    #[error("Invalid principal '{principal}': {message}")]
    InvalidPrincipal {
        /// Reason.
        message: String,
        /// Best-effort UPN or DN.
        principal: String,
    },

    /// Lockout or password policy object missing or ambiguous.
    #[error("Password policy unavailable: {0}")]
    PolicyUnavailable(String),

    /// Attribute mapping error.
    #[error("Attribute mapping error: {0}")]
    AttributeMapping(String),

    /// Attribute value could not be decoded.
    #[error("Invalid value for attribute {attribute}: {message}")]
    InvalidAttributeValue {
        /// Attribute name.
        attribute: String,
        /// Decoding failure.
        message: String,
    },

    /// Operation timed out.
    #[error("LDAP operation timed out")]
    Timeout,

    /// Pool closed.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Other result code from the server.
    #[error("LDAP protocol error (rc={code}): {message}")]
    Protocol {
        /// LDAP result code.
        code: u32,
        /// Diagnostic text.
        message: String,
    },

    /// Internal error.
    #[error("Internal LDAP error: {0}")]
    Internal(String),
}

impl LdapError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a connection error.
    #[must_use]
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates an attribute mapping error.
    #[must_use]
    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::AttributeMapping(msg.into())
    }

    /// Creates an invalid principal error.
    #[must_use]
    pub fn invalid_principal(message: impl Into<String>, principal: impl Into<String>) -> Self {
        Self::InvalidPrincipal {
            message: message.into(),
            principal: principal.into(),
        }
    }

    /// Creates an attribute decoding error.
    #[must_use]
    pub fn invalid_value(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAttributeValue {
            attribute: attribute.into(),
            message: message.into(),
        }
    }

    /// Maps a non-success LDAP result code to an error.
    #[must_use]
    pub fn from_result_code(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            RC_SIZE_LIMIT_EXCEEDED => Self::SizeLimitExceeded { limit: 0 },
            RC_UNAVAILABLE_CRITICAL_EXTENSION => Self::UnavailableCriticalExtension(message),
            RC_NO_SUCH_OBJECT => Self::NoSuchObject(message),
            RC_INVALID_CREDENTIALS => Self::InvalidCredentials,
            _ => Self::Protocol { code, message },
        }
    }

    /// Checks if this is a connection-related error.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::NoEndpointReachable { .. }
                | Self::Topology { .. }
                | Self::Timeout
                | Self::PoolExhausted
        )
    }

    /// Checks if the server rejected a paging control.
    #[must_use]
    pub const fn is_capability_rejection(&self) -> bool {
        matches!(self, Self::UnavailableCriticalExtension(_))
    }

    /// Checks if this is a security-related error.
    #[must_use]
    pub const fn is_security_error(&self) -> bool {
        matches!(
            self,
            Self::InsecureProtocol | Self::InvalidCredentials | Self::Bind(_)
        )
    }
}

/// Result type for LDAP operations.
pub type LdapResult<T> = Result<T, LdapError>;

impl From<ldap3::LdapError> for LdapError {
    fn from(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { result } => {
                Self::from_result_code(result.rc, result.text)
            }
            other => Self::Connection(other.to_string()),
        }
    }
}

impl From<LdapError> for FederationError {
    fn from(err: LdapError) -> Self {
        match err {
            LdapError::Configuration(msg) | LdapError::AttributeMapping(msg) => {
                FederationError::Configuration(msg)
            }
            LdapError::InsecureProtocol => FederationError::Configuration(err.to_string()),
            LdapError::Connection(_)
            | LdapError::NoEndpointReachable { .. }
            | LdapError::Topology { .. }
            | LdapError::Timeout
            | LdapError::PoolExhausted => FederationError::Connectivity(err.to_string()),
            LdapError::InvalidCredentials => {
                FederationError::AuthenticationFailed("invalid credentials".to_string())
            }
            LdapError::Bind(msg) => FederationError::AuthenticationFailed(msg),
            LdapError::SizeLimitExceeded { limit } => FederationError::SizeLimitExceeded { limit },
            LdapError::InvalidPrincipal { message, principal } => {
                FederationError::InvalidPrincipal { message, principal }
            }
            LdapError::NoSuchObject(ref object) => {
                tracing::warn!(object = %object, "Directory reported no such object");
                FederationError::invalid_principal("no such object", "(see provider log)")
            }
            LdapError::InvalidAttributeValue { attribute, .. } => FederationError::Internal(
                format!("directory returned an unreadable {attribute} value"),
            ),
            LdapError::UnavailableCriticalExtension(msg)
            | LdapError::PolicyUnavailable(msg)
            | LdapError::Internal(msg) => FederationError::Internal(msg),
            LdapError::Protocol { code, message } => {
                tracing::warn!(code, message = %message, "Unhandled directory result code");
                FederationError::invalid_principal(
                    format!("directory returned result code {code}"),
                    "(see provider log)",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_categories() {
        assert!(LdapError::InsecureProtocol.is_security_error());
        assert!(LdapError::InvalidCredentials.is_security_error());
        assert!(LdapError::Bind("bad password".to_string()).is_security_error());

        assert!(LdapError::connection("refused").is_connection_error());
        assert!(LdapError::Timeout.is_connection_error());
        assert!(LdapError::PoolExhausted.is_connection_error());
        assert!(!LdapError::NoSuchObject("x".into()).is_connection_error());
    }

    #[test]
    fn result_codes_map_to_dedicated_variants() {
        assert!(LdapError::from_result_code(12, "paging").is_capability_rejection());
        assert!(matches!(
            LdapError::from_result_code(4, ""),
            LdapError::SizeLimitExceeded { .. }
        ));
        assert!(matches!(
            LdapError::from_result_code(32, "ou=gone"),
            LdapError::NoSuchObject(_)
        ));
        assert!(matches!(
            LdapError::from_result_code(49, ""),
            LdapError::InvalidCredentials
        ));
        assert!(matches!(
            LdapError::from_result_code(53, "unwilling"),
            LdapError::Protocol { code: 53, .. }
        ));
    }

    #[test]
    fn translates_to_federation_taxonomy() {
        let err: FederationError = LdapError::NoSuchObject("ou=users,dc=example".into()).into();
        assert!(err.is_invalid_principal());
        assert!(!err.to_string().contains("ou=users"));

        let err: FederationError = LdapError::connection("refused").into();
        assert!(err.is_connectivity_error());

        let err: FederationError = LdapError::SizeLimitExceeded { limit: 10 }.into();
        assert!(matches!(err, FederationError::SizeLimitExceeded { limit: 10 }));

        let err: FederationError = LdapError::InvalidCredentials.into();
        assert!(err.is_auth_error());

        let err: FederationError = LdapError::from_result_code(53, "unwilling").into();
        assert!(err.is_invalid_principal());
        assert!(!err.to_string().contains("unwilling"));
    }

    #[test]
    fn insecure_protocol_message() {
        let msg = LdapError::InsecureProtocol.to_string();
        assert!(msg.contains("ldaps://"));
        assert!(msg.contains("allow_plaintext"));
    }
}
