//! Domain controller discovery.
//!
//! Site affinity asks an external locator for the preferred domain
//! controller of a domain. The locator is a black box to this crate.

use async_trait::async_trait;

use crate::error::LdapResult;

/// Global catalog port.
pub const GC_PORT: u16 = 3268;
/// Global catalog port over TLS.
pub const GC_SSL_PORT: u16 = 3269;
/// Standard LDAP port.
pub const LDAP_PORT: u16 = 389;
/// Standard LDAPS port.
pub const LDAPS_PORT: u16 = 636;

/// Preferred domain controller for a domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainControllerInfo {
    /// Fully qualified host name.
    pub fqdn: Option<String>,
    /// IP address.
    pub ip_address: Option<String>,
}

impl DomainControllerInfo {
    /// Creates an answer with a host name.
    #[must_use]
    pub fn with_fqdn(fqdn: impl Into<String>) -> Self {
        Self {
            fqdn: Some(fqdn.into()),
            ip_address: None,
        }
    }

    /// Host to connect to: the FQDN, else the IP address, else `domain`.
    #[must_use]
    pub fn host<'a>(&'a self, domain: &'a str) -> &'a str {
        [self.fqdn.as_deref(), self.ip_address.as_deref()]
            .into_iter()
            .flatten()
            .find(|h| !h.trim().is_empty())
            .unwrap_or(domain)
    }
}

/// Global-catalog URL, then standard-port URL, for `host`.
#[must_use]
pub fn candidate_urls(host: &str, secure: bool) -> [String; 2] {
    if secure {
        [
            format!("ldaps://{host}:{GC_SSL_PORT}"),
            format!("ldaps://{host}:{LDAPS_PORT}"),
        ]
    } else {
        [
            format!("ldap://{host}:{GC_PORT}"),
            format!("ldap://{host}:{LDAP_PORT}"),
        ]
    }
}

/// Locates domain controllers.
#[async_trait]
pub trait TopologyDiscovery: Send + Sync {
    /// Preferred controller for `domain`; `force_rediscover` bypasses any
    /// locator-side cache.
    async fn preferred_endpoint(
        &self,
        domain: &str,
        force_rediscover: bool,
    ) -> LdapResult<DomainControllerInfo>;
}
