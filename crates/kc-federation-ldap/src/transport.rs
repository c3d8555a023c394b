//! Directory transport.
//!
//! [`DirectoryConnector`] and [`DirectoryConnection`] are the seam between
//! the provider logic and the wire. [`Ldap3Connector`] speaks LDAP through
//! `ldap3`; tests substitute an in-memory directory.
//!
//! ## Security
//!
//! Bind passwords are held in [`BindCredentials`], whose `Debug` output
//! is redacted. Passwords are never logged.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, SearchEntry, SearchOptions};

use crate::config::SearchScope;
use crate::error::{LdapError, LdapResult, RC_SIZE_LIMIT_EXCEEDED};
use crate::search::DirectoryEntry;

/// Attribute list requesting no attributes.
pub const NO_ATTRIBUTES: &str = "1.1";

/// One search operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base DN.
    pub base: String,
    /// Search scope.
    pub scope: SearchScope,
    /// Complete filter.
    pub filter: String,
    /// Requested attributes.
    pub attributes: Vec<String>,
    /// Only distinguished names are needed.
    pub dn_only: bool,
    /// Server-side size limit.
    pub size_limit: Option<usize>,
}

impl SearchRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        base: impl Into<String>,
        scope: SearchScope,
        filter: impl Into<String>,
        attributes: &[&str],
    ) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes: attributes.iter().map(ToString::to_string).collect(),
            dn_only: false,
            size_limit: None,
        }
    }

    /// Requests distinguished names only.
    #[must_use]
    pub fn dn_only(mut self) -> Self {
        self.dn_only = true;
        self.attributes.clear();
        self
    }

    /// Sets a server-side size limit.
    #[must_use]
    pub fn with_size_limit(mut self, limit: usize) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// Attribute list sent on the wire.
    #[must_use]
    pub fn wire_attributes(&self) -> Vec<String> {
        if self.dn_only || self.attributes.is_empty() {
            vec![NO_ATTRIBUTES.to_string()]
        } else {
            self.attributes.clone()
        }
    }
}

/// Simple-bind credentials.
#[derive(Clone)]
pub struct BindCredentials {
    /// Bind DN or UPN.
    pub dn: String,
    password: String,
}

impl BindCredentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            password: password.into(),
        }
    }

    /// Password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for BindCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindCredentials")
            .field("dn", &self.dn)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Opens bound connections.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Connects to `url` and binds with `credentials`.
    async fn connect(
        &self,
        url: &str,
        credentials: &BindCredentials,
    ) -> LdapResult<Box<dyn DirectoryConnection>>;
}

/// An open, bound directory connection.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Single-request search.
    ///
    /// A size-limit result is only accepted when the request's own limit
    /// was reached.
    async fn search(&mut self, request: &SearchRequest) -> LdapResult<Vec<DirectoryEntry>>;

    /// Search with the paged results control.
    ///
    /// Fails with [`LdapError::UnavailableCriticalExtension`] when the
    /// server rejects the control.
    async fn paged_search(
        &mut self,
        request: &SearchRequest,
        page_size: usize,
        limit: Option<usize>,
    ) -> LdapResult<Vec<DirectoryEntry>>;

    /// Re-binds the connection.
    async fn bind(&mut self, credentials: &BindCredentials) -> LdapResult<()>;

    /// Unbinds and closes.
    async fn close(&mut self);
}

// ============================================================================
// ldap3 transport
// ============================================================================

/// Connector backed by `ldap3`.
#[derive(Debug, Clone)]
pub struct Ldap3Connector {
    timeout: Duration,
    validate_certificates: bool,
}

impl Ldap3Connector {
    /// Creates a connector.
    #[must_use]
    pub const fn new(timeout: Duration, validate_certificates: bool) -> Self {
        Self {
            timeout,
            validate_certificates,
        }
    }
}

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn connect(
        &self,
        url: &str,
        credentials: &BindCredentials,
    ) -> LdapResult<Box<dyn DirectoryConnection>> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.timeout)
            .set_no_tls_verify(!self.validate_certificates);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, url)
            .await
            .map_err(|e| LdapError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!("LDAP connection driver error: {}", e);
            }
        });

        let mut connection = Ldap3Connection { ldap };
        connection.bind(credentials).await?;
        tracing::debug!(url, bind_dn = %credentials.dn, "LDAP connection established");
        Ok(Box::new(connection))
    }
}

/// Connection backed by `ldap3`.
pub struct Ldap3Connection {
    ldap: Ldap,
}

fn size_limited(limit: Option<usize>, returned: usize) -> bool {
    limit.is_some_and(|l| returned >= l)
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    async fn search(&mut self, request: &SearchRequest) -> LdapResult<Vec<DirectoryEntry>> {
        let ldap = match request.size_limit {
            Some(limit) => {
                let limit = i32::try_from(limit).unwrap_or(i32::MAX);
                self.ldap
                    .with_search_options(SearchOptions::new().sizelimit(limit))
            }
            None => &mut self.ldap,
        };

        let ldap3::SearchResult(entries, result) = ldap
            .search(
                &request.base,
                request.scope.to_ldap3(),
                &request.filter,
                request.wire_attributes(),
            )
            .await?;

        let entries: Vec<DirectoryEntry> = entries
            .into_iter()
            .map(|e| DirectoryEntry::from_search_entry(SearchEntry::construct(e)))
            .collect();

        match result.rc {
            0 => Ok(entries),
            RC_SIZE_LIMIT_EXCEEDED if size_limited(request.size_limit, entries.len()) => {
                Ok(entries)
            }
            code => Err(LdapError::from_result_code(code, result.text)),
        }
    }

    async fn paged_search(
        &mut self,
        request: &SearchRequest,
        page_size: usize,
        limit: Option<usize>,
    ) -> LdapResult<Vec<DirectoryEntry>> {
        let page_size = i32::try_from(page_size).unwrap_or(i32::MAX);
        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(page_size)),
        ];

        let ldap = match limit {
            Some(limit) => {
                let limit = i32::try_from(limit).unwrap_or(i32::MAX);
                self.ldap
                    .with_search_options(SearchOptions::new().sizelimit(limit))
            }
            None => &mut self.ldap,
        };

        let mut stream = ldap
            .streaming_search_with(
                adapters,
                &request.base,
                request.scope.to_ldap3(),
                &request.filter,
                request.wire_attributes(),
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(entry) = stream.next().await? {
            entries.push(DirectoryEntry::from_search_entry(SearchEntry::construct(entry)));
        }

        let result = stream.finish().await;
        match result.rc {
            0 => Ok(entries),
            RC_SIZE_LIMIT_EXCEEDED if size_limited(limit, entries.len()) => Ok(entries),
            code => Err(LdapError::from_result_code(code, result.text)),
        }
    }

    async fn bind(&mut self, credentials: &BindCredentials) -> LdapResult<()> {
        self.ldap
            .simple_bind(&credentials.dn, credentials.password())
            .await?
            .success()?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.ldap.unbind().await {
            tracing::debug!(error = %e, "LDAP unbind failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dn_only_requests_no_attributes() {
        let request = SearchRequest::new("dc=example,dc=com", SearchScope::Subtree, "(uid=a)", &["cn"])
            .dn_only();
        assert_eq!(request.wire_attributes(), vec!["1.1".to_string()]);

        let empty = SearchRequest::new("dc=example,dc=com", SearchScope::Base, "(objectClass=*)", &[]);
        assert_eq!(empty.wire_attributes(), vec!["1.1".to_string()]);
    }

    #[test]
    fn size_limit_is_recorded() {
        let request = SearchRequest::new("dc=example,dc=com", SearchScope::Subtree, "(uid=*)", &["uid"])
            .with_size_limit(5);
        assert_eq!(request.size_limit, Some(5));
        assert_eq!(request.wire_attributes(), vec!["uid".to_string()]);
    }

    #[test]
    fn size_limit_result_accepted_only_when_reached() {
        assert!(size_limited(Some(5), 5));
        assert!(!size_limited(Some(5), 3));
        assert!(!size_limited(None, 100));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = BindCredentials::new("cn=admin,dc=example,dc=com", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("cn=admin"));
        assert!(!debug.contains("hunter2"));
        assert_eq!(creds.password(), "hunter2");
    }
}
