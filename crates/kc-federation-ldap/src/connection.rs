//! LDAP connection pool management.
//!
//! ## Endpoint selection
//!
//! Without site affinity the configured URLs are tried in order. With
//! site affinity the pool asks [`TopologyDiscovery`] for the preferred
//! domain controller, tries its global-catalog port before the standard
//! port, and remembers the URL that worked. A remembered URL that stops
//! answering is forgotten and discovery is forced to look again.
//!
//! ## Security Requirements
//!
//! Connections bound as an end user (password checks) are never returned
//! to the pool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::LdapConfig;
use crate::error::{LdapError, LdapResult};
use crate::search::DirectoryEntry;
use crate::topology::{candidate_urls, TopologyDiscovery};
use crate::transport::{BindCredentials, DirectoryConnection, DirectoryConnector, SearchRequest};

type IdleList = Arc<Mutex<Vec<Box<dyn DirectoryConnection>>>>;

// ============================================================================
// Endpoint Cache
// ============================================================================

/// Last working URL per domain.
#[derive(Debug, Default)]
pub struct EndpointCache {
    entries: RwLock<HashMap<String, String>>,
}

impl EndpointCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached URL for `domain`.
    #[must_use]
    pub fn get(&self, domain: &str) -> Option<String> {
        self.entries.read().get(&domain.to_lowercase()).cloned()
    }

    /// Remembers `url` for `domain`.
    pub fn insert(&self, domain: &str, url: &str) {
        self.entries
            .write()
            .insert(domain.to_lowercase(), url.to_string());
    }

    /// Forgets the URL for `domain`.
    pub fn invalidate(&self, domain: &str) {
        self.entries.write().remove(&domain.to_lowercase());
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Connection pool for one identity source.
///
/// At most `pool_max_size` connections are checked out at once.
pub struct ConnectionPool {
    config: Arc<LdapConfig>,
    connector: Arc<dyn DirectoryConnector>,
    topology: Option<Arc<dyn TopologyDiscovery>>,
    endpoints: EndpointCache,
    idle: IdleList,
    semaphore: Arc<Semaphore>,
}

impl ConnectionPool {
    /// Creates a pool.
    #[must_use]
    pub fn new(
        config: Arc<LdapConfig>,
        connector: Arc<dyn DirectoryConnector>,
        topology: Option<Arc<dyn TopologyDiscovery>>,
    ) -> Self {
        let max_size = config.pool_max_size;
        Self {
            config,
            connector,
            topology,
            endpoints: EndpointCache::new(),
            idle: Arc::new(Mutex::new(Vec::new())),
            semaphore: Arc::new(Semaphore::new(max_size)),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Site-affinity endpoint cache.
    #[must_use]
    pub fn endpoints(&self) -> &EndpointCache {
        &self.endpoints
    }

    /// Idle connections held by the pool.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn service_credentials(&self) -> BindCredentials {
        BindCredentials::new(
            self.config.bind_dn.as_str(),
            self.config.bind_credential.as_str(),
        )
    }

    async fn permit(&self) -> LdapResult<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LdapError::PoolExhausted)
    }

    /// Gets a service-bound connection from the pool.
    ///
    /// Returns a connection handle that releases back to the pool when dropped.
    pub async fn get(&self) -> LdapResult<PooledConnection> {
        let permit = self.permit().await?;

        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.establish(&self.service_credentials()).await?,
        };

        Ok(PooledConnection {
            inner: Some(conn),
            home: Some(self.idle.clone()),
            broken: false,
            _permit: permit,
        })
    }

    /// Opens a connection bound as `credentials`.
    ///
    /// ## Security
    ///
    /// The connection is discarded instead of returned to the pool.
    pub async fn connect_as(&self, credentials: &BindCredentials) -> LdapResult<PooledConnection> {
        let permit = self.permit().await?;
        let conn = self.establish(credentials).await?;
        Ok(PooledConnection {
            inner: Some(conn),
            home: None,
            broken: false,
            _permit: permit,
        })
    }

    async fn establish(&self, credentials: &BindCredentials) -> LdapResult<Box<dyn DirectoryConnection>> {
        if self.config.flags.site_affinity {
            self.connect_with_affinity(credentials).await
        } else {
            self.connect_any(credentials).await
        }
    }

    /// Tries each configured URL in order.
    async fn connect_any(&self, credentials: &BindCredentials) -> LdapResult<Box<dyn DirectoryConnection>> {
        let mut last_error = None;
        for url in &self.config.connection_urls {
            match self.connector.connect(url, credentials).await {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_connection_error() => {
                    tracing::warn!(url = %url, error = %e, "LDAP endpoint unreachable, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| LdapError::config("no connection URLs configured")))
    }

    #[tracing::instrument(skip(self, credentials), fields(domain = %self.config.name))]
    async fn connect_with_affinity(
        &self,
        credentials: &BindCredentials,
    ) -> LdapResult<Box<dyn DirectoryConnection>> {
        let domain = self.config.name.as_str();
        let mut force_rediscover = false;

        if let Some(url) = self.endpoints.get(domain) {
            match self.connector.connect(&url, credentials).await {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_connection_error() => {
                    tracing::warn!(url = %url, error = %e, "Cached domain controller unreachable, rediscovering");
                    self.endpoints.invalidate(domain);
                    force_rediscover = true;
                }
                Err(e) => return Err(e),
            }
        }

        let topology = self
            .topology
            .as_ref()
            .ok_or_else(|| LdapError::config("site affinity requires topology discovery"))?;
        let controller = topology.preferred_endpoint(domain, force_rediscover).await?;
        let host = controller.host(domain);

        let mut last_error = None;
        for url in candidate_urls(host, self.config.prefers_ldaps()) {
            match self.connector.connect(&url, credentials).await {
                Ok(conn) => {
                    tracing::info!(url = %url, "Connected to preferred domain controller");
                    self.endpoints.insert(domain, &url);
                    return Ok(conn);
                }
                Err(e) if e.is_connection_error() => {
                    tracing::debug!(url = %url, error = %e, "Domain controller port unreachable");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(LdapError::NoEndpointReachable {
            domain: domain.to_string(),
            message: last_error.map_or_else(|| "no candidates".to_string(), |e| e.to_string()),
        })
    }

    /// Tests the connection to the LDAP server.
    pub async fn test_connection(&self) -> LdapResult<()> {
        let mut conn = self.get().await?;
        let request = SearchRequest::new(
            self.config.user_base_dn.as_str(),
            crate::config::SearchScope::Base,
            "(objectClass=*)",
            &[],
        );
        conn.search(&request).await?;
        Ok(())
    }
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection from the pool.
///
/// When dropped, the connection is returned to the pool unless it failed
/// with a connection error or was bound as an end user.
pub struct PooledConnection {
    inner: Option<Box<dyn DirectoryConnection>>,
    home: Option<IdleList>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn conn(&mut self) -> LdapResult<&mut Box<dyn DirectoryConnection>> {
        self.inner
            .as_mut()
            .ok_or_else(|| LdapError::Internal("connection already released".to_string()))
    }

    fn track<T>(&mut self, result: LdapResult<T>) -> LdapResult<T> {
        if let Err(e) = &result {
            if e.is_connection_error() {
                self.broken = true;
            }
        }
        result
    }

    /// Consumes the connection without returning it to the pool.
    pub async fn discard(mut self) {
        self.home = None;
        if let Some(mut conn) = self.inner.take() {
            conn.close().await;
        }
    }
}

#[async_trait]
impl DirectoryConnection for PooledConnection {
    async fn search(&mut self, request: &SearchRequest) -> LdapResult<Vec<DirectoryEntry>> {
        let result = self.conn()?.search(request).await;
        self.track(result)
    }

    async fn paged_search(
        &mut self,
        request: &SearchRequest,
        page_size: usize,
        limit: Option<usize>,
    ) -> LdapResult<Vec<DirectoryEntry>> {
        let result = self.conn()?.paged_search(request, page_size, limit).await;
        self.track(result)
    }

    async fn bind(&mut self, credentials: &BindCredentials) -> LdapResult<()> {
        // Re-bound connections no longer carry the service identity.
        self.home = None;
        let result = self.conn()?.bind(credentials).await;
        self.track(result)
    }

    async fn close(&mut self) {
        self.home = None;
        if let Some(mut conn) = self.inner.take() {
            conn.close().await;
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.broken {
            return;
        }
        if let (Some(home), Some(conn)) = (self.home.take(), self.inner.take()) {
            home.lock().push(conn);
        }
    }
}
