//! Identity-source configuration.
//!
//! ## Security Requirements
//!
//! - Connection URLs use `ldaps://` unless `allow_plaintext` is set
//! - STARTTLS is NOT supported (vulnerable to downgrade attacks)
//! - The bind credential is never serialized

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LdapError, LdapResult};
use crate::schema::AttributeId;

/// Default page size for paged searches.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default window for ranged attribute retrieval.
pub const DEFAULT_RANGE_SIZE: usize = 1000;

/// Default ceiling for unpaged result sets.
pub const DEFAULT_UNPAGED_RESULT_CEILING: usize = 10 * DEFAULT_PAGE_SIZE;

// ============================================================================
// Schema Kind and Flags
// ============================================================================

/// Directory flavor of the identity source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    /// Generic LDAP (OpenLDAP style).
    #[default]
    Generic,
    /// Active Directory over LDAP.
    ActiveDirectory,
}

/// Feature switches of the identity source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderFlags {
    /// Resolve nested groups with one matching-rule-in-chain query.
    pub matching_rule_in_chain: bool,
    /// Only ever return direct parent groups.
    pub direct_groups_only: bool,
    /// Search nested groups under the group base DN instead of the domain root.
    pub use_group_base_dn_for_nested_groups: bool,
    /// Discover a nearby domain controller instead of using configured URLs.
    pub site_affinity: bool,
}

impl Default for ProviderFlags {
    fn default() -> Self {
        Self {
            matching_rule_in_chain: false,
            direct_groups_only: false,
            use_group_base_dn_for_nested_groups: true,
            site_affinity: false,
        }
    }
}

impl ProviderFlags {
    /// Matching-rule-in-chain applies only when full nesting is wanted.
    #[must_use]
    pub const fn uses_in_chain(&self) -> bool {
        self.matching_rule_in_chain && !self.direct_groups_only
    }
}

/// LDAP search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchScope {
    /// Search only the base DN.
    Base,
    /// Search one level below the base DN.
    OneLevel,
    /// Search the entire subtree.
    #[default]
    Subtree,
}

impl SearchScope {
    /// Converts to ldap3 scope.
    #[must_use]
    pub fn to_ldap3(&self) -> ldap3::Scope {
        match self {
            Self::Base => ldap3::Scope::Base,
            Self::OneLevel => ldap3::Scope::OneLevel,
            Self::Subtree => ldap3::Scope::Subtree,
        }
    }
}

// ============================================================================
// LDAP Configuration
// ============================================================================

/// Identity-source descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    // === Identity ===
    /// Domain name served by this source.
    pub name: String,

    /// Optional alias domain.
    #[serde(default)]
    pub alias: Option<String>,

    /// Directory flavor.
    #[serde(default)]
    pub schema: SchemaKind,

    // === Connection ===
    /// Directory URLs, tried in order.
    #[serde(default)]
    pub connection_urls: Vec<String>,

    /// Bind DN for service account.
    pub bind_dn: String,

    /// Bind credential (password).
    #[serde(skip_serializing, default)]
    pub bind_credential: String,

    /// Whether to validate server certificates.
    #[serde(default = "default_true")]
    pub validate_certificates: bool,

    /// Accept `ldap://` URLs.
    #[serde(default)]
    pub allow_plaintext: bool,

    /// Connect timeout in seconds.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Maximum concurrently borrowed connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,

    // === Directory Structure ===
    /// Base DN for user searches.
    pub user_base_dn: String,

    /// Base DN for group searches.
    pub group_base_dn: String,

    // === Attributes ===
    /// Logical attribute name to directory attribute, for attribute resolution.
    #[serde(default)]
    pub attribute_map: BTreeMap<String, String>,

    /// Per-attribute schema overrides keyed by attribute id (`user_email`);
    /// an empty name marks the attribute absent.
    #[serde(default)]
    pub schema_overrides: BTreeMap<String, String>,

    /// Feature switches.
    #[serde(default)]
    pub flags: ProviderFlags,

    // === Search ===
    /// Page size for paged searches.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Window size for ranged attribute retrieval.
    #[serde(default = "default_range_size")]
    pub range_size: usize,

    /// Maximum entries accepted from an unbounded unpaged search.
    #[serde(default = "default_unpaged_result_ceiling")]
    pub unpaged_result_ceiling: usize,
}

const fn default_true() -> bool {
    true
}

const fn default_connection_timeout_secs() -> u64 {
    5
}

const fn default_pool_max_size() -> usize {
    10
}

const fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

const fn default_range_size() -> usize {
    DEFAULT_RANGE_SIZE
}

const fn default_unpaged_result_ceiling() -> usize {
    DEFAULT_UNPAGED_RESULT_CEILING
}

impl LdapConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> LdapConfigBuilder {
        LdapConfigBuilder::new()
    }

    /// Validates the configuration.
    ///
    /// ## Security
    ///
    /// Rejects plaintext URLs unless `allow_plaintext` is set.
    pub fn validate(&self) -> LdapResult<()> {
        if self.name.trim().is_empty() {
            return Err(LdapError::config("name cannot be empty"));
        }

        if self.connection_urls.is_empty() && !self.flags.site_affinity {
            return Err(LdapError::config(
                "connection_urls cannot be empty without site affinity",
            ));
        }

        for url in &self.connection_urls {
            self.validate_url(url)?;
        }

        if self.bind_dn.is_empty() {
            return Err(LdapError::config("bind_dn cannot be empty"));
        }

        if self.user_base_dn.is_empty() {
            return Err(LdapError::config("user_base_dn cannot be empty"));
        }

        if self.group_base_dn.is_empty() {
            return Err(LdapError::config("group_base_dn cannot be empty"));
        }

        if self.page_size == 0 || self.range_size == 0 {
            return Err(LdapError::config("page_size and range_size must be positive"));
        }

        if self.unpaged_result_ceiling == 0 {
            return Err(LdapError::config("unpaged_result_ceiling must be positive"));
        }

        if self.pool_max_size == 0 {
            return Err(LdapError::config("pool_max_size must be positive"));
        }

        Ok(())
    }

    /// Validates one connection URL.
    fn validate_url(&self, url: &str) -> LdapResult<()> {
        let url_lower = url.to_lowercase();

        let host = if let Some(rest) = url_lower.strip_prefix("ldaps://") {
            rest
        } else if let Some(rest) = url_lower.strip_prefix("ldap://") {
            if !self.allow_plaintext {
                return Err(LdapError::InsecureProtocol);
            }
            rest
        } else {
            return Err(LdapError::config(format!(
                "Unsupported connection URL scheme: {url}"
            )));
        };

        if host.is_empty() {
            return Err(LdapError::config("Invalid connection URL: missing host"));
        }

        Ok(())
    }

    /// Site-affinity endpoints use LDAPS when any configured URL does, or
    /// when no URL is configured at all.
    #[must_use]
    pub fn prefers_ldaps(&self) -> bool {
        self.connection_urls.is_empty()
            || self
                .connection_urls
                .iter()
                .any(|u| u.to_lowercase().starts_with("ldaps://"))
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// `DC=` form of the domain name.
    #[must_use]
    pub fn domain_dn(&self) -> String {
        crate::translator::domain_dn(&self.name)
    }

    /// Base DN for nested group traversal.
    #[must_use]
    pub fn nested_group_base_dn(&self) -> String {
        if self.flags.use_group_base_dn_for_nested_groups {
            self.group_base_dn.clone()
        } else {
            self.domain_dn()
        }
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for LDAP configuration.
#[derive(Debug, Default)]
pub struct LdapConfigBuilder {
    name: Option<String>,
    alias: Option<String>,
    schema: SchemaKind,
    connection_urls: Vec<String>,
    bind_dn: Option<String>,
    bind_credential: Option<String>,
    validate_certificates: bool,
    allow_plaintext: bool,
    connection_timeout_secs: u64,
    pool_max_size: usize,
    user_base_dn: Option<String>,
    group_base_dn: Option<String>,
    attribute_map: BTreeMap<String, String>,
    schema_overrides: BTreeMap<String, String>,
    flags: ProviderFlags,
    page_size: usize,
    range_size: usize,
    unpaged_result_ceiling: Option<usize>,
}

impl LdapConfigBuilder {
    /// Creates a new builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            validate_certificates: true,
            connection_timeout_secs: default_connection_timeout_secs(),
            pool_max_size: default_pool_max_size(),
            page_size: DEFAULT_PAGE_SIZE,
            range_size: DEFAULT_RANGE_SIZE,
            ..Default::default()
        }
    }

    /// Sets the domain name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the alias domain.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Sets the directory flavor.
    #[must_use]
    pub const fn schema(mut self, schema: SchemaKind) -> Self {
        self.schema = schema;
        self
    }

    /// Appends a connection URL.
    #[must_use]
    pub fn connection_url(mut self, url: impl Into<String>) -> Self {
        self.connection_urls.push(url.into());
        self
    }

    /// Sets the bind DN.
    #[must_use]
    pub fn bind_dn(mut self, dn: impl Into<String>) -> Self {
        self.bind_dn = Some(dn.into());
        self
    }

    /// Sets the bind credential (password).
    #[must_use]
    pub fn bind_credential(mut self, credential: impl Into<String>) -> Self {
        self.bind_credential = Some(credential.into());
        self
    }

    /// Sets whether to validate certificates.
    #[must_use]
    pub const fn validate_certificates(mut self, validate: bool) -> Self {
        self.validate_certificates = validate;
        self
    }

    /// Accepts plaintext `ldap://` URLs.
    #[must_use]
    pub const fn allow_plaintext(mut self, allow: bool) -> Self {
        self.allow_plaintext = allow;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the maximum pool size.
    #[must_use]
    pub const fn pool_max_size(mut self, max: usize) -> Self {
        self.pool_max_size = max;
        self
    }

    /// Sets the user base DN.
    #[must_use]
    pub fn user_base_dn(mut self, dn: impl Into<String>) -> Self {
        self.user_base_dn = Some(dn.into());
        self
    }

    /// Sets the group base DN.
    #[must_use]
    pub fn group_base_dn(mut self, dn: impl Into<String>) -> Self {
        self.group_base_dn = Some(dn.into());
        self
    }

    /// Maps a logical attribute name to a directory attribute.
    #[must_use]
    pub fn map_attribute(mut self, logical: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.attribute_map.insert(logical.into(), attribute.into());
        self
    }

    /// Overrides one schema attribute; `None` marks it absent.
    #[must_use]
    pub fn schema_override(mut self, id: AttributeId, attribute: Option<&str>) -> Self {
        self.schema_overrides
            .insert(id.as_str().to_string(), attribute.unwrap_or_default().to_string());
        self
    }

    /// Sets the feature flags.
    #[must_use]
    pub const fn flags(mut self, flags: ProviderFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the ranged retrieval window.
    #[must_use]
    pub const fn range_size(mut self, size: usize) -> Self {
        self.range_size = size;
        self
    }

    /// Sets the unpaged result ceiling.
    #[must_use]
    pub const fn unpaged_result_ceiling(mut self, ceiling: usize) -> Self {
        self.unpaged_result_ceiling = Some(ceiling);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - Required fields are missing
    /// - A connection URL is plaintext without `allow_plaintext`
    pub fn build(self) -> LdapResult<LdapConfig> {
        let config = LdapConfig {
            name: self
                .name
                .ok_or_else(|| LdapError::config("name is required"))?,
            alias: self.alias,
            schema: self.schema,
            connection_urls: self.connection_urls,
            bind_dn: self
                .bind_dn
                .ok_or_else(|| LdapError::config("bind_dn is required"))?,
            bind_credential: self
                .bind_credential
                .ok_or_else(|| LdapError::config("bind_credential is required"))?,
            validate_certificates: self.validate_certificates,
            allow_plaintext: self.allow_plaintext,
            connection_timeout_secs: self.connection_timeout_secs,
            pool_max_size: self.pool_max_size,
            user_base_dn: self
                .user_base_dn
                .ok_or_else(|| LdapError::config("user_base_dn is required"))?,
            group_base_dn: self
                .group_base_dn
                .ok_or_else(|| LdapError::config("group_base_dn is required"))?,
            attribute_map: self.attribute_map,
            schema_overrides: self.schema_overrides,
            flags: self.flags,
            page_size: self.page_size,
            range_size: self.range_size,
            unpaged_result_ceiling: self
                .unpaged_result_ceiling
                .unwrap_or(10 * self.page_size),
        };

        config.validate()?;

        Ok(config)
    }
}
