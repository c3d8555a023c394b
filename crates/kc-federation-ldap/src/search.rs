//! LDAP search operations.
//!
//! [`DirectoryEntry`] is the parsed form of one search result entry.
//! [`SearchEngine`] issues searches through a borrowed connection, owns the
//! paged-search capability of the identity source, and reassembles
//! multi-valued attributes the server hands out in ranges.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

use ldap3::SearchEntry;

use crate::config::{LdapConfig, SearchScope};
use crate::error::{LdapError, LdapResult};
use crate::transport::{DirectoryConnection, SearchRequest};

// ============================================================================
// Directory Entry
// ============================================================================

/// Represents an LDAP entry with parsed attributes.
///
/// Attribute names compare case-insensitively, as they do on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    dn: String,
    attributes: HashMap<String, Vec<String>>,
    binary_attributes: HashMap<String, Vec<Vec<u8>>>,
}

/// One window of a ranged attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangedValues<'a> {
    /// First index in the window.
    pub start: usize,
    /// Last index, `None` for the final window (`start-*`).
    pub end: Option<usize>,
    /// Values of this window.
    pub values: &'a [String],
}

impl DirectoryEntry {
    /// Creates an empty entry.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Self::default()
        }
    }

    /// Creates a new LDAP entry from search result.
    #[must_use]
    pub fn from_search_entry(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attributes: entry.attrs,
            binary_attributes: entry.bin_attrs,
        }
    }

    /// Adds string values.
    #[must_use]
    pub fn with_values<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .entry(name.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Adds a binary value.
    #[must_use]
    pub fn with_binary(mut self, name: impl Into<String>, value: Vec<u8>) -> Self {
        self.binary_attributes
            .entry(name.into())
            .or_default()
            .push(value);
        self
    }

    /// Distinguished Name.
    #[must_use]
    pub fn dn(&self) -> &str {
        &self.dn
    }

    fn lookup<'a, T>(map: &'a HashMap<String, Vec<T>>, name: &str) -> Option<&'a Vec<T>> {
        map.get(name).or_else(|| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    /// All string values of an attribute; empty when absent.
    #[must_use]
    pub fn values(&self, name: &str) -> &[String] {
        Self::lookup(&self.attributes, name).map_or(&[][..], Vec::as_slice)
    }

    /// First value.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    /// Last value.
    #[must_use]
    pub fn last(&self, name: &str) -> Option<&str> {
        self.values(name).last().map(String::as_str)
    }

    /// Number of values, string or binary.
    #[must_use]
    pub fn value_count(&self, name: &str) -> usize {
        self.values(name).len()
            + Self::lookup(&self.binary_attributes, name).map_or(0, Vec::len)
    }

    /// Checks if the entry has an attribute.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.value_count(name) > 0
    }

    /// First value as bytes, binary or textual.
    #[must_use]
    pub fn binary(&self, name: &str) -> Option<&[u8]> {
        Self::lookup(&self.binary_attributes, name)
            .and_then(|v| v.first())
            .map(Vec::as_slice)
            .or_else(|| self.first(name).map(str::as_bytes))
    }

    /// All binary values of an attribute.
    #[must_use]
    pub fn binary_values(&self, name: &str) -> &[Vec<u8>] {
        Self::lookup(&self.binary_attributes, name).map_or(&[][..], Vec::as_slice)
    }

    /// First value parsed as an integer.
    pub fn integer(&self, name: &str) -> LdapResult<Option<i64>> {
        self.first(name)
            .map(|v| {
                v.trim()
                    .parse::<i64>()
                    .map_err(|e| LdapError::invalid_value(name, e.to_string()))
            })
            .transpose()
    }

    /// Attribute names present on the entry.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .keys()
            .chain(self.binary_attributes.keys())
            .map(String::as_str)
    }

    /// Window of `attribute` returned under `attribute;range=start-end`.
    #[must_use]
    pub fn ranged(&self, attribute: &str) -> Option<RangedValues<'_>> {
        let prefix = format!("{};range=", attribute.to_ascii_lowercase());
        self.attributes.iter().find_map(|(name, values)| {
            let lower = name.to_ascii_lowercase();
            let range = lower.strip_prefix(&prefix)?;
            let (start, end) = range.split_once('-')?;
            let start = start.parse().ok()?;
            let end = if end == "*" {
                None
            } else {
                Some(end.parse().ok()?)
            };
            Some(RangedValues {
                start,
                end,
                values,
            })
        })
    }
}

// ============================================================================
// Paged Capability
// ============================================================================

/// Whether the directory honors the paged results control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PagedCapability {
    /// Not yet probed.
    Unknown = 0,
    /// Paged searches work.
    Supported = 1,
    /// Server rejects the paging control.
    Unsupported = 2,
}

impl PagedCapability {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Supported,
            2 => Self::Unsupported,
            _ => Self::Unknown,
        }
    }
}

/// Capability state that moves from `Unknown` at most once.
#[derive(Debug)]
pub struct SearchCapability {
    state: AtomicU8,
}

impl SearchCapability {
    /// Starts as `Unknown`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(PagedCapability::Unknown as u8),
        }
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> PagedCapability {
        PagedCapability::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Records a probe outcome. Returns `false` if another probe won.
    pub fn settle(&self, outcome: PagedCapability) -> bool {
        self.state
            .compare_exchange(
                PagedCapability::Unknown as u8,
                outcome as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for SearchCapability {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Search Engine
// ============================================================================

/// Search helper bound to one identity source.
#[derive(Debug)]
pub struct SearchEngine {
    capability: SearchCapability,
    page_size: usize,
    range_size: usize,
    unpaged_ceiling: usize,
}

impl SearchEngine {
    /// Creates an engine.
    #[must_use]
    pub const fn new(page_size: usize, range_size: usize, unpaged_ceiling: usize) -> Self {
        Self {
            capability: SearchCapability::new(),
            page_size,
            range_size,
            unpaged_ceiling,
        }
    }

    /// Creates an engine from the identity-source configuration.
    #[must_use]
    pub fn from_config(config: &LdapConfig) -> Self {
        Self::new(
            config.page_size,
            config.range_size,
            config.unpaged_result_ceiling,
        )
    }

    /// Starts from a known capability instead of probing.
    #[must_use]
    pub fn with_capability(self, capability: PagedCapability) -> Self {
        self.capability.settle(capability);
        self
    }

    /// Current paged capability.
    #[must_use]
    pub fn capability(&self) -> PagedCapability {
        self.capability.get()
    }

    /// Single-request search.
    pub async fn search(
        &self,
        conn: &mut dyn DirectoryConnection,
        request: &SearchRequest,
    ) -> LdapResult<Vec<DirectoryEntry>> {
        tracing::debug!(base_dn = %request.base, filter = %request.filter, "LDAP search");
        conn.search(request).await
    }

    /// Search for potentially large result sets.
    ///
    /// `limit` of `None` is unbounded; `Some(0)` returns nothing without
    /// querying. The first call probes paging support; a server that
    /// rejects the control is searched unpaged from then on.
    pub async fn paged_search(
        &self,
        conn: &mut dyn DirectoryConnection,
        request: &SearchRequest,
        limit: Option<usize>,
    ) -> LdapResult<Vec<DirectoryEntry>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }

        tracing::debug!(
            base_dn = %request.base,
            filter = %request.filter,
            capability = ?self.capability(),
            "LDAP paged search"
        );

        match self.capability() {
            PagedCapability::Supported => conn.paged_search(request, self.page_size, limit).await,
            PagedCapability::Unsupported => self.unpaged_search(conn, request, limit).await,
            PagedCapability::Unknown => {
                match conn.paged_search(request, self.page_size, limit).await {
                    Ok(entries) => {
                        self.capability.settle(PagedCapability::Supported);
                        Ok(entries)
                    }
                    Err(e) if e.is_capability_rejection() => {
                        tracing::warn!(
                            base_dn = %request.base,
                            "Directory rejected paged results control; falling back to unpaged searches"
                        );
                        self.capability.settle(PagedCapability::Unsupported);
                        self.unpaged_search(conn, request, limit).await
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn unpaged_search(
        &self,
        conn: &mut dyn DirectoryConnection,
        request: &SearchRequest,
        limit: Option<usize>,
    ) -> LdapResult<Vec<DirectoryEntry>> {
        let size_limit = limit.unwrap_or(self.unpaged_ceiling.saturating_add(1));
        let request = request.clone().with_size_limit(size_limit);

        let mut entries = conn.search(&request).await.map_err(|e| match e {
            LdapError::SizeLimitExceeded { .. } if limit.is_none() => {
                LdapError::SizeLimitExceeded {
                    limit: self.unpaged_ceiling,
                }
            }
            other => other,
        })?;

        match limit {
            None if entries.len() > self.unpaged_ceiling => {
                tracing::warn!(
                    base_dn = %request.base,
                    filter = %request.filter,
                    ceiling = self.unpaged_ceiling,
                    "Unpaged search exceeded result ceiling"
                );
                Err(LdapError::SizeLimitExceeded {
                    limit: self.unpaged_ceiling,
                })
            }
            Some(limit) => {
                entries.truncate(limit);
                Ok(entries)
            }
            None => Ok(entries),
        }
    }

    /// Reads every value of `attribute` on `dn`, following server ranges.
    ///
    /// Windows of `range_size` are requested until the server answers with
    /// a final `start-*` window or stops returning the attribute.
    pub async fn ranged_values(
        &self,
        conn: &mut dyn DirectoryConnection,
        dn: &str,
        attribute: &str,
    ) -> LdapResult<Vec<String>> {
        let mut values = Vec::new();
        let mut start = 0usize;

        loop {
            let end = start + self.range_size - 1;
            let ranged_attribute = format!("{attribute};range={start}-{end}");
            let request = SearchRequest::new(
                dn,
                SearchScope::Base,
                "(objectClass=*)",
                &[ranged_attribute.as_str()],
            );

            let entries = conn.search(&request).await?;
            let Some(entry) = entries.first() else {
                break;
            };

            match entry.ranged(attribute) {
                Some(window) => {
                    values.extend(window.values.iter().cloned());
                    match window.end {
                        Some(window_end) if window_end >= start => start = window_end + 1,
                        _ => break,
                    }
                }
                None => {
                    if start == 0 {
                        values.extend(entry.values(attribute).iter().cloned());
                    }
                    break;
                }
            }
        }

        tracing::debug!(dn, attribute, count = values.len(), "Ranged retrieval complete");
        Ok(values)
    }
}
