//! In-memory directory for tests.
//!
//! [`MemoryDirectory`] implements [`DirectoryConnector`] over a list of
//! entries. It evaluates the filter subset the schema mappings produce
//! (`&`, `|`, `!`, equality, presence, substrings and the in-chain
//! matching rule), honors size limits, serves ranged attributes in
//! fixed windows and can be told to reject the paging control.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::SearchScope;
use crate::error::{LdapError, LdapResult};
use crate::schema::MATCHING_RULE_IN_CHAIN;
use crate::search::DirectoryEntry;
use crate::topology::{DomainControllerInfo, TopologyDiscovery};
use crate::transport::{
    BindCredentials, DirectoryConnection, DirectoryConnector, SearchRequest, NO_ATTRIBUTES,
};
use crate::translator::Sid;

/// Operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    /// Plain searches served.
    pub searches: usize,
    /// Paged searches served.
    pub paged_searches: usize,
    /// Paged searches rejected.
    pub paging_rejections: usize,
    /// Successful connects.
    pub connects: usize,
    /// Successful binds, including the connect bind.
    pub binds: usize,
    /// Connections closed.
    pub closes: usize,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<DirectoryEntry>,
    passwords: HashMap<String, String>,
    refused: HashSet<String>,
    range_window: Option<usize>,
    reject_paging: bool,
    epoch: u64,
    stats: DirectoryStats,
    connect_attempts: Vec<String>,
}

/// Shared in-memory directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<Inner>>,
}

fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| rdn.trim().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

impl MemoryDirectory {
    /// Empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves multi-valued attributes in windows of `window` values.
    #[must_use]
    pub fn with_range_window(self, window: usize) -> Self {
        self.inner.lock().range_window = Some(window.max(1));
        self
    }

    /// Rejects the paged results control from now on.
    pub fn reject_paging(&self) {
        self.inner.lock().reject_paging = true;
    }

    /// Adds an entry.
    pub fn add(&self, entry: DirectoryEntry) {
        self.inner.lock().entries.push(entry);
    }

    /// Removes the entry with `dn`.
    pub fn remove(&self, dn: &str) {
        let dn = normalize_dn(dn);
        self.inner
            .lock()
            .entries
            .retain(|e| normalize_dn(e.dn()) != dn);
    }

    /// Registers the password for a bind identity.
    pub fn set_password(&self, bind_identity: &str, password: &str) {
        self.inner
            .lock()
            .passwords
            .insert(bind_identity.to_ascii_lowercase(), password.to_string());
    }

    /// Refuses connections to `url`.
    pub fn refuse(&self, url: &str) {
        self.inner.lock().refused.insert(url.to_ascii_lowercase());
    }

    /// Accepts connections to `url` again.
    pub fn accept(&self, url: &str) {
        self.inner.lock().refused.remove(&url.to_ascii_lowercase());
    }

    /// Breaks every open connection.
    pub fn sever_connections(&self) {
        self.inner.lock().epoch += 1;
    }

    /// Connection bound without credentials checks.
    #[must_use]
    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            directory: self.clone(),
            epoch: self.inner.lock().epoch,
            closed: false,
        }
    }

    /// Operation counters.
    #[must_use]
    pub fn stats(&self) -> DirectoryStats {
        self.inner.lock().stats
    }

    /// URLs passed to `connect`, in order.
    #[must_use]
    pub fn connect_attempts(&self) -> Vec<String> {
        self.inner.lock().connect_attempts.clone()
    }

    fn check_password(inner: &Inner, credentials: &BindCredentials) -> LdapResult<()> {
        match inner.passwords.get(&credentials.dn.to_ascii_lowercase()) {
            Some(expected) if expected != credentials.password() => Err(LdapError::InvalidCredentials),
            _ if credentials.password().is_empty() => Err(LdapError::InvalidCredentials),
            _ => Ok(()),
        }
    }

    fn evaluate(&self, request: &SearchRequest) -> LdapResult<Vec<DirectoryEntry>> {
        let inner = self.inner.lock();
        let filter = Filter::parse(&request.filter)?;
        let base = normalize_dn(&request.base);

        if request.scope == SearchScope::Base
            && !inner.entries.iter().any(|e| normalize_dn(e.dn()) == base)
        {
            return Err(LdapError::NoSuchObject(request.base.clone()));
        }

        let index: HashMap<String, &DirectoryEntry> = inner
            .entries
            .iter()
            .map(|e| (normalize_dn(e.dn()), e))
            .collect();

        let mut results: Vec<DirectoryEntry> = inner
            .entries
            .iter()
            .filter(|e| in_scope(&normalize_dn(e.dn()), &base, request.scope))
            .filter(|e| filter.matches(e, &index))
            .map(|e| project(e, request, inner.range_window))
            .collect();

        if let Some(limit) = request.size_limit {
            results.truncate(limit);
        }
        Ok(results)
    }
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => dn == base,
        SearchScope::OneLevel => dn.split_once(',').is_some_and(|(_, parent)| parent == base),
        SearchScope::Subtree => dn == base || dn.ends_with(&format!(",{base}")),
    }
}

fn project(entry: &DirectoryEntry, request: &SearchRequest, window: Option<usize>) -> DirectoryEntry {
    let wire = request.wire_attributes();
    let mut projected = DirectoryEntry::new(entry.dn());
    if wire.iter().any(|a| a == NO_ATTRIBUTES) {
        return projected;
    }

    let names: Vec<String> = if wire.iter().any(|a| a == "*") {
        let mut names: Vec<String> = entry.attribute_names().map(ToString::to_string).collect();
        names.sort();
        names.dedup();
        names
    } else {
        wire
    };

    for name in names {
        if let Some((attribute, range)) = name.split_once(";range=") {
            projected = project_range(projected, entry, attribute, range, window);
            continue;
        }

        let values = entry.values(&name);
        match window {
            Some(w) if values.len() > w => {
                projected = projected.with_values(
                    format!("{name};range=0-{}", w - 1),
                    values[..w].iter().cloned(),
                );
            }
            _ if !values.is_empty() => {
                projected = projected.with_values(name.clone(), values.iter().cloned());
            }
            _ => {}
        }
        for bytes in entry.binary_values(&name) {
            projected = projected.with_binary(name.clone(), bytes.clone());
        }
    }
    projected
}

fn project_range(
    projected: DirectoryEntry,
    entry: &DirectoryEntry,
    attribute: &str,
    range: &str,
    window: Option<usize>,
) -> DirectoryEntry {
    let values = entry.values(attribute);
    let Some((start, end)) = range.split_once('-') else {
        return projected;
    };
    let Ok(start) = start.parse::<usize>() else {
        return projected;
    };
    if values.is_empty() || start >= values.len() {
        return projected;
    }

    let requested_end = end.parse::<usize>().unwrap_or(usize::MAX);
    let end = window
        .map_or(requested_end, |w| requested_end.min(start + w - 1))
        .min(values.len() - 1);

    if end + 1 >= values.len() {
        projected.with_values(
            format!("{attribute};range={start}-*"),
            values[start..].iter().cloned(),
        )
    } else {
        projected.with_values(
            format!("{attribute};range={start}-{end}"),
            values[start..=end].iter().cloned(),
        )
    }
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, String),
    Substring(String, Vec<String>),
    InChain(String, String),
}

impl Filter {
    fn parse(input: &str) -> LdapResult<Self> {
        let chars: Vec<char> = input.trim().chars().collect();
        let (filter, rest) = Self::parse_at(&chars, 0)?;
        if rest != chars.len() {
            return Err(LdapError::Protocol {
                code: 87,
                message: format!("trailing input in filter: {input}"),
            });
        }
        Ok(filter)
    }

    fn parse_at(chars: &[char], pos: usize) -> LdapResult<(Self, usize)> {
        let bad = || LdapError::Protocol {
            code: 87,
            message: format!(
                "malformed filter near: {}",
                chars.iter().skip(pos).collect::<String>()
            ),
        };
        if chars.get(pos) != Some(&'(') {
            return Err(bad());
        }
        match chars.get(pos + 1) {
            Some('&') | Some('|') => {
                let mut children = Vec::new();
                let mut cursor = pos + 2;
                while chars.get(cursor) == Some(&'(') {
                    let (child, next) = Self::parse_at(chars, cursor)?;
                    children.push(child);
                    cursor = next;
                }
                if chars.get(cursor) != Some(&')') {
                    return Err(bad());
                }
                let filter = if chars[pos + 1] == '&' {
                    Self::And(children)
                } else {
                    Self::Or(children)
                };
                Ok((filter, cursor + 1))
            }
            Some('!') => {
                let (child, next) = Self::parse_at(chars, pos + 2)?;
                if chars.get(next) != Some(&')') {
                    return Err(bad());
                }
                Ok((Self::Not(Box::new(child)), next + 1))
            }
            Some(_) => {
                let close = chars[pos..]
                    .iter()
                    .position(|c| *c == ')')
                    .map(|offset| pos + offset)
                    .ok_or_else(bad)?;
                let item: String = chars[pos + 1..close].iter().collect();
                Ok((Self::parse_item(&item).ok_or_else(bad)?, close + 1))
            }
            None => Err(bad()),
        }
    }

    fn parse_item(item: &str) -> Option<Self> {
        let (lhs, value) = item.split_once('=')?;
        if let Some(attribute) = lhs.strip_suffix(&format!(":{MATCHING_RULE_IN_CHAIN}:")) {
            return Some(Self::InChain(attribute.to_string(), unescape(value)?));
        }
        if value == "*" {
            return Some(Self::Present(lhs.to_string()));
        }
        if value.contains('*') {
            let parts = value
                .split('*')
                .map(unescape)
                .collect::<Option<Vec<_>>>()?;
            return Some(Self::Substring(lhs.to_string(), parts));
        }
        Some(Self::Equal(lhs.to_string(), unescape(value)?))
    }

    fn matches(&self, entry: &DirectoryEntry, index: &HashMap<String, &DirectoryEntry>) -> bool {
        match self {
            Self::And(children) => children.iter().all(|f| f.matches(entry, index)),
            Self::Or(children) => children.iter().any(|f| f.matches(entry, index)),
            Self::Not(child) => !child.matches(entry, index),
            Self::Present(attribute) => entry.has(attribute),
            Self::Equal(attribute, expected) => comparable_values(entry, attribute)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(expected) || dn_equal(v, expected)),
            Self::Substring(attribute, parts) => comparable_values(entry, attribute)
                .iter()
                .any(|v| substring_match(&v.to_lowercase(), parts)),
            Self::InChain(attribute, target) => in_chain(entry, attribute, target, index),
        }
    }
}

fn dn_equal(a: &str, b: &str) -> bool {
    a.contains('=') && normalize_dn(a) == normalize_dn(b)
}

fn comparable_values(entry: &DirectoryEntry, attribute: &str) -> Vec<String> {
    let mut values: Vec<String> = entry.values(attribute).to_vec();
    values.extend(entry.binary_values(attribute).iter().map(|bytes| {
        Sid::from_bytes(bytes).map_or_else(|_| hex::encode(bytes), |sid| sid.to_string())
    }));
    values
}

fn substring_match(value: &str, parts: &[String]) -> bool {
    let parts: Vec<String> = parts.iter().map(|p| p.to_lowercase()).collect();
    let (Some(first), Some(last)) = (parts.first(), parts.last()) else {
        return false;
    };
    if !value.starts_with(first.as_str()) {
        return false;
    }
    let mut cursor = first.len();
    for middle in &parts[1..parts.len() - 1] {
        match value[cursor..].find(middle.as_str()) {
            Some(found) => cursor += found + middle.len(),
            None => return false,
        }
    }
    value.len() >= cursor + last.len() && value.ends_with(last.as_str())
}

fn in_chain(
    entry: &DirectoryEntry,
    attribute: &str,
    target: &str,
    index: &HashMap<String, &DirectoryEntry>,
) -> bool {
    let target = normalize_dn(target);
    let mut visited = HashSet::new();
    let mut queue: VecDeque<String> = entry
        .values(attribute)
        .iter()
        .map(|v| normalize_dn(v))
        .collect();

    while let Some(dn) = queue.pop_front() {
        if dn == target {
            return true;
        }
        if !visited.insert(dn.clone()) {
            continue;
        }
        if let Some(nested) = index.get(&dn) {
            queue.extend(nested.values(attribute).iter().map(|v| normalize_dn(v)));
        }
    }
    false
}

fn unescape(value: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(value.len());
    let raw = value.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            let pair = value.get(i + 1..i + 3)?;
            bytes.extend(hex::decode(pair).ok()?);
            i += 3;
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(bytes).ok()
}

// ============================================================================
// Connector and connection
// ============================================================================

#[async_trait]
impl DirectoryConnector for MemoryDirectory {
    async fn connect(
        &self,
        url: &str,
        credentials: &BindCredentials,
    ) -> LdapResult<Box<dyn DirectoryConnection>> {
        let epoch = {
            let mut inner = self.inner.lock();
            inner.connect_attempts.push(url.to_string());
            if inner.refused.contains(&url.to_ascii_lowercase()) {
                return Err(LdapError::connection(format!("connection refused: {url}")));
            }
            Self::check_password(&inner, credentials)?;
            inner.stats.connects += 1;
            inner.stats.binds += 1;
            inner.epoch
        };

        Ok(Box::new(MemoryConnection {
            directory: self.clone(),
            epoch,
            closed: false,
        }))
    }
}

/// Connection to a [`MemoryDirectory`].
#[derive(Debug)]
pub struct MemoryConnection {
    directory: MemoryDirectory,
    epoch: u64,
    closed: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> LdapResult<()> {
        if self.closed {
            return Err(LdapError::connection("connection closed"));
        }
        if self.directory.inner.lock().epoch != self.epoch {
            return Err(LdapError::connection("connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryConnection for MemoryConnection {
    async fn search(&mut self, request: &SearchRequest) -> LdapResult<Vec<DirectoryEntry>> {
        self.ensure_open()?;
        self.directory.inner.lock().stats.searches += 1;
        self.directory.evaluate(request)
    }

    async fn paged_search(
        &mut self,
        request: &SearchRequest,
        _page_size: usize,
        limit: Option<usize>,
    ) -> LdapResult<Vec<DirectoryEntry>> {
        self.ensure_open()?;
        {
            let mut inner = self.directory.inner.lock();
            if inner.reject_paging {
                inner.stats.paging_rejections += 1;
                return Err(LdapError::UnavailableCriticalExtension(
                    "paged results control not supported".to_string(),
                ));
            }
            inner.stats.paged_searches += 1;
        }
        let mut entries = self.directory.evaluate(request)?;
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn bind(&mut self, credentials: &BindCredentials) -> LdapResult<()> {
        self.ensure_open()?;
        let mut inner = self.directory.inner.lock();
        MemoryDirectory::check_password(&inner, credentials)?;
        inner.stats.binds += 1;
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.directory.inner.lock().stats.closes += 1;
        }
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Topology discovery with a scripted answer.
#[derive(Debug, Default)]
pub struct StaticTopology {
    answer: Mutex<Option<DomainControllerInfo>>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl StaticTopology {
    /// Always answers `info`.
    #[must_use]
    pub fn new(info: DomainControllerInfo) -> Self {
        Self {
            answer: Mutex::new(Some(info)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self::default()
    }

    /// Replaces the answer.
    pub fn set_answer(&self, info: Option<DomainControllerInfo>) {
        *self.answer.lock() = info;
    }

    /// `(domain, force_rediscover)` of every call.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TopologyDiscovery for StaticTopology {
    async fn preferred_endpoint(
        &self,
        domain: &str,
        force_rediscover: bool,
    ) -> LdapResult<DomainControllerInfo> {
        self.calls.lock().push((domain.to_string(), force_rediscover));
        self.answer.lock().clone().ok_or_else(|| LdapError::Topology {
            domain: domain.to_string(),
            message: "no domain controller found".to_string(),
        })
    }
}
