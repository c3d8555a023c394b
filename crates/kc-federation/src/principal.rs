//! Principal value objects.
//!
//! Users and groups are built per request from a directory entry and are
//! immutable afterwards. Nothing in this module is persisted.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FederationError, FederationResult};

// ============================================================================
// Principal Identifier
// ============================================================================

/// Identifier of a user or group: account name plus domain.
///
/// Domains compare case-insensitively, so both parts are kept as given but
/// equality and hashing use the lowercase domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalId {
    name: String,
    domain: String,
}

impl PrincipalId {
    /// Creates a principal identifier.
    #[must_use]
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }

    /// Parses `name@domain` or `DOMAIN\name`.
    pub fn parse(value: &str) -> FederationResult<Self> {
        if let Some((domain, name)) = value.split_once('\\') {
            if !domain.is_empty() && !name.is_empty() {
                return Ok(Self::new(name, domain));
            }
        } else if let Some((name, domain)) = value.rsplit_once('@') {
            if !domain.is_empty() && !name.is_empty() {
                return Ok(Self::new(name, domain));
            }
        }
        Err(FederationError::invalid_principal(
            "expected name@domain or DOMAIN\\name",
            value,
        ))
    }

    /// Account name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Domain the principal lives in.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `name@domain` form.
    #[must_use]
    pub fn upn(&self) -> String {
        format!("{}@{}", self.name, self.domain)
    }

    /// `DOMAIN\name` form.
    #[must_use]
    pub fn netbios(&self) -> String {
        format!("{}\\{}", self.domain, self.name)
    }

    /// Checks whether the principal belongs to `domain`.
    #[must_use]
    pub fn is_in_domain(&self, domain: &str) -> bool {
        self.domain.eq_ignore_ascii_case(domain)
    }

    /// Returns the same account name in a different domain.
    #[must_use]
    pub fn with_domain(&self, domain: impl Into<String>) -> Self {
        Self::new(self.name.clone(), domain)
    }
}

impl PartialEq for PrincipalId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.domain.eq_ignore_ascii_case(&other.domain)
    }
}

impl Eq for PrincipalId {}

impl std::hash::Hash for PrincipalId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.domain.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

// ============================================================================
// Users
// ============================================================================

/// Descriptive user attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDetail {
    /// Email address.
    pub email: Option<String>,
    /// User principal name, native or synthesized.
    pub user_principal_name: Option<String>,
    /// Given name.
    pub first_name: Option<String>,
    /// Surname.
    pub last_name: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Last password change, seconds since the Unix epoch.
    pub pwd_last_set: Option<i64>,
    /// Maximum password age in seconds.
    pub pwd_lifetime: Option<i64>,
}

/// A user resolved from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonUser {
    /// Canonical identifier in the store domain.
    pub id: PrincipalId,
    /// Same account in the configured alias domain.
    pub alias: Option<PrincipalId>,
    /// Stable directory identifier (entry UUID or SID string).
    pub object_id: Option<String>,
    /// Descriptive attributes.
    pub detail: PersonDetail,
    /// Account is disabled.
    pub disabled: bool,
    /// Account is locked out.
    pub locked: bool,
}

/// Normalized account status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    /// Account is disabled.
    pub disabled: bool,
    /// Account is locked out.
    pub locked: bool,
    /// Password has expired.
    pub password_expired: bool,
}

impl AccountStatus {
    /// An account is active when it is not disabled.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.disabled
    }
}

// ============================================================================
// Groups
// ============================================================================

/// Descriptive group attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupDetail {
    /// Free-form description.
    pub description: Option<String>,
}

/// A group resolved from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Group {
    /// Canonical identifier.
    pub id: PrincipalId,
    /// Same group in the configured alias domain.
    pub alias: Option<PrincipalId>,
    /// Stable directory identifier.
    pub object_id: Option<String>,
    /// Descriptive attributes, present when requested.
    pub detail: Option<GroupDetail>,
}

/// Result of a nested or direct group lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalGroupLookupInfo {
    /// Distinct groups the principal belongs to.
    pub groups: HashSet<Group>,
    /// Object identifier of the principal the lookup started from.
    pub principal_object_id: Option<String>,
}

// ============================================================================
// Search and attribute results
// ============================================================================

/// Combined user and group search result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Matching users.
    pub users: Vec<PersonUser>,
    /// Matching groups.
    pub groups: Vec<Group>,
}

/// One resolved attribute with its values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValuePair {
    /// Logical attribute name as requested.
    pub name: String,
    /// Values, possibly empty.
    pub values: Vec<String>,
}

impl AttributeValuePair {
    /// Creates an attribute/value pair.
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}
