//! Principal translation.
//!
//! Builds [`PersonUser`] and [`Group`] values from directory entries,
//! decodes binary security identifiers, and converts Active Directory
//! timestamps.

use std::fmt;
use std::sync::Arc;

use kc_federation::{AccountStatus, Group, GroupDetail, PersonDetail, PersonUser, PrincipalId};

use crate::config::SchemaKind;
use crate::error::{LdapError, LdapResult};
use crate::schema::{AttributeId, SchemaMapping};
use crate::search::DirectoryEntry;

/// 100ns ticks between 1601-01-01 and 1970-01-01.
pub const FILETIME_UNIX_OFFSET_TICKS: i64 = 116_444_736_000_000_000;

/// 100ns ticks per second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Converts a 1601-epoch tick count to Unix seconds.
#[must_use]
pub const fn filetime_to_unix_seconds(ticks: i64) -> i64 {
    ticks.saturating_sub(FILETIME_UNIX_OFFSET_TICKS) / TICKS_PER_SECOND
}

/// Converts a negative tick interval (`maxPwdAge`) to seconds.
///
/// `0` and `i64::MIN` both mean passwords never expire and yield `None`.
#[must_use]
pub const fn interval_ticks_to_seconds(ticks: i64) -> Option<i64> {
    match ticks.checked_neg() {
        Some(interval) if interval > 0 => Some(interval / TICKS_PER_SECOND),
        _ => None,
    }
}

/// `DC=` form of a dotted domain name.
#[must_use]
pub fn domain_dn(domain: &str) -> String {
    domain
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| format!("DC={p}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Dotted domain name from the `DC=` components of a DN.
#[must_use]
pub fn domain_from_dn(dn: &str) -> String {
    dn.split(',')
        .map(str::trim)
        .filter_map(|rdn| {
            let (attr, value) = rdn.split_once('=')?;
            attr.trim().eq_ignore_ascii_case("dc").then(|| value.trim())
        })
        .collect::<Vec<_>>()
        .join(".")
}

// ============================================================================
// Security Identifiers
// ============================================================================

/// Binary security identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Decodes the binary form.
    pub fn from_bytes(bytes: &[u8]) -> LdapResult<Self> {
        if bytes.len() < 8 {
            return Err(LdapError::invalid_value("objectSid", "SID shorter than 8 bytes"));
        }
        let count = usize::from(bytes[1]);
        if bytes.len() != 8 + 4 * count {
            return Err(LdapError::invalid_value(
                "objectSid",
                format!("SID length {} does not match {count} sub-authorities", bytes.len()),
            ));
        }

        let authority = bytes[2..8]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        let sub_authorities = bytes[8..]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            revision: bytes[0],
            authority,
            sub_authorities,
        })
    }

    /// Parses the `S-1-5-21-...` string form.
    pub fn parse(value: &str) -> LdapResult<Self> {
        let invalid = || LdapError::invalid_value("objectSid", format!("not a SID: {value}"));
        let mut parts = value.split('-');
        if !parts.next().is_some_and(|p| p.eq_ignore_ascii_case("S")) {
            return Err(invalid());
        }
        let revision = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let authority = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let sub_authorities = parts
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<LdapResult<Vec<_>>>()?;
        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Encodes the binary form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + 4 * self.sub_authorities.len());
        bytes.push(self.revision);
        bytes.push(u8::try_from(self.sub_authorities.len()).unwrap_or(u8::MAX));
        bytes.extend_from_slice(&self.authority.to_be_bytes()[2..]);
        for sub in &self.sub_authorities {
            bytes.extend_from_slice(&sub.to_le_bytes());
        }
        bytes
    }

    /// Same SID with the last sub-authority (the RID) replaced.
    #[must_use]
    pub fn with_rid(&self, rid: u32) -> Self {
        let mut sid = self.clone();
        if let Some(last) = sid.sub_authorities.last_mut() {
            *last = rid;
        }
        sid
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Translator
// ============================================================================

/// Password timestamps returned with extended user info.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendedUserInfo {
    /// Last password change, Unix seconds.
    pub pwd_last_set: Option<i64>,
    /// Maximum password age in seconds.
    pub pwd_lifetime: Option<i64>,
}

/// Builds principals for one identity source.
#[derive(Debug, Clone)]
pub struct PrincipalTranslator {
    schema: Arc<dyn SchemaMapping>,
    domain: String,
    alias: Option<String>,
}

impl PrincipalTranslator {
    /// Creates a translator.
    #[must_use]
    pub fn new(schema: Arc<dyn SchemaMapping>, domain: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            schema,
            domain: domain.into(),
            alias: alias.filter(|a| !a.trim().is_empty()),
        }
    }

    /// Store domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Store alias.
    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Maps a principal in the store domain or its alias to the store domain.
    pub fn normalize(&self, principal: &PrincipalId) -> LdapResult<PrincipalId> {
        if principal.is_in_domain(&self.domain) {
            return Ok(principal.clone());
        }
        if self.alias.as_deref().is_some_and(|a| principal.is_in_domain(a)) {
            return Ok(principal.with_domain(self.domain.clone()));
        }
        tracing::error!(
            principal = %principal,
            domain = %self.domain,
            "Principal domain matches neither the store domain nor its alias"
        );
        Err(LdapError::invalid_principal(
            "domain matches neither the store domain nor its alias",
            principal.upn(),
        ))
    }

    /// Attributes to request for users.
    #[must_use]
    pub fn user_attributes(&self, extended: bool) -> Vec<&str> {
        use AttributeId as A;
        let mut ids = vec![
            A::UserAccountName,
            A::UserPrincipalName,
            A::UserObjectId,
            A::UserFirstName,
            A::UserLastName,
            A::UserEmail,
            A::UserDescription,
            A::UserAccountControl,
            A::UserLockoutTime,
        ];
        if extended {
            ids.extend([A::UserPwdLastSet, A::UserResultantPso]);
        }
        ids.into_iter()
            .filter_map(|id| self.schema.attribute(id))
            .collect()
    }

    /// Attributes to request for groups.
    #[must_use]
    pub fn group_attributes(&self) -> Vec<&str> {
        use AttributeId as A;
        [A::GroupAccountName, A::GroupObjectId, A::GroupDescription]
            .into_iter()
            .filter_map(|id| self.schema.attribute(id))
            .collect()
    }

    /// Domain an entry belongs to.
    ///
    /// Active Directory entries carry it in their DN; generic stores serve
    /// a single domain.
    #[must_use]
    pub fn entry_domain(&self, entry: &DirectoryEntry) -> String {
        if self.schema.kind() == SchemaKind::ActiveDirectory {
            let domain = domain_from_dn(entry.dn());
            if !domain.is_empty() {
                return domain;
            }
        }
        self.domain.clone()
    }

    fn alias_for(&self, name: &str, entry_domain: &str) -> Option<PrincipalId> {
        let alias = self.alias.as_deref()?;
        entry_domain
            .eq_ignore_ascii_case(&self.domain)
            .then(|| PrincipalId::new(name, alias))
    }

    /// Mandatory single-valued account name.
    pub fn account_name(&self, entry: &DirectoryEntry, id: AttributeId) -> LdapResult<String> {
        let attribute = self.schema.required_attribute(id)?;
        match entry.values(attribute) {
            [] => Err(LdapError::invalid_principal(
                format!("entry has no {attribute} value"),
                entry.dn(),
            )),
            [name] => Ok(name.clone()),
            [first, ..] => Err(LdapError::invalid_principal(
                format!("entry has multiple {attribute} values"),
                format!("{first}@{}", self.entry_domain(entry)),
            )),
        }
    }

    /// Object id of an entry: SID string or native id.
    pub fn object_id(&self, entry: &DirectoryEntry, id: AttributeId) -> LdapResult<Option<String>> {
        let Some(attribute) = self.schema.attribute(id) else {
            return Ok(None);
        };
        if entry.value_count(attribute) > 1 {
            return Err(LdapError::invalid_principal(
                format!("entry has multiple {attribute} values"),
                entry.dn(),
            ));
        }
        if self.schema.object_id_is_sid() {
            return entry
                .binary(attribute)
                .map(|bytes| Sid::from_bytes(bytes).map(|sid| sid.to_string()))
                .transpose();
        }
        Ok(entry.first(attribute).map(ToString::to_string))
    }

    /// Native UPN, or `name@domain` when the schema has none.
    #[must_use]
    pub fn upn(&self, entry: &DirectoryEntry, name: &str) -> Option<String> {
        match self.schema.attribute(AttributeId::UserPrincipalName) {
            Some(attribute) => entry.first(attribute).map(ToString::to_string),
            None => Some(format!("{name}@{}", self.entry_domain(entry))),
        }
    }

    fn optional(&self, entry: &DirectoryEntry, id: AttributeId) -> Option<String> {
        self.schema
            .attribute(id)
            .and_then(|a| entry.first(a))
            .map(ToString::to_string)
    }

    /// Builds a user.
    pub fn build_user(
        &self,
        entry: &DirectoryEntry,
        status: AccountStatus,
        extended: Option<ExtendedUserInfo>,
    ) -> LdapResult<PersonUser> {
        let name = self.account_name(entry, AttributeId::UserAccountName)?;
        let domain = self.entry_domain(entry);
        let extended = extended.unwrap_or_default();

        let detail = PersonDetail {
            email: self.optional(entry, AttributeId::UserEmail),
            user_principal_name: self.upn(entry, &name),
            first_name: self.optional(entry, AttributeId::UserFirstName),
            last_name: self.optional(entry, AttributeId::UserLastName),
            description: self
                .schema
                .attribute(AttributeId::UserDescription)
                .and_then(|a| entry.last(a))
                .map(ToString::to_string),
            pwd_last_set: extended.pwd_last_set,
            pwd_lifetime: extended.pwd_lifetime,
        };

        Ok(PersonUser {
            alias: self.alias_for(&name, &domain),
            object_id: self.object_id(entry, AttributeId::UserObjectId)?,
            id: PrincipalId::new(name, domain),
            detail,
            disabled: status.disabled,
            locked: status.locked,
        })
    }

    /// Builds a group.
    pub fn build_group(&self, entry: &DirectoryEntry, with_detail: bool) -> LdapResult<Group> {
        let name = self.account_name(entry, AttributeId::GroupAccountName)?;
        let domain = self.entry_domain(entry);
        let detail = with_detail.then(|| GroupDetail {
            description: self
                .schema
                .attribute(AttributeId::GroupDescription)
                .and_then(|a| entry.last(a))
                .map(ToString::to_string),
        });

        Ok(Group {
            alias: self.alias_for(&name, &domain),
            object_id: self.object_id(entry, AttributeId::GroupObjectId)?,
            id: PrincipalId::new(name, domain),
            detail,
        })
    }
}
