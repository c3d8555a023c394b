//! Schema mapping.
//!
//! A schema mapping turns logical attribute ids and lookup operations into
//! concrete attribute names and filter templates for one directory flavor.
//! Mappings are pure tables: built once per identity source, never mutated,
//! and free of I/O.
//!
//! ## Security
//!
//! Every value substituted into a filter template passes through
//! [`ldap_escape`]. Templates are only ever completed through
//! [`SchemaMapping::build_filter`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{LdapConfig, SchemaKind};
use crate::error::{LdapError, LdapResult};

/// Substitution slot in filter templates.
pub const SLOT: &str = "%s";

/// Matching rule OID for transitive group membership.
pub const MATCHING_RULE_IN_CHAIN: &str = "1.2.840.113556.1.4.1941";

// ============================================================================
// Logical Ids
// ============================================================================

/// Logical attribute ids resolved by a schema mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeId {
    /// Account name (login name).
    UserAccountName,
    /// Native user principal name.
    UserPrincipalName,
    /// Stable object identifier.
    UserObjectId,
    /// Given name.
    UserFirstName,
    /// Surname.
    UserLastName,
    /// Email address.
    UserEmail,
    /// Description.
    UserDescription,
    /// Display name.
    UserDisplayName,
    /// Account-control bit field.
    UserAccountControl,
    /// Lockout timestamp.
    UserLockoutTime,
    /// Primary group relative id.
    UserPrimaryGroupId,
    /// Last password change.
    UserPwdLastSet,
    /// Direct group memberships held on the user.
    UserMemberOf,
    /// Resultant password settings object.
    UserResultantPso,
    /// Group account name.
    GroupAccountName,
    /// Group member list.
    GroupMembers,
    /// Group object identifier.
    GroupObjectId,
    /// Group description.
    GroupDescription,
    /// Lockout duration on the password policy object.
    PasswordPolicyLockoutDuration,
    /// Maximum password age on a password settings object.
    PasswordSettingsMaxAge,
    /// Maximum password age on the domain object.
    DomainMaxPwdAge,
}

impl AttributeId {
    /// All logical ids.
    pub const ALL: [Self; 21] = [
        Self::UserAccountName,
        Self::UserPrincipalName,
        Self::UserObjectId,
        Self::UserFirstName,
        Self::UserLastName,
        Self::UserEmail,
        Self::UserDescription,
        Self::UserDisplayName,
        Self::UserAccountControl,
        Self::UserLockoutTime,
        Self::UserPrimaryGroupId,
        Self::UserPwdLastSet,
        Self::UserMemberOf,
        Self::UserResultantPso,
        Self::GroupAccountName,
        Self::GroupMembers,
        Self::GroupObjectId,
        Self::GroupDescription,
        Self::PasswordPolicyLockoutDuration,
        Self::PasswordSettingsMaxAge,
        Self::DomainMaxPwdAge,
    ];

    /// Configuration key of this id.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserAccountName => "user_account_name",
            Self::UserPrincipalName => "user_principal_name",
            Self::UserObjectId => "user_object_id",
            Self::UserFirstName => "user_first_name",
            Self::UserLastName => "user_last_name",
            Self::UserEmail => "user_email",
            Self::UserDescription => "user_description",
            Self::UserDisplayName => "user_display_name",
            Self::UserAccountControl => "user_account_control",
            Self::UserLockoutTime => "user_lockout_time",
            Self::UserPrimaryGroupId => "user_primary_group_id",
            Self::UserPwdLastSet => "user_pwd_last_set",
            Self::UserMemberOf => "user_member_of",
            Self::UserResultantPso => "user_resultant_pso",
            Self::GroupAccountName => "group_account_name",
            Self::GroupMembers => "group_members",
            Self::GroupObjectId => "group_object_id",
            Self::GroupDescription => "group_description",
            Self::PasswordPolicyLockoutDuration => "password_policy_lockout_duration",
            Self::PasswordSettingsMaxAge => "password_settings_max_age",
            Self::DomainMaxPwdAge => "domain_max_pwd_age",
        }
    }

    /// Ids every mapping must resolve.
    const fn is_required(self) -> bool {
        matches!(
            self,
            Self::UserAccountName
                | Self::UserObjectId
                | Self::GroupAccountName
                | Self::GroupObjectId
                | Self::GroupMembers
        )
    }
}

impl FromStr for AttributeId {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| LdapError::config(format!("unknown schema attribute id: {s}")))
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object classes referenced by filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    /// Users.
    User,
    /// Groups.
    Group,
    /// Lockout policy object.
    PasswordPolicy,
    /// Password settings object.
    PasswordSettings,
    /// Domain root object.
    Domain,
}

/// Lookup operations with a filter template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// Every user.
    AllUsers,
    /// User by account name.
    UserByAccountName,
    /// User by principal name.
    UserByUpn,
    /// User by object id.
    UserByObjectId,
    /// Users whose name attributes contain the value.
    UserByCriteria,
    /// User or group by account name.
    UserOrGroupByAccountName,
    /// Every group.
    AllGroups,
    /// Group by account name.
    GroupByAccountName,
    /// Group by object id.
    GroupByObjectId,
    /// Groups whose name or description contains the value.
    GroupByCriteria,
    /// Groups listing the value as a direct member.
    DirectParentGroups,
    /// Groups containing the value transitively (one query).
    NestedParentGroups,
    /// Lockout or password settings object.
    PasswordSettings,
    /// Domain root object.
    DomainObject,
}

/// Encoding of the lockout-time attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutTimeFormat {
    /// `yyyyMMddHHmmssZ` generalized time.
    GeneralizedTime,
    /// 100ns ticks since 1601, zero when unlocked.
    FileTimeTicks,
}

// ============================================================================
// Escaping
// ============================================================================

/// Escapes special characters in LDAP filter values.
#[must_use]
pub fn ldap_escape(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\5c"),
            '*' => result.push_str("\\2a"),
            '(' => result.push_str("\\28"),
            ')' => result.push_str("\\29"),
            '\0' => result.push_str("\\00"),
            _ => result.push(c),
        }
    }
    result
}

// ============================================================================
// Schema Mapping
// ============================================================================

/// Attribute and filter tables for one directory flavor.
pub trait SchemaMapping: Send + Sync + fmt::Debug {
    /// Directory flavor.
    fn kind(&self) -> SchemaKind;

    /// Concrete attribute name, `None` when the schema lacks it.
    fn attribute(&self, id: AttributeId) -> Option<&str>;

    /// Object class name.
    fn object_class(&self, class: ObjectClass) -> &str;

    /// Filter template with `%s` slots, `None` when unsupported.
    fn filter_template(&self, op: FilterOp) -> Option<&str>;

    /// Account-control bit for an expired password.
    fn password_expired_flag(&self) -> u32;

    /// Encoding of the lockout-time attribute.
    fn lockout_time_format(&self) -> LockoutTimeFormat;

    /// Object ids are binary security identifiers.
    fn object_id_is_sid(&self) -> bool;

    /// Group member lists may be served in ranges.
    fn ranged_members(&self) -> bool;

    /// Attribute name that must be present.
    fn required_attribute(&self, id: AttributeId) -> LdapResult<&str> {
        self.attribute(id)
            .ok_or_else(|| LdapError::mapping(format!("schema has no {id} attribute")))
    }

    /// Completes a filter template, escaping `value` into every slot.
    fn build_filter(&self, op: FilterOp, value: &str) -> LdapResult<String> {
        let template = self
            .filter_template(op)
            .ok_or_else(|| LdapError::mapping(format!("schema has no filter for {op:?}")))?;
        Ok(template.replace(SLOT, &ldap_escape(value)))
    }
}

/// Attribute table shared by both mappings.
#[derive(Debug, Clone)]
struct AttributeTable {
    names: HashMap<AttributeId, Option<String>>,
}

impl AttributeTable {
    fn new(defaults: &[(AttributeId, Option<&str>)], overrides: &[(AttributeId, String)]) -> Self {
        let mut names: HashMap<AttributeId, Option<String>> = defaults
            .iter()
            .map(|(id, name)| (*id, name.map(ToString::to_string)))
            .collect();
        for (id, name) in overrides {
            let value = if name.is_empty() {
                None
            } else {
                Some(name.clone())
            };
            names.insert(*id, value);
        }
        Self { names }
    }

    fn get(&self, id: AttributeId) -> Option<&str> {
        self.names.get(&id).and_then(|n| n.as_deref())
    }

    fn validate(&self) -> LdapResult<()> {
        for id in AttributeId::ALL {
            if id.is_required() && self.get(id).is_none() {
                return Err(LdapError::config(format!(
                    "schema attribute {id} cannot be absent"
                )));
            }
        }
        Ok(())
    }
}

fn parse_overrides(config: &LdapConfig) -> LdapResult<Vec<(AttributeId, String)>> {
    config
        .schema_overrides
        .iter()
        .map(|(key, name)| Ok((key.parse::<AttributeId>()?, name.trim().to_string())))
        .collect()
}

/// Builds the mapping for the configured directory flavor.
pub fn for_config(config: &LdapConfig) -> LdapResult<Arc<dyn SchemaMapping>> {
    let overrides = parse_overrides(config)?;
    Ok(match config.schema {
        SchemaKind::Generic => Arc::new(GenericSchema::new(&overrides)?),
        SchemaKind::ActiveDirectory => Arc::new(ActiveDirectorySchema::new(&overrides)?),
    })
}

fn any_of(attributes: &[&str]) -> String {
    let terms: String = attributes
        .iter()
        .map(|a| format!("({a}=*{SLOT}*)"))
        .collect();
    format!("(|{terms})")
}

// ============================================================================
// Generic LDAP
// ============================================================================

/// Generic LDAP schema (inetOrgPerson / groupOfUniqueNames / pwdPolicy).
#[derive(Debug, Clone)]
pub struct GenericSchema {
    attributes: AttributeTable,
    filters: HashMap<FilterOp, String>,
}

impl GenericSchema {
    /// Password-expired bit.
    pub const PASSWORD_EXPIRED: u32 = 0x8_0000;

    const USER_CLASS: &'static str = "inetOrgPerson";
    const GROUP_CLASS: &'static str = "groupOfUniqueNames";
    const POLICY_CLASS: &'static str = "pwdPolicy";

    /// Builds the mapping, applying overrides.
    pub fn new(overrides: &[(AttributeId, String)]) -> LdapResult<Self> {
        use AttributeId as A;
        let attributes = AttributeTable::new(
            &[
                (A::UserAccountName, Some("uid")),
                (A::UserPrincipalName, None),
                (A::UserObjectId, Some("entryUUID")),
                (A::UserFirstName, Some("givenName")),
                (A::UserLastName, Some("sn")),
                (A::UserEmail, Some("mail")),
                (A::UserDescription, Some("description")),
                (A::UserDisplayName, Some("displayName")),
                (A::UserAccountControl, Some("userAccountControl")),
                (A::UserLockoutTime, Some("pwdAccountLockedTime")),
                (A::UserPrimaryGroupId, None),
                (A::UserPwdLastSet, None),
                (A::UserMemberOf, None),
                (A::UserResultantPso, None),
                (A::GroupAccountName, Some("cn")),
                (A::GroupMembers, Some("uniqueMember")),
                (A::GroupObjectId, Some("entryUUID")),
                (A::GroupDescription, Some("description")),
                (A::PasswordPolicyLockoutDuration, Some("pwdLockoutDuration")),
                (A::PasswordSettingsMaxAge, None),
                (A::DomainMaxPwdAge, None),
            ],
            overrides,
        );
        attributes.validate()?;

        let filters = Self::filters(&attributes);
        Ok(Self {
            attributes,
            filters,
        })
    }

    fn filters(attributes: &AttributeTable) -> HashMap<FilterOp, String> {
        use AttributeId as A;
        let user = Self::USER_CLASS;
        let group = Self::GROUP_CLASS;
        let user_name = attributes.get(A::UserAccountName).unwrap_or("uid");
        let group_name = attributes.get(A::GroupAccountName).unwrap_or("cn");
        let user_id = attributes.get(A::UserObjectId).unwrap_or("entryUUID");
        let group_id = attributes.get(A::GroupObjectId).unwrap_or("entryUUID");
        let members = attributes.get(A::GroupMembers).unwrap_or("uniqueMember");

        let user_criteria: Vec<&str> = [
            A::UserAccountName,
            A::UserFirstName,
            A::UserLastName,
            A::UserDisplayName,
            A::UserDescription,
        ]
        .iter()
        .filter_map(|id| attributes.get(*id))
        .collect();
        let group_criteria: Vec<&str> = [A::GroupAccountName, A::GroupDescription]
            .iter()
            .filter_map(|id| attributes.get(*id))
            .collect();

        let mut filters = HashMap::from([
            (FilterOp::AllUsers, format!("(objectClass={user})")),
            (
                FilterOp::UserByAccountName,
                format!("(&(objectClass={user})({user_name}={SLOT}))"),
            ),
            (
                FilterOp::UserByObjectId,
                format!("(&(objectClass={user})({user_id}={SLOT}))"),
            ),
            (
                FilterOp::UserByCriteria,
                format!("(&(objectClass={user}){})", any_of(&user_criteria)),
            ),
            (
                FilterOp::UserOrGroupByAccountName,
                format!(
                    "(|(&(objectClass={user})({user_name}={SLOT}))(&(objectClass={group})({group_name}={SLOT})))"
                ),
            ),
            (FilterOp::AllGroups, format!("(objectClass={group})")),
            (
                FilterOp::GroupByAccountName,
                format!("(&(objectClass={group})({group_name}={SLOT}))"),
            ),
            (
                FilterOp::GroupByObjectId,
                format!("(&(objectClass={group})({group_id}={SLOT}))"),
            ),
            (
                FilterOp::GroupByCriteria,
                format!("(&(objectClass={group}){})", any_of(&group_criteria)),
            ),
            (
                FilterOp::DirectParentGroups,
                format!("(&(objectClass={group})({members}={SLOT}))"),
            ),
            (
                FilterOp::PasswordSettings,
                format!("(objectClass={})", Self::POLICY_CLASS),
            ),
        ]);

        if let Some(upn) = attributes.get(A::UserPrincipalName) {
            filters.insert(
                FilterOp::UserByUpn,
                format!("(&(objectClass={user})({upn}={SLOT}))"),
            );
        }

        filters
    }
}

impl SchemaMapping for GenericSchema {
    fn kind(&self) -> SchemaKind {
        SchemaKind::Generic
    }

    fn attribute(&self, id: AttributeId) -> Option<&str> {
        self.attributes.get(id)
    }

    fn object_class(&self, class: ObjectClass) -> &str {
        match class {
            ObjectClass::User => Self::USER_CLASS,
            ObjectClass::Group => Self::GROUP_CLASS,
            ObjectClass::PasswordPolicy | ObjectClass::PasswordSettings => Self::POLICY_CLASS,
            ObjectClass::Domain => "domain",
        }
    }

    fn filter_template(&self, op: FilterOp) -> Option<&str> {
        self.filters.get(&op).map(String::as_str)
    }

    fn password_expired_flag(&self) -> u32 {
        Self::PASSWORD_EXPIRED
    }

    fn lockout_time_format(&self) -> LockoutTimeFormat {
        LockoutTimeFormat::GeneralizedTime
    }

    fn object_id_is_sid(&self) -> bool {
        false
    }

    fn ranged_members(&self) -> bool {
        false
    }
}

// ============================================================================
// Active Directory
// ============================================================================

/// Active Directory schema.
#[derive(Debug, Clone)]
pub struct ActiveDirectorySchema {
    attributes: AttributeTable,
    filters: HashMap<FilterOp, String>,
}

impl ActiveDirectorySchema {
    /// Password-expired bit.
    pub const PASSWORD_EXPIRED: u32 = 0x80_0000;

    const USER_CLASS: &'static str = "user";
    const GROUP_CLASS: &'static str = "group";
    const SETTINGS_CLASS: &'static str = "msDS-PasswordSettings";
    const DOMAIN_CLASS: &'static str = "domain";

    /// Builds the mapping, applying overrides.
    pub fn new(overrides: &[(AttributeId, String)]) -> LdapResult<Self> {
        use AttributeId as A;
        let attributes = AttributeTable::new(
            &[
                (A::UserAccountName, Some("sAMAccountName")),
                (A::UserPrincipalName, Some("userPrincipalName")),
                (A::UserObjectId, Some("objectSid")),
                (A::UserFirstName, Some("givenName")),
                (A::UserLastName, Some("sn")),
                (A::UserEmail, Some("mail")),
                (A::UserDescription, Some("description")),
                (A::UserDisplayName, Some("displayName")),
                (A::UserAccountControl, Some("userAccountControl")),
                (A::UserLockoutTime, Some("lockoutTime")),
                (A::UserPrimaryGroupId, Some("primaryGroupID")),
                (A::UserPwdLastSet, Some("pwdLastSet")),
                (A::UserMemberOf, Some("memberOf")),
                (A::UserResultantPso, Some("msDS-ResultantPSO")),
                (A::GroupAccountName, Some("sAMAccountName")),
                (A::GroupMembers, Some("member")),
                (A::GroupObjectId, Some("objectSid")),
                (A::GroupDescription, Some("description")),
                (A::PasswordPolicyLockoutDuration, None),
                (A::PasswordSettingsMaxAge, Some("msDS-MaximumPasswordAge")),
                (A::DomainMaxPwdAge, Some("maxPwdAge")),
            ],
            overrides,
        );
        attributes.validate()?;

        let filters = Self::filters(&attributes);
        Ok(Self {
            attributes,
            filters,
        })
    }

    fn filters(attributes: &AttributeTable) -> HashMap<FilterOp, String> {
        use AttributeId as A;
        let user = Self::USER_CLASS;
        let group = Self::GROUP_CLASS;
        let user_name = attributes.get(A::UserAccountName).unwrap_or("sAMAccountName");
        let group_name = attributes.get(A::GroupAccountName).unwrap_or("sAMAccountName");
        let user_id = attributes.get(A::UserObjectId).unwrap_or("objectSid");
        let group_id = attributes.get(A::GroupObjectId).unwrap_or("objectSid");
        let members = attributes.get(A::GroupMembers).unwrap_or("member");

        let mut user_criteria: Vec<&str> = [
            A::UserAccountName,
            A::UserLastName,
            A::UserFirstName,
            A::UserDisplayName,
        ]
        .iter()
        .filter_map(|id| attributes.get(*id))
        .collect();
        user_criteria.extend(["cn", "name"]);
        let mut group_criteria: Vec<&str> = [A::GroupAccountName, A::GroupDescription]
            .iter()
            .filter_map(|id| attributes.get(*id))
            .collect();
        group_criteria.push("name");

        let mut filters = HashMap::from([
            (FilterOp::AllUsers, format!("(objectClass={user})")),
            (
                FilterOp::UserByAccountName,
                format!("(&({user_name}={SLOT})(objectClass={user}))"),
            ),
            (
                FilterOp::UserByObjectId,
                format!("(&({user_id}={SLOT})(objectClass={user}))"),
            ),
            (
                FilterOp::UserByCriteria,
                format!("(&(objectClass={user}){})", any_of(&user_criteria)),
            ),
            (
                FilterOp::UserOrGroupByAccountName,
                format!(
                    "(&(|(objectClass={user})(objectClass={group}))({user_name}={SLOT}))"
                ),
            ),
            (FilterOp::AllGroups, format!("(objectClass={group})")),
            (
                FilterOp::GroupByAccountName,
                format!("(&({group_name}={SLOT})(objectClass={group}))"),
            ),
            (
                FilterOp::GroupByObjectId,
                format!("(&({group_id}={SLOT})(objectClass={group}))"),
            ),
            (
                FilterOp::GroupByCriteria,
                format!("(&(objectClass={group}){})", any_of(&group_criteria)),
            ),
            (
                FilterOp::DirectParentGroups,
                format!("(&(objectClass={group})({members}={SLOT}))"),
            ),
            (
                FilterOp::NestedParentGroups,
                format!("(&(objectClass={group})({members}:{MATCHING_RULE_IN_CHAIN}:={SLOT}))"),
            ),
            (
                FilterOp::PasswordSettings,
                format!("(objectClass={})", Self::SETTINGS_CLASS),
            ),
            (
                FilterOp::DomainObject,
                format!("(objectClass={})", Self::DOMAIN_CLASS),
            ),
        ]);

        if let Some(upn) = attributes.get(A::UserPrincipalName) {
            filters.insert(
                FilterOp::UserByUpn,
                format!("(&({upn}={SLOT})(objectClass={user}))"),
            );
        }

        filters
    }
}

impl SchemaMapping for ActiveDirectorySchema {
    fn kind(&self) -> SchemaKind {
        SchemaKind::ActiveDirectory
    }

    fn attribute(&self, id: AttributeId) -> Option<&str> {
        self.attributes.get(id)
    }

    fn object_class(&self, class: ObjectClass) -> &str {
        match class {
            ObjectClass::User => Self::USER_CLASS,
            ObjectClass::Group => Self::GROUP_CLASS,
            ObjectClass::PasswordPolicy | ObjectClass::PasswordSettings => Self::SETTINGS_CLASS,
            ObjectClass::Domain => Self::DOMAIN_CLASS,
        }
    }

    fn filter_template(&self, op: FilterOp) -> Option<&str> {
        self.filters.get(&op).map(String::as_str)
    }

    fn password_expired_flag(&self) -> u32 {
        Self::PASSWORD_EXPIRED
    }

    fn lockout_time_format(&self) -> LockoutTimeFormat {
        LockoutTimeFormat::FileTimeTicks
    }

    fn object_id_is_sid(&self) -> bool {
        self.attributes
            .get(AttributeId::UserObjectId)
            .is_some_and(|a| a.eq_ignore_ascii_case("objectSid"))
    }

    fn ranged_members(&self) -> bool {
        true
    }
}
