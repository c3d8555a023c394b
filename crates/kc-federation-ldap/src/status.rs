//! Account status decoding.
//!
//! Directory flavors encode disabled, locked and expired accounts
//! differently. [`AccountStatusDecoder`] turns an entry into
//! [`AccountFlags`], consulting the source's lockout policy when the
//! entry only carries a lockout timestamp. Policy values are looked up
//! lazily and cached once a lookup succeeds.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use kc_federation::AccountStatus;
use tokio::sync::OnceCell;

use crate::config::SearchScope;
use crate::error::{LdapError, LdapResult};
use crate::schema::{AttributeId, FilterOp, LockoutTimeFormat, SchemaMapping};
use crate::search::DirectoryEntry;
use crate::transport::{DirectoryConnection, SearchRequest};
use crate::translator::{filetime_to_unix_seconds, interval_ticks_to_seconds, ExtendedUserInfo};

/// Lockout timestamp marking an account locked until an administrator
/// unlocks it.
pub const PERMANENT_LOCKOUT: &str = "000001010000Z";

const GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

// ============================================================================
// Flags
// ============================================================================

/// Account-control bit field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AccountFlags(u32);

impl AccountFlags {
    /// Account disabled.
    pub const ACCOUNT_DISABLED: u32 = 0x2;
    /// Account locked out.
    pub const LOCKED: u32 = 0x10;
    /// Password never expires.
    pub const DONT_EXPIRE_PASSWD: u32 = 0x1_0000;

    /// Wraps raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Checks a bit.
    #[must_use]
    pub const fn contains(&self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    /// Sets a bit.
    #[must_use]
    pub const fn with(self, bit: u32) -> Self {
        Self(self.0 | bit)
    }

    /// Status view, using the schema's password-expired bit.
    #[must_use]
    pub const fn to_status(&self, password_expired_flag: u32) -> AccountStatus {
        AccountStatus {
            disabled: self.contains(Self::ACCOUNT_DISABLED),
            locked: self.contains(Self::LOCKED),
            password_expired: self.contains(password_expired_flag),
        }
    }
}

// ============================================================================
// Policy cache
// ============================================================================

/// Lazily loaded policy value; failures are not cached.
#[derive(Debug, Default)]
pub struct PolicyValueCache {
    cell: OnceCell<i64>,
}

impl PolicyValueCache {
    /// Empty cache.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    /// Cached value.
    #[must_use]
    pub fn get(&self) -> Option<i64> {
        self.cell.get().copied()
    }

    /// Returns the cached value or runs `load` once it succeeds.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> LdapResult<i64>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = LdapResult<i64>>,
    {
        self.cell.get_or_try_init(load).await.copied()
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Decodes account flags and password timestamps for one identity source.
#[derive(Debug)]
pub struct AccountStatusDecoder {
    schema: Arc<dyn SchemaMapping>,
    policy_base_dn: String,
    domain_dn: String,
    lockout_duration: PolicyValueCache,
    domain_max_pwd_age: PolicyValueCache,
}

impl AccountStatusDecoder {
    /// Creates a decoder. The lockout policy is searched under
    /// `policy_base_dn`; the domain password policy lives on `domain_dn`.
    #[must_use]
    pub fn new(
        schema: Arc<dyn SchemaMapping>,
        policy_base_dn: impl Into<String>,
        domain_dn: impl Into<String>,
    ) -> Self {
        Self {
            schema,
            policy_base_dn: policy_base_dn.into(),
            domain_dn: domain_dn.into(),
            lockout_duration: PolicyValueCache::new(),
            domain_max_pwd_age: PolicyValueCache::new(),
        }
    }

    /// Attributes the decoder reads from user entries.
    #[must_use]
    pub fn attributes(&self) -> Vec<&str> {
        [
            AttributeId::UserAccountControl,
            AttributeId::UserLockoutTime,
            AttributeId::UserPwdLastSet,
            AttributeId::UserResultantPso,
        ]
        .into_iter()
        .filter_map(|id| self.schema.attribute(id))
        .collect()
    }

    /// Starts a decoding session for a batch of entries.
    #[must_use]
    pub fn session(&self) -> DecoderSession<'_> {
        DecoderSession {
            decoder: self,
            lockout_duration: None,
            now: Utc::now(),
        }
    }

    /// Lockout duration in seconds, from the single password policy object.
    pub async fn lockout_duration(&self, conn: &mut dyn DirectoryConnection) -> LdapResult<i64> {
        self.lockout_duration
            .get_or_load(move || self.load_lockout_duration(conn))
            .await
    }

    async fn load_lockout_duration(&self, conn: &mut dyn DirectoryConnection) -> LdapResult<i64> {
        let attribute = self
            .schema
            .attribute(AttributeId::PasswordPolicyLockoutDuration)
            .ok_or_else(|| LdapError::PolicyUnavailable("schema has no lockout duration".into()))?;
        let filter = self.schema.build_filter(FilterOp::PasswordSettings, "")?;
        let request = SearchRequest::new(
            self.policy_base_dn.as_str(),
            SearchScope::Subtree,
            filter,
            &[attribute],
        );

        let entries = conn.search(&request).await?;
        let policy = match entries.as_slice() {
            [policy] => policy,
            [] => {
                return Err(LdapError::PolicyUnavailable(
                    "no password policy object found".into(),
                ))
            }
            many => {
                return Err(LdapError::PolicyUnavailable(format!(
                    "{} password policy objects found, expected one",
                    many.len()
                )))
            }
        };

        let duration = policy.integer(attribute)?.ok_or_else(|| {
            LdapError::PolicyUnavailable(format!("password policy has no {attribute}"))
        })?;
        tracing::debug!(lockout_duration_secs = duration, "Loaded lockout policy");
        Ok(duration)
    }

    /// Password timestamps for an Active Directory user.
    pub async fn extended_info(
        &self,
        conn: &mut dyn DirectoryConnection,
        entry: &DirectoryEntry,
        flags: AccountFlags,
    ) -> LdapResult<ExtendedUserInfo> {
        let pwd_last_set = match self.schema.attribute(AttributeId::UserPwdLastSet) {
            Some(attribute) => entry
                .integer(attribute)?
                .filter(|ticks| *ticks > 0)
                .map(filetime_to_unix_seconds),
            None => None,
        };

        let pwd_lifetime = if flags.contains(AccountFlags::DONT_EXPIRE_PASSWD) {
            None
        } else {
            self.password_lifetime(conn, entry).await
        };

        Ok(ExtendedUserInfo {
            pwd_last_set,
            pwd_lifetime,
        })
    }

    /// Maximum password age in seconds: the resultant password settings
    /// object when the user has one, else the domain policy.
    async fn password_lifetime(
        &self,
        conn: &mut dyn DirectoryConnection,
        entry: &DirectoryEntry,
    ) -> Option<i64> {
        let pso = self
            .schema
            .attribute(AttributeId::UserResultantPso)
            .and_then(|a| entry.first(a));

        if let Some(pso) = pso {
            match self.pso_max_age(conn, pso).await {
                Ok(Some(ticks)) => return interval_ticks_to_seconds(ticks),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    error = %e,
                    "Failed to read password settings object; using domain policy"
                ),
            }
        }

        match self
            .domain_max_pwd_age
            .get_or_load(move || self.load_domain_max_age(conn))
            .await
        {
            Ok(ticks) => interval_ticks_to_seconds(ticks),
            Err(e) => {
                tracing::warn!(error = %e, domain_dn = %self.domain_dn, "Domain password policy unavailable");
                None
            }
        }
    }

    async fn pso_max_age(
        &self,
        conn: &mut dyn DirectoryConnection,
        pso_dn: &str,
    ) -> LdapResult<Option<i64>> {
        let attribute = self.schema.required_attribute(AttributeId::PasswordSettingsMaxAge)?;
        let filter = self.schema.build_filter(FilterOp::PasswordSettings, "")?;
        let request = SearchRequest::new(pso_dn, SearchScope::Base, filter, &[attribute]);
        let entries = conn.search(&request).await?;
        match entries.first() {
            Some(entry) => entry.integer(attribute),
            None => Ok(None),
        }
    }

    async fn load_domain_max_age(&self, conn: &mut dyn DirectoryConnection) -> LdapResult<i64> {
        let attribute = self.schema.required_attribute(AttributeId::DomainMaxPwdAge)?;
        let filter = self.schema.build_filter(FilterOp::DomainObject, "")?;
        let request = SearchRequest::new(
            self.domain_dn.as_str(),
            SearchScope::Base,
            filter,
            &[attribute],
        );
        let entries = conn.search(&request).await?;
        entries
            .first()
            .map(|e| e.integer(attribute))
            .transpose()?
            .flatten()
            .ok_or_else(|| LdapError::PolicyUnavailable(format!("domain object has no {attribute}")))
    }
}

/// Decodes a batch of entries against one clock reading.
///
/// A failed policy lookup is remembered for the rest of the session, so
/// a batch triggers at most one lookup.
#[derive(Debug)]
pub struct DecoderSession<'a> {
    decoder: &'a AccountStatusDecoder,
    lockout_duration: Option<Option<i64>>,
    now: DateTime<Utc>,
}

impl DecoderSession<'_> {
    /// Fixes the clock reading.
    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Account flags of `entry`.
    pub async fn account_flags(
        &mut self,
        entry: &DirectoryEntry,
        conn: &mut dyn DirectoryConnection,
    ) -> LdapResult<AccountFlags> {
        let schema = &self.decoder.schema;
        let control = match schema.attribute(AttributeId::UserAccountControl) {
            Some(attribute) => entry.integer(attribute)?,
            None => None,
        };

        match schema.lockout_time_format() {
            LockoutTimeFormat::FileTimeTicks => {
                let mut flags = AccountFlags::from_bits(control.map_or(0, bits));
                let lockout = match schema.attribute(AttributeId::UserLockoutTime) {
                    Some(attribute) => entry.integer(attribute)?,
                    None => None,
                };
                if lockout.is_some_and(|ticks| ticks >= 1) {
                    flags = flags.with(AccountFlags::LOCKED);
                }
                Ok(flags)
            }
            LockoutTimeFormat::GeneralizedTime => {
                if let Some(control) = control {
                    return Ok(AccountFlags::from_bits(bits(control)));
                }
                self.generalized_lockout(entry, conn).await
            }
        }
    }

    /// Account status of `entry`.
    pub async fn status(
        &mut self,
        entry: &DirectoryEntry,
        conn: &mut dyn DirectoryConnection,
    ) -> LdapResult<AccountStatus> {
        let flags = self.account_flags(entry, conn).await?;
        Ok(flags.to_status(self.decoder.schema.password_expired_flag()))
    }

    async fn generalized_lockout(
        &mut self,
        entry: &DirectoryEntry,
        conn: &mut dyn DirectoryConnection,
    ) -> LdapResult<AccountFlags> {
        let flags = AccountFlags::default();
        let Some(attribute) = self.decoder.schema.attribute(AttributeId::UserLockoutTime) else {
            return Ok(flags);
        };
        let Some(locked_at) = entry.first(attribute) else {
            return Ok(flags);
        };

        if locked_at == PERMANENT_LOCKOUT {
            return Ok(flags.with(AccountFlags::LOCKED));
        }
        let locked_at = parse_generalized_time(attribute, locked_at)?;

        let Some(duration) = self.lockout_duration(conn).await else {
            return Ok(flags);
        };

        if locked_at.timestamp() < self.now.timestamp().saturating_sub(duration) {
            Ok(flags)
        } else {
            Ok(flags.with(AccountFlags::LOCKED))
        }
    }

    async fn lockout_duration(&mut self, conn: &mut dyn DirectoryConnection) -> Option<i64> {
        if let Some(memo) = self.lockout_duration {
            return memo;
        }
        let duration = match self.decoder.lockout_duration(conn).await {
            Ok(duration) => Some(duration),
            Err(e) => {
                tracing::warn!(error = %e, "Lockout policy unavailable; lockout timestamps ignored");
                None
            }
        };
        self.lockout_duration = Some(duration);
        duration
    }
}

fn bits(control: i64) -> u32 {
    u32::try_from(control & 0xFFFF_FFFF).unwrap_or_default()
}

fn parse_generalized_time(attribute: &str, value: &str) -> LdapResult<DateTime<Utc>> {
    let digits = value
        .get(..14)
        .ok_or_else(|| LdapError::invalid_value(attribute, "timestamp too short"))?;
    let naive = NaiveDateTime::parse_from_str(digits, GENERALIZED_TIME_FORMAT)
        .map_err(|e| LdapError::invalid_value(attribute, e.to_string()))?;
    Ok(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ActiveDirectorySchema, GenericSchema};
    use crate::testing::MemoryDirectory;

    const PEOPLE: &str = "ou=people,dc=example,dc=com";

    fn generic_decoder() -> AccountStatusDecoder {
        AccountStatusDecoder::new(
            Arc::new(GenericSchema::new(&[]).unwrap()),
            PEOPLE,
            "dc=example,dc=com",
        )
    }

    fn ad_decoder() -> AccountStatusDecoder {
        AccountStatusDecoder::new(
            Arc::new(ActiveDirectorySchema::new(&[]).unwrap()),
            "CN=Users,DC=corp,DC=com",
            "DC=corp,DC=com",
        )
    }

    fn policy(duration: &str) -> DirectoryEntry {
        DirectoryEntry::new(format!("cn=default,{PEOPLE}"))
            .with_values("objectClass", ["pwdPolicy"])
            .with_values("pwdLockoutDuration", [duration])
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn locked_user(at: &str) -> DirectoryEntry {
        DirectoryEntry::new(format!("uid=jdoe,{PEOPLE}"))
            .with_values("uid", ["jdoe"])
            .with_values("pwdAccountLockedTime", [at])
    }

    #[test]
    fn flags_map_to_status() {
        let flags = AccountFlags::from_bits(0x2 | 0x10 | 0x8_0000);
        let status = flags.to_status(GenericSchema::PASSWORD_EXPIRED);
        assert!(status.disabled && status.locked && status.password_expired);

        let ad = AccountFlags::from_bits(0x8_0000).to_status(ActiveDirectorySchema::PASSWORD_EXPIRED);
        assert!(!ad.password_expired);
    }

    #[tokio::test]
    async fn account_control_wins_over_lockout_time() {
        let directory = MemoryDirectory::new();
        let mut conn = directory.connection();
        let decoder = generic_decoder();
        let entry = locked_user(PERMANENT_LOCKOUT).with_values("userAccountControl", ["2"]);

        let flags = decoder.session().account_flags(&entry, &mut conn).await.unwrap();
        assert_eq!(flags.bits(), AccountFlags::ACCOUNT_DISABLED);
        assert_eq!(directory.stats().searches, 0);
    }

    #[tokio::test]
    async fn permanent_lockout_needs_no_policy() {
        let directory = MemoryDirectory::new();
        let mut conn = directory.connection();
        let decoder = generic_decoder();

        let flags = decoder
            .session()
            .account_flags(&locked_user(PERMANENT_LOCKOUT), &mut conn)
            .await
            .unwrap();
        assert!(flags.contains(AccountFlags::LOCKED));
        assert_eq!(directory.stats().searches, 0);
    }

    #[tokio::test]
    async fn lockout_expires_after_policy_duration() {
        let directory = MemoryDirectory::new();
        directory.add(policy("900"));
        let mut conn = directory.connection();
        let decoder = generic_decoder();
        let mut session = decoder.session().at(now());

        let recent = session
            .account_flags(&locked_user("20240501115500Z"), &mut conn)
            .await
            .unwrap();
        assert!(recent.contains(AccountFlags::LOCKED));

        let expired = session
            .account_flags(&locked_user("20240501112000Z"), &mut conn)
            .await
            .unwrap();
        assert!(!expired.contains(AccountFlags::LOCKED));

        assert_eq!(directory.stats().searches, 1);
        assert_eq!(decoder.lockout_duration.get(), Some(900));
    }

    #[tokio::test]
    async fn missing_policy_leaves_account_unlocked_and_is_retried_later() {
        let directory = MemoryDirectory::new();
        let mut conn = directory.connection();
        let decoder = generic_decoder();

        let mut session = decoder.session().at(now());
        for _ in 0..3 {
            let flags = session
                .account_flags(&locked_user("20240501115500Z"), &mut conn)
                .await
                .unwrap();
            assert!(!flags.contains(AccountFlags::LOCKED));
        }
        assert_eq!(directory.stats().searches, 1);
        assert_eq!(decoder.lockout_duration.get(), None);

        directory.add(policy("900"));
        let flags = decoder
            .session()
            .at(now())
            .account_flags(&locked_user("20240501115500Z"), &mut conn)
            .await
            .unwrap();
        assert!(flags.contains(AccountFlags::LOCKED));
    }

    #[tokio::test]
    async fn ambiguous_policy_is_unavailable() {
        let directory = MemoryDirectory::new();
        directory.add(policy("900"));
        directory.add(
            DirectoryEntry::new(format!("cn=other,{PEOPLE}"))
                .with_values("objectClass", ["pwdPolicy"])
                .with_values("pwdLockoutDuration", ["60"]),
        );
        let mut conn = directory.connection();
        let err = generic_decoder().lockout_duration(&mut conn).await.unwrap_err();
        assert!(matches!(err, LdapError::PolicyUnavailable(_)));
    }

    #[tokio::test]
    async fn malformed_timestamp_is_rejected() {
        let directory = MemoryDirectory::new();
        let mut conn = directory.connection();
        let err = generic_decoder()
            .session()
            .account_flags(&locked_user("yesterday"), &mut conn)
            .await
            .unwrap_err();
        assert!(matches!(err, LdapError::InvalidAttributeValue { .. }));
    }

    #[tokio::test]
    async fn ad_lockout_time_sets_locked() {
        let directory = MemoryDirectory::new();
        let mut conn = directory.connection();
        let decoder = ad_decoder();
        let entry = DirectoryEntry::new("CN=jdoe,CN=Users,DC=corp,DC=com")
            .with_values("userAccountControl", ["512"])
            .with_values("lockoutTime", ["133500000000000000"]);

        let status = decoder.session().status(&entry, &mut conn).await.unwrap();
        assert!(status.locked);
        assert!(!status.disabled);

        let unlocked = DirectoryEntry::new("CN=ann,CN=Users,DC=corp,DC=com")
            .with_values("userAccountControl", ["514"])
            .with_values("lockoutTime", ["0"]);
        let status = decoder.session().status(&unlocked, &mut conn).await.unwrap();
        assert!(!status.locked);
        assert!(status.disabled);
    }

    #[tokio::test]
    async fn ad_lifetime_prefers_pso_then_domain_policy() {
        let directory = MemoryDirectory::new();
        directory.add(
            DirectoryEntry::new("DC=corp,DC=com")
                .with_values("objectClass", ["domain"])
                .with_values("maxPwdAge", ["-36288000000000"]),
        );
        directory.add(
            DirectoryEntry::new("CN=Admins PSO,CN=Password Settings Container,CN=System,DC=corp,DC=com")
                .with_values("objectClass", ["msDS-PasswordSettings"])
                .with_values("msDS-MaximumPasswordAge", ["-8640000000000"]),
        );
        let mut conn = directory.connection();
        let decoder = ad_decoder();
        let pwd_last_set = crate::translator::FILETIME_UNIX_OFFSET_TICKS + 1_000 * 10_000_000;

        let with_pso = DirectoryEntry::new("CN=admin,CN=Users,DC=corp,DC=com")
            .with_values("pwdLastSet", [pwd_last_set.to_string()])
            .with_values(
                "msDS-ResultantPSO",
                ["CN=Admins PSO,CN=Password Settings Container,CN=System,DC=corp,DC=com"],
            );
        let info = decoder
            .extended_info(&mut conn, &with_pso, AccountFlags::default())
            .await
            .unwrap();
        assert_eq!(info.pwd_last_set, Some(1_000));
        assert_eq!(info.pwd_lifetime, Some(864_000));

        let plain = DirectoryEntry::new("CN=jdoe,CN=Users,DC=corp,DC=com");
        let info = decoder
            .extended_info(&mut conn, &plain, AccountFlags::default())
            .await
            .unwrap();
        assert_eq!(info.pwd_lifetime, Some(3_628_800));
        assert_eq!(info.pwd_last_set, None);

        let never = decoder
            .extended_info(
                &mut conn,
                &plain,
                AccountFlags::from_bits(AccountFlags::DONT_EXPIRE_PASSWD),
            )
            .await
            .unwrap();
        assert_eq!(never.pwd_lifetime, None);
    }

    #[tokio::test]
    async fn broken_pso_falls_back_to_domain_policy() {
        let directory = MemoryDirectory::new();
        directory.add(
            DirectoryEntry::new("DC=corp,DC=com")
                .with_values("objectClass", ["domain"])
                .with_values("maxPwdAge", ["-36288000000000"]),
        );
        let mut conn = directory.connection();
        let entry = DirectoryEntry::new("CN=jdoe,CN=Users,DC=corp,DC=com")
            .with_values("msDS-ResultantPSO", ["CN=Gone,DC=corp,DC=com"]);

        let info = ad_decoder()
            .extended_info(&mut conn, &entry, AccountFlags::default())
            .await
            .unwrap();
        assert_eq!(info.pwd_lifetime, Some(3_628_800));
    }

    #[tokio::test]
    async fn never_expiring_domain_policy_has_no_lifetime() {
        let directory = MemoryDirectory::new();
        directory.add(
            DirectoryEntry::new("DC=corp,DC=com")
                .with_values("objectClass", ["domain"])
                .with_values("maxPwdAge", [i64::MIN.to_string()]),
        );
        directory.add(
            DirectoryEntry::new("CN=Service PSO,CN=Password Settings Container,CN=System,DC=corp,DC=com")
                .with_values("objectClass", ["msDS-PasswordSettings"])
                .with_values("msDS-MaximumPasswordAge", ["-9223372036854775808"]),
        );
        let mut conn = directory.connection();
        let decoder = ad_decoder();

        let plain = DirectoryEntry::new("CN=jdoe,CN=Users,DC=corp,DC=com");
        let info = decoder
            .extended_info(&mut conn, &plain, AccountFlags::default())
            .await
            .unwrap();
        assert_eq!(info.pwd_lifetime, None);

        let service = DirectoryEntry::new("CN=svc,CN=Users,DC=corp,DC=com").with_values(
            "msDS-ResultantPSO",
            ["CN=Service PSO,CN=Password Settings Container,CN=System,DC=corp,DC=com"],
        );
        let info = decoder
            .extended_info(&mut conn, &service, AccountFlags::default())
            .await
            .unwrap();
        assert_eq!(info.pwd_lifetime, None);
    }

    #[tokio::test]
    async fn lockout_boundary_around_policy_duration() {
        let directory = MemoryDirectory::new();
        directory.add(policy("1800"));
        let mut conn = directory.connection();
        let decoder = generic_decoder();
        let mut session = decoder.session().at(now());

        // 1700 s before noon
        let inside = session
            .account_flags(&locked_user("20240501113140Z"), &mut conn)
            .await
            .unwrap();
        assert!(inside.contains(AccountFlags::LOCKED));

        // 1900 s before noon
        let outside = session
            .account_flags(&locked_user("20240501112820Z"), &mut conn)
            .await
            .unwrap();
        assert!(!outside.contains(AccountFlags::LOCKED));
    }
}
