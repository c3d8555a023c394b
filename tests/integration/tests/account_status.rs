//! Lockout arithmetic and the lazily loaded lockout policy.

use chrono::{Duration, Utc};
use kc_federation::{FederationError, IdentityProvider, PrincipalId};
use kc_federation_ldap::{DirectoryEntry, ProviderFlags};
use kc_integration_tests::{
    ad_config, ad_directory, ad_user, ad_user_with_control, generic_config, generic_directory,
    person, provider, PEOPLE,
};

fn locked_minutes_ago(uid: &str, minutes: i64) -> DirectoryEntry {
    let at = Utc::now() - Duration::minutes(minutes);
    person(uid).with_values("pwdAccountLockedTime", [at.format("%Y%m%d%H%M%SZ").to_string()])
}

fn policy(seconds: i64) -> DirectoryEntry {
    DirectoryEntry::new(format!("cn=default,{PEOPLE}"))
        .with_values("objectClass", ["pwdPolicy"])
        .with_values("pwdLockoutDuration", [seconds.to_string()])
}

fn principal(uid: &str) -> PrincipalId {
    PrincipalId::new(uid, "example.com")
}

/// A lockout timestamp counts only while it is within the policy's
/// lockout duration.
#[tokio::test]
async fn test_lockout_expires_after_policy_duration() -> anyhow::Result<()> {
    let directory = generic_directory();
    directory.add(locked_minutes_ago("fresh", 5));
    directory.add(locked_minutes_ago("stale", 120));
    directory.add(person("clear"));
    directory.add(policy(1800));
    let provider = provider(generic_config()?, &directory)?;

    assert!(provider.account_status(&principal("fresh")).await?.locked);
    assert!(!provider.account_status(&principal("stale")).await?.locked);
    assert!(!provider.account_status(&principal("clear")).await?.locked);

    let err = provider
        .check_account_status(&principal("fresh"))
        .await
        .expect_err("fresh lockout blocks the account");
    assert!(matches!(err, FederationError::AccountLocked(_)));
    assert!(provider.is_active(&principal("stale")).await?);

    let locked = provider.find_locked_users("", None).await?;
    let names: Vec<&str> = locked.iter().map(|u| u.id.name()).collect();
    assert_eq!(names, ["fresh"]);

    Ok(())
}

/// Without a policy object lockout timestamps are ignored; the failed
/// lookup is not cached, so a policy added later takes effect.
#[tokio::test]
async fn test_missing_policy_is_retried() -> anyhow::Result<()> {
    let directory = generic_directory();
    directory.add(locked_minutes_ago("fresh", 5));
    let provider = provider(generic_config()?, &directory)?;

    assert!(!provider.account_status(&principal("fresh")).await?.locked);

    directory.add(policy(1800));
    assert!(provider.account_status(&principal("fresh")).await?.locked);

    directory.remove(&format!("cn=default,{PEOPLE}"));
    assert!(
        provider.account_status(&principal("fresh")).await?.locked,
        "a loaded policy stays cached"
    );

    Ok(())
}

/// Active Directory reports a lockout from any positive lockout time and
/// disabled accounts from the control bits.
#[tokio::test]
async fn test_active_directory_status_bits() -> anyhow::Result<()> {
    let directory = ad_directory();
    directory.add(ad_user("Locked User", "locked", 1201).with_values("lockoutTime", ["1"]));
    // ACCOUNTDISABLE | NORMAL_ACCOUNT | PASSWORD_EXPIRED
    directory.add(ad_user_with_control("Expired User", "expired", 1202, 0x80_0202));
    let provider = provider(ad_config(ProviderFlags::default())?, &directory)?;

    let locked = provider
        .account_status(&PrincipalId::new("locked", "corp.example.com"))
        .await?;
    assert!(locked.locked);
    assert!(!locked.disabled);

    let expired = provider
        .account_status(&PrincipalId::new("expired", "corp.example.com"))
        .await?;
    assert!(expired.disabled);
    assert!(expired.password_expired);
    assert!(!expired.locked);

    Ok(())
}
