//! Paged searches, the unpaged fallback and its result ceiling.

use kc_federation::{FederationError, IdentityProvider};
use kc_federation_ldap::{LdapConfig, PagedCapability};
use kc_integration_tests::{generic_config, generic_directory, group, person, person_dn, provider};

fn populated() -> kc_federation_ldap::testing::MemoryDirectory {
    let directory = generic_directory();
    for uid in ["alice", "bob", "carol"] {
        directory.add(person(uid));
    }
    directory.add(group("ops", &[person_dn("alice")]));
    directory.add(group("dev", &[person_dn("bob")]));
    directory
}

/// Paging is negotiated on the first large search and reused afterwards.
#[tokio::test]
async fn test_paging_supported() -> anyhow::Result<()> {
    let directory = populated();
    let provider = provider(generic_config()?, &directory)?;
    assert_eq!(provider.capability(), PagedCapability::Unknown);

    assert_eq!(provider.find_users("", None).await?.len(), 3);
    assert_eq!(provider.find_groups("", None).await?.len(), 2);

    assert_eq!(provider.capability(), PagedCapability::Supported);
    assert_eq!(directory.stats().paging_rejections, 0);
    Ok(())
}

/// A server rejecting the control is searched unpaged, up to the ceiling.
#[tokio::test]
async fn test_unpaged_fallback_enforces_ceiling() -> anyhow::Result<()> {
    let directory = populated();
    directory.reject_paging();
    let config = LdapConfig {
        unpaged_result_ceiling: 2,
        ..generic_config()?
    };
    let provider = provider(config, &directory)?;

    let err = provider
        .find_users("", None)
        .await
        .expect_err("three users exceed a ceiling of two");
    assert!(matches!(err, FederationError::SizeLimitExceeded { limit: 2 }));
    assert_eq!(provider.capability(), PagedCapability::Unsupported);

    assert_eq!(provider.find_users("", Some(2)).await?.len(), 2);
    assert_eq!(provider.find_groups("", None).await?.len(), 2);
    assert_eq!(directory.stats().paging_rejections, 1);
    Ok(())
}

/// A combined search gives users the larger half of the limit.
#[tokio::test]
async fn test_combined_search_splits_limit() -> anyhow::Result<()> {
    let directory = populated();
    let provider = provider(generic_config()?, &directory)?;

    let result = provider.find("", Some(3)).await?;
    assert_eq!(result.users.len(), 2);
    assert_eq!(result.groups.len(), 1);

    let result = provider.find("o", None).await?;
    let mut users: Vec<&str> = result.users.iter().map(|u| u.id.name()).collect();
    users.sort_unstable();
    assert_eq!(users, ["bob", "carol"]);
    let mut groups: Vec<&str> = result.groups.iter().map(|g| g.id.name()).collect();
    groups.sort_unstable();
    assert_eq!(groups, ["ops"]);
    Ok(())
}
