//! Domain controller discovery and failover.

use std::sync::Arc;

use kc_federation::{IdentityProvider, PrincipalId};
use kc_federation_ldap::testing::StaticTopology;
use kc_federation_ldap::{DomainControllerInfo, ProviderFlags};
use kc_integration_tests::{ad_config, ad_directory, ad_dn, ad_user, provider_with_topology};

fn affinity() -> ProviderFlags {
    ProviderFlags {
        site_affinity: true,
        ..ProviderFlags::default()
    }
}

fn jdoe() -> PrincipalId {
    PrincipalId::new("jdoe", "corp.example.com")
}

/// A dead cached controller triggers a forced rediscovery on the next
/// connect, and the new controller is remembered.
#[tokio::test]
async fn test_failover_to_rediscovered_controller() -> anyhow::Result<()> {
    let directory = ad_directory();
    directory.add(ad_user("John Doe", "jdoe", 1104));
    directory.set_password(&ad_dn("John Doe"), "correct horse");
    directory.refuse("ldaps://dc1.corp.example.com:3269");

    let topology = Arc::new(StaticTopology::new(DomainControllerInfo::with_fqdn(
        "dc1.corp.example.com",
    )));
    let provider = provider_with_topology(ad_config(affinity())?, &directory, topology.clone())?;

    provider.find_user(&jdoe()).await?;
    assert_eq!(
        provider.pool().endpoints().get("corp.example.com").as_deref(),
        Some("ldaps://dc1.corp.example.com:636"),
        "Standard port is cached when the global catalog is down"
    );

    directory.refuse("ldaps://dc1.corp.example.com:636");
    topology.set_answer(Some(DomainControllerInfo::with_fqdn("dc2.corp.example.com")));

    let canonical = provider.authenticate(&jdoe(), "correct horse").await?;
    assert_eq!(canonical, jdoe());
    assert_eq!(
        topology.calls(),
        vec![
            ("corp.example.com".to_string(), false),
            ("corp.example.com".to_string(), true)
        ]
    );
    assert_eq!(
        provider.pool().endpoints().get("corp.example.com").as_deref(),
        Some("ldaps://dc2.corp.example.com:3269")
    );

    Ok(())
}

/// Every candidate port refusing surfaces as a connectivity failure.
#[tokio::test]
async fn test_unreachable_site_is_a_connectivity_error() -> anyhow::Result<()> {
    let directory = ad_directory();
    directory.refuse("ldaps://dc1.corp.example.com:3269");
    directory.refuse("ldaps://dc1.corp.example.com:636");
    let topology = Arc::new(StaticTopology::new(DomainControllerInfo::with_fqdn(
        "dc1.corp.example.com",
    )));
    let provider = provider_with_topology(ad_config(affinity())?, &directory, topology)?;

    let err = provider
        .probe_connection()
        .await
        .expect_err("no controller is reachable");
    assert!(err.is_connectivity_error(), "unexpected error: {err}");
    assert!(provider.pool().endpoints().get("corp.example.com").is_none());

    Ok(())
}

/// A locator failure is reported without touching the directory.
#[tokio::test]
async fn test_locator_failure() -> anyhow::Result<()> {
    let directory = ad_directory();
    let provider = provider_with_topology(
        ad_config(affinity())?,
        &directory,
        Arc::new(StaticTopology::failing()),
    )?;

    let err = provider
        .find_user(&jdoe())
        .await
        .expect_err("locator has no answer");
    assert!(err.is_connectivity_error());
    assert!(directory.connect_attempts().is_empty());

    Ok(())
}
