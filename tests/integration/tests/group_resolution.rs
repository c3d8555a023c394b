//! Membership cycles and ranged member retrieval.

use kc_federation::{IdentityProvider, PrincipalId};
use kc_federation_ldap::{LdapConfig, ProviderFlags};
use kc_integration_tests::{
    ad_config, ad_directory, ad_dn, ad_group, ad_user, generic_config, generic_directory, group,
    group_dn, person, person_dn, provider,
};

/// Nested resolution terminates on a membership cycle and reports each
/// group once.
#[tokio::test]
async fn test_nested_groups_with_cycle() -> anyhow::Result<()> {
    let directory = generic_directory();
    directory.add(person("jdoe"));
    directory.add(group("red", &[person_dn("jdoe"), group_dn("blue")]));
    directory.add(group("blue", &[group_dn("green")]));
    directory.add(group("green", &[group_dn("red")]));
    let provider = provider(generic_config()?, &directory)?;
    let jdoe = PrincipalId::new("jdoe", "example.com");

    let direct = provider.find_direct_parent_groups(&jdoe).await?;
    let names: Vec<&str> = direct.groups.iter().map(|g| g.id.name()).collect();
    assert_eq!(names, ["red"]);
    assert_eq!(direct.principal_object_id.as_deref(), Some("uuid-jdoe"));

    let nested = provider.find_nested_parent_groups(&jdoe).await?;
    let mut names: Vec<&str> = nested.groups.iter().map(|g| g.id.name()).collect();
    names.sort_unstable();
    assert_eq!(names, ["blue", "green", "red"]);

    Ok(())
}

/// Direct-only sources answer nested lookups with direct parents.
#[tokio::test]
async fn test_direct_groups_only() -> anyhow::Result<()> {
    let directory = generic_directory();
    directory.add(person("jdoe"));
    directory.add(group("red", &[person_dn("jdoe")]));
    directory.add(group("blue", &[group_dn("red")]));
    let config = LdapConfig {
        flags: ProviderFlags {
            direct_groups_only: true,
            ..ProviderFlags::default()
        },
        ..generic_config()?
    };
    let provider = provider(config, &directory)?;

    let nested = provider
        .find_nested_parent_groups(&PrincipalId::new("jdoe", "example.com"))
        .await?;
    let names: Vec<&str> = nested.groups.iter().map(|g| g.id.name()).collect();
    assert_eq!(names, ["red"]);

    Ok(())
}

/// Members beyond the first range window are read by following the
/// server's ranges until the final window.
#[tokio::test]
async fn test_large_group_members_span_range_windows() -> anyhow::Result<()> {
    let directory = ad_directory().with_range_window(1000);
    let members: Vec<String> = (0..2500).map(|i| ad_dn(&format!("member{i:04}"))).collect();
    directory.add(ad_user("member0000", "first", 2000));
    directory.add(ad_user("member2499", "last", 4499));
    directory.add(ad_group("Everyone Big", 1300, &members));

    let config = LdapConfig {
        range_size: 1000,
        ..ad_config(ProviderFlags::default())?
    };
    let provider = provider(config, &directory)?;
    let group = PrincipalId::new("Everyone Big", "corp.example.com");

    let before = directory.stats().searches;
    let users = provider.find_users_in_group(&group, "", None).await?;
    let mut names: Vec<&str> = users.iter().map(|u| u.id.name()).collect();
    names.sort_unstable();
    assert_eq!(names, ["first", "last"]);
    assert!(directory.stats().searches - before >= 2503);

    let limited = provider.find_users_in_group(&group, "", Some(1)).await?;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id.name(), "first");

    Ok(())
}
