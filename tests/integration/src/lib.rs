//! Directory fixtures shared by the end-to-end scenarios.
//!
//! Every fixture runs against [`MemoryDirectory`], so scenarios need no
//! external server.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::sync::Arc;

use kc_federation_ldap::testing::{MemoryDirectory, StaticTopology};
use kc_federation_ldap::{
    DirectoryEntry, LdapConfig, LdapIdentityProvider, ProviderFlags, SchemaKind, TopologyDiscovery,
};

/// Generic directory user base.
pub const PEOPLE: &str = "ou=people,dc=example,dc=com";
/// Generic directory group base.
pub const GROUPS: &str = "ou=groups,dc=example,dc=com";
/// Active Directory domain root.
pub const AD_ROOT: &str = "DC=corp,DC=example,DC=com";
/// Active Directory users container.
pub const AD_USERS: &str = "CN=Users,DC=corp,DC=example,DC=com";
/// Domain SID prefix of the Active Directory fixture.
pub const DOMAIN_SID: &str = "S-1-5-21-1-2-3";

/// Installs a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("kc_federation_ldap=debug")
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Generic directory
// ============================================================================

/// DN of a generic user.
#[must_use]
pub fn person_dn(uid: &str) -> String {
    format!("uid={uid},{PEOPLE}")
}

/// DN of a generic group.
#[must_use]
pub fn group_dn(cn: &str) -> String {
    format!("cn={cn},{GROUPS}")
}

/// Generic `inetOrgPerson` entry.
#[must_use]
pub fn person(uid: &str) -> DirectoryEntry {
    DirectoryEntry::new(person_dn(uid))
        .with_values("objectClass", ["inetOrgPerson"])
        .with_values("uid", [uid])
        .with_values("mail", [format!("{uid}@example.com")])
        .with_values("entryUUID", [format!("uuid-{uid}")])
}

/// Generic `groupOfUniqueNames` entry.
#[must_use]
pub fn group(cn: &str, members: &[String]) -> DirectoryEntry {
    DirectoryEntry::new(group_dn(cn))
        .with_values("objectClass", ["groupOfUniqueNames"])
        .with_values("cn", [cn])
        .with_values("entryUUID", [format!("uuid-{cn}")])
        .with_values("uniqueMember", members.iter().cloned())
}

/// Generic directory holding only the two organizational units.
#[must_use]
pub fn generic_directory() -> MemoryDirectory {
    let directory = MemoryDirectory::new();
    directory.add(DirectoryEntry::new(PEOPLE).with_values("objectClass", ["organizationalUnit"]));
    directory.add(DirectoryEntry::new(GROUPS).with_values("objectClass", ["organizationalUnit"]));
    directory
}

/// Configuration for the generic directory.
///
/// # Errors
///
/// Fails if the settings do not validate.
pub fn generic_config() -> anyhow::Result<LdapConfig> {
    Ok(LdapConfig::builder()
        .name("example.com")
        .connection_url("ldaps://ldap.example.com:636")
        .bind_dn("cn=svc,dc=example,dc=com")
        .bind_credential("secret")
        .user_base_dn(PEOPLE)
        .group_base_dn(GROUPS)
        .build()?)
}

// ============================================================================
// Active Directory
// ============================================================================

/// DN of an Active Directory object in the users container.
#[must_use]
pub fn ad_dn(cn: &str) -> String {
    format!("CN={cn},{AD_USERS}")
}

/// Binary SID with `rid` under the fixture domain.
#[must_use]
pub fn sid(rid: u32) -> Vec<u8> {
    let mut bytes = vec![1, 5, 0, 0, 0, 0, 0, 5];
    for sub_authority in [21, 1, 2, 3, rid] {
        bytes.extend_from_slice(&sub_authority.to_le_bytes());
    }
    bytes
}

/// Active Directory user entry with a normal account control value.
#[must_use]
pub fn ad_user(cn: &str, account: &str, rid: u32) -> DirectoryEntry {
    ad_user_with_control(cn, account, rid, 512)
}

/// Active Directory user entry with the given `userAccountControl` bits.
#[must_use]
pub fn ad_user_with_control(cn: &str, account: &str, rid: u32, control: u32) -> DirectoryEntry {
    DirectoryEntry::new(ad_dn(cn))
        .with_values("objectClass", ["top", "person", "user"])
        .with_values("sAMAccountName", [account])
        .with_values("userPrincipalName", [format!("{account}@corp.example.com")])
        .with_values("userAccountControl", [control.to_string()])
        .with_values("primaryGroupID", ["513"])
        .with_binary("objectSid", sid(rid))
}

/// Active Directory group entry.
#[must_use]
pub fn ad_group(name: &str, rid: u32, members: &[String]) -> DirectoryEntry {
    DirectoryEntry::new(ad_dn(name))
        .with_values("objectClass", ["top", "group"])
        .with_values("sAMAccountName", [name])
        .with_binary("objectSid", sid(rid))
        .with_values("member", members.iter().cloned())
}

/// Active Directory domain with the domain object and `Domain Users`.
#[must_use]
pub fn ad_directory() -> MemoryDirectory {
    let directory = MemoryDirectory::new();
    directory.add(
        DirectoryEntry::new(AD_ROOT)
            .with_values("objectClass", ["domain"])
            .with_values("maxPwdAge", ["-36288000000000"]),
    );
    directory.add(ad_group("Domain Users", 513, &[]));
    directory
}

/// Configuration for the Active Directory domain.
///
/// # Errors
///
/// Fails if the settings do not validate.
pub fn ad_config(flags: ProviderFlags) -> anyhow::Result<LdapConfig> {
    Ok(LdapConfig::builder()
        .name("corp.example.com")
        .schema(SchemaKind::ActiveDirectory)
        .connection_url("ldaps://dc1.corp.example.com:636")
        .bind_dn("CN=svc,CN=Users,DC=corp,DC=example,DC=com")
        .bind_credential("secret")
        .user_base_dn(AD_USERS)
        .group_base_dn(AD_USERS)
        .flags(flags)
        .build()?)
}

// ============================================================================
// Providers
// ============================================================================

/// Provider over `directory` with static URLs.
///
/// # Errors
///
/// Fails if the configuration is rejected.
pub fn provider(
    config: LdapConfig,
    directory: &MemoryDirectory,
) -> anyhow::Result<LdapIdentityProvider> {
    init_tracing();
    Ok(LdapIdentityProvider::with_transport(
        config,
        Arc::new(directory.clone()),
        None,
    )?)
}

/// Provider over `directory` that locates controllers through `topology`.
///
/// # Errors
///
/// Fails if the configuration is rejected.
pub fn provider_with_topology(
    config: LdapConfig,
    directory: &MemoryDirectory,
    topology: Arc<StaticTopology>,
) -> anyhow::Result<LdapIdentityProvider> {
    init_tracing();
    let topology: Arc<dyn TopologyDiscovery> = topology;
    Ok(LdapIdentityProvider::with_transport(
        config,
        Arc::new(directory.clone()),
        Some(topology),
    )?)
}
