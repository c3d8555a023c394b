//! Connection probe.

use kc_federation::IdentityProvider;
use kc_federation_ldap::LdapIdentityProvider;

use crate::output::success;

/// Probes the directory with the service account.
pub async fn run_probe(provider: &LdapIdentityProvider) -> crate::CliResult<()> {
    provider.probe_connection().await?;
    success(&format!(
        "Connected to {} (paged search: {:?})",
        provider.domain(),
        provider.capability()
    ));
    Ok(())
}
