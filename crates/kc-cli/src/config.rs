//! CLI configuration.
//!
//! The identity-source descriptor lives in a TOML file, by default
//! `~/.keycloak/idp.toml`:
//!
//! ```toml
//! output_format = "table"
//!
//! [identity_source]
//! name = "corp.example.com"
//! schema = "active_directory"
//! connection_urls = ["ldaps://dc1.corp.example.com:636"]
//! bind_dn = "CN=svc-idp,CN=Users,DC=corp,DC=example,DC=com"
//! user_base_dn = "CN=Users,DC=corp,DC=example,DC=com"
//! group_base_dn = "CN=Users,DC=corp,DC=example,DC=com"
//! ```
//!
//! The bind credential is read from `KC_IDP_BIND_CREDENTIAL` or prompted
//! for; it is never written back to disk.

use std::path::{Path, PathBuf};

use kc_federation_ldap::LdapConfig;
use serde::{Deserialize, Serialize};

use crate::{CliError, CliResult};

/// Environment variable holding the service bind credential.
pub const BIND_CREDENTIAL_ENV: &str = "KC_IDP_BIND_CREDENTIAL";

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Default output format.
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Identity source to operate on.
    pub identity_source: LdapConfig,
}

impl CliConfig {
    /// Loads configuration from `path`, or from the default location.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if !path.exists() {
            return Err(CliError::Config(format!(
                "no configuration at {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration text.
    pub fn from_toml(content: &str) -> CliResult<Self> {
        toml::from_str(content)
            .map_err(|e| CliError::Config(format!("failed to parse config: {e}")))
    }

    /// Gets the default configuration file path.
    pub fn config_path() -> CliResult<PathBuf> {
        let home = dirs_next::home_dir()
            .ok_or_else(|| CliError::Config("could not determine home directory".to_string()))?;
        Ok(home.join(".keycloak").join("idp.toml"))
    }

    /// Identity source with the bind credential filled in.
    ///
    /// `prompt` is only called when neither the file nor the environment
    /// supplies a credential.
    pub fn resolve_credential(
        mut self,
        prompt: impl FnOnce() -> CliResult<String>,
    ) -> CliResult<LdapConfig> {
        if self.identity_source.bind_credential.is_empty() {
            self.identity_source.bind_credential = match std::env::var(BIND_CREDENTIAL_ENV) {
                Ok(credential) if !credential.is_empty() => credential,
                _ => prompt()?,
            };
        }
        Ok(self.identity_source)
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
    /// Quiet (minimal output).
    Quiet,
}
