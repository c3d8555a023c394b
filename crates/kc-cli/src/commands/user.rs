//! User commands.

use kc_federation::{IdentityProvider, PersonUser};
use kc_federation_ldap::LdapIdentityProvider;
use serde::Serialize;
use tabled::Tabled;

use super::parse_principal;
use crate::cli::UserCommand;
use crate::config::OutputFormat;
use crate::output::{prompt_password, success, Keyed, Printer};
use crate::{CliError, CliResult};

/// User row for table display.
#[derive(Debug, Tabled, Serialize)]
pub struct UserRow {
    /// Principal name.
    #[tabled(rename = "PRINCIPAL")]
    pub principal: String,
    /// Object id.
    #[tabled(rename = "OBJECT ID")]
    pub object_id: String,
    /// Email.
    #[tabled(rename = "EMAIL")]
    pub email: String,
    /// Display name.
    #[tabled(rename = "NAME")]
    pub name: String,
    /// Disabled flag.
    #[tabled(rename = "DISABLED")]
    pub disabled: bool,
    /// Locked flag.
    #[tabled(rename = "LOCKED")]
    pub locked: bool,
}

impl From<&PersonUser> for UserRow {
    fn from(user: &PersonUser) -> Self {
        let name = [&user.detail.first_name, &user.detail.last_name]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            principal: user.id.to_string(),
            object_id: user.object_id.clone().unwrap_or_default(),
            email: user.detail.email.clone().unwrap_or_default(),
            name,
            disabled: user.disabled,
            locked: user.locked,
        }
    }
}

impl Keyed for UserRow {
    fn key(&self) -> &str {
        &self.principal
    }
}

/// Runs a user command.
pub async fn run_user(
    provider: &LdapIdentityProvider,
    command: UserCommand,
    printer: Printer,
) -> CliResult<()> {
    match command {
        UserCommand::Get { principal } => {
            let user = provider.find_user(&parse_principal(&principal)?).await?;
            printer.item(&user)
        }
        UserCommand::GetById { object_id } => {
            let user = provider.find_user_by_object_id(&object_id).await?;
            printer.item(&user)
        }
        UserCommand::Find { search, max } => {
            let users = provider.find_users(&search, max).await?;
            print_users(&users, printer)
        }
        UserCommand::Disabled { search, max } => {
            let users = provider.find_disabled_users(&search, max).await?;
            print_users(&users, printer)
        }
        UserCommand::Locked { search, max } => {
            let users = provider.find_locked_users(&search, max).await?;
            print_users(&users, printer)
        }
        UserCommand::Status { principal } => {
            let status = provider.account_status(&parse_principal(&principal)?).await?;
            printer.item(&status)
        }
        UserCommand::Authenticate { principal } => {
            let principal = parse_principal(&principal)?;
            let password = prompt_password(&format!("Password for {principal}: "))?;
            if password.is_empty() {
                return Err(CliError::InvalidArgument("password is required".into()));
            }
            let canonical = provider.authenticate(&principal, &password).await?;
            if printer.format() == OutputFormat::Quiet {
                println!("{canonical}");
            } else {
                success(&format!("Authenticated as {canonical}"));
            }
            Ok(())
        }
    }
}

pub(crate) fn print_users(users: &[PersonUser], printer: Printer) -> CliResult<()> {
    let rows: Vec<UserRow> = users.iter().map(UserRow::from).collect();
    printer.rows(&rows)
}
