//! Group commands.

use kc_federation::{Group, IdentityProvider, PrincipalGroupLookupInfo};
use kc_federation_ldap::LdapIdentityProvider;
use serde::Serialize;
use tabled::Tabled;

use super::parse_principal;
use crate::cli::GroupCommand;
use crate::output::{Keyed, Printer};
use crate::{CliError, CliResult};

/// Group row for table display.
#[derive(Debug, Tabled, Serialize)]
pub struct GroupRow {
    /// Principal name.
    #[tabled(rename = "PRINCIPAL")]
    pub principal: String,
    /// Object id.
    #[tabled(rename = "OBJECT ID")]
    pub object_id: String,
    /// Description.
    #[tabled(rename = "DESCRIPTION")]
    pub description: String,
}

impl From<&Group> for GroupRow {
    fn from(group: &Group) -> Self {
        Self {
            principal: group.id.to_string(),
            object_id: group.object_id.clone().unwrap_or_default(),
            description: group
                .detail
                .as_ref()
                .and_then(|d| d.description.clone())
                .unwrap_or_default(),
        }
    }
}

impl Keyed for GroupRow {
    fn key(&self) -> &str {
        &self.principal
    }
}

/// Runs a group command.
pub async fn run_group(
    provider: &LdapIdentityProvider,
    command: GroupCommand,
    printer: Printer,
) -> CliResult<()> {
    match command {
        GroupCommand::Get { principal } => {
            let group = provider
                .find_group(&parse_principal(&principal)?)
                .await?
                .ok_or_else(|| CliError::NotFound {
                    resource_type: "Group".into(),
                    id: principal,
                })?;
            printer.item(&group)
        }
        GroupCommand::Find { search, max } => {
            let groups = provider.find_groups(&search, max).await?;
            print_groups(groups.iter(), printer)
        }
        GroupCommand::Parents { principal, nested } => {
            let principal = parse_principal(&principal)?;
            let info = if nested {
                provider.find_nested_parent_groups(&principal).await?
            } else {
                provider.find_direct_parent_groups(&principal).await?
            };
            print_lookup(&info, printer)
        }
        GroupCommand::Members {
            group,
            search,
            groups,
            max,
        } => {
            let group = parse_principal(&group)?;
            if groups {
                let members = provider.find_groups_in_group(&group, &search, max).await?;
                print_groups(members.iter(), printer)
            } else {
                let members = provider.find_users_in_group(&group, &search, max).await?;
                super::user::print_users(&members, printer)
            }
        }
    }
}

fn print_lookup(info: &PrincipalGroupLookupInfo, printer: Printer) -> CliResult<()> {
    let mut groups: Vec<&Group> = info.groups.iter().collect();
    groups.sort_by_key(|g| g.id.to_string().to_lowercase());
    print_groups(groups.into_iter(), printer)
}

fn print_groups<'a>(groups: impl Iterator<Item = &'a Group>, printer: Printer) -> CliResult<()> {
    let rows: Vec<GroupRow> = groups.map(GroupRow::from).collect();
    printer.rows(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kc_federation::{GroupDetail, PrincipalId};

    #[test]
    fn row_uses_description_when_present() {
        let group = Group {
            id: PrincipalId::new("ops", "corp.example.com"),
            alias: None,
            object_id: None,
            detail: Some(GroupDetail {
                description: Some("Operations".into()),
            }),
        };
        let row = GroupRow::from(&group);
        assert_eq!(row.principal, "ops@corp.example.com");
        assert_eq!(row.description, "Operations");
        assert_eq!(row.object_id, "");
    }
}
