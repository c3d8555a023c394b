//! Attribute resolution.

use kc_federation::{AttributeValuePair, IdentityProvider};
use kc_federation_ldap::LdapIdentityProvider;
use serde::Serialize;
use tabled::Tabled;

use super::parse_principal;
use crate::config::OutputFormat;
use crate::output::{Keyed, Printer};

/// Attribute row for table display.
#[derive(Debug, Tabled, Serialize)]
pub struct AttributeRow {
    /// Attribute name.
    #[tabled(rename = "ATTRIBUTE")]
    pub name: String,
    /// Values, one per line.
    #[tabled(rename = "VALUES")]
    pub values: String,
}

impl From<AttributeValuePair> for AttributeRow {
    fn from(pair: AttributeValuePair) -> Self {
        Self {
            name: pair.name,
            values: pair.values.join("\n"),
        }
    }
}

impl Keyed for AttributeRow {
    fn key(&self) -> &str {
        &self.name
    }
}

/// Resolves the named attributes of a user.
pub async fn run_attrs(
    provider: &LdapIdentityProvider,
    principal: &str,
    attributes: &[String],
    printer: Printer,
) -> crate::CliResult<()> {
    let principal = parse_principal(principal)?;
    let pairs = provider.get_attributes(&principal, attributes).await?;
    if printer.format() == OutputFormat::Json {
        return printer.item(&pairs);
    }
    let rows: Vec<AttributeRow> = pairs.into_iter().map(AttributeRow::from).collect();
    printer.rows(&rows)
}
