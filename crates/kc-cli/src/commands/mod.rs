//! Command implementations.

pub mod attrs;
pub mod group;
pub mod probe;
pub mod user;

pub use attrs::run_attrs;
pub use group::run_group;
pub use probe::run_probe;
pub use user::run_user;

use kc_federation::PrincipalId;

use crate::{CliError, CliResult};

/// Parses a `name@domain` or `DOMAIN\name` argument.
pub fn parse_principal(value: &str) -> CliResult<PrincipalId> {
    PrincipalId::parse(value).map_err(|e| CliError::InvalidArgument(e.to_string()))
}
