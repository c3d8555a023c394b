//! # kc-cli
//!
//! Operator tool for directory identity sources.
//!
//! `kc-idp` loads an identity-source descriptor from TOML and runs the
//! provider operations against the live directory:
//! - Connection probes
//! - User lookups, searches, status checks and password checks
//! - Group lookups, memberships and parent groups
//! - Attribute resolution

#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(missing_docs)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;

pub use cli::Cli;
pub use config::CliConfig;
pub use error::{CliError, CliResult};
