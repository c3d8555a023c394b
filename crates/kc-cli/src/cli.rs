//! CLI argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::OutputFormat;

/// kc-idp - probe tool for directory identity sources.
#[derive(Debug, Parser)]
#[command(name = "kc-idp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to ~/.keycloak/idp.toml).
    #[arg(short, long, env = "KC_IDP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format (overrides config).
    #[arg(short, long, value_enum)]
    pub output: Option<OutputFormat>,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check that the directory is reachable with the service account.
    Probe,

    /// User commands.
    #[command(subcommand)]
    User(UserCommand),

    /// Group commands.
    #[command(subcommand)]
    Group(GroupCommand),

    /// Resolve attributes of a user.
    Attrs {
        /// Principal (`name@domain` or `DOMAIN\name`).
        principal: String,

        /// Logical attribute names.
        #[arg(required = true)]
        attributes: Vec<String>,
    },
}

/// User commands.
#[derive(Debug, Subcommand)]
pub enum UserCommand {
    /// Look up one user.
    Get {
        /// Principal (`name@domain` or `DOMAIN\name`).
        principal: String,
    },

    /// Look up a user by object id.
    GetById {
        /// Entry UUID or SID string.
        object_id: String,
    },

    /// Search users by name.
    Find {
        /// Search text; empty matches every user.
        #[arg(default_value = "")]
        search: String,

        /// Maximum results.
        #[arg(long)]
        max: Option<usize>,
    },

    /// Decode the account status of a user.
    Status {
        /// Principal.
        principal: String,
    },

    /// Check a user's password.
    Authenticate {
        /// Principal.
        principal: String,
    },

    /// List disabled users.
    Disabled {
        /// Search text.
        #[arg(default_value = "")]
        search: String,

        /// Maximum results.
        #[arg(long)]
        max: Option<usize>,
    },

    /// List locked users.
    Locked {
        /// Search text.
        #[arg(default_value = "")]
        search: String,

        /// Maximum results.
        #[arg(long)]
        max: Option<usize>,
    },
}

/// Group commands.
#[derive(Debug, Subcommand)]
pub enum GroupCommand {
    /// Look up one group.
    Get {
        /// Group principal.
        principal: String,
    },

    /// Search groups by name or description.
    Find {
        /// Search text; empty matches every group.
        #[arg(default_value = "")]
        search: String,

        /// Maximum results.
        #[arg(long)]
        max: Option<usize>,
    },

    /// Groups a user or group belongs to.
    Parents {
        /// Principal.
        principal: String,

        /// Include groups of groups.
        #[arg(long)]
        nested: bool,
    },

    /// Direct members of a group.
    Members {
        /// Group principal.
        group: String,

        /// Search text.
        #[arg(long, default_value = "")]
        search: String,

        /// List member groups instead of member users.
        #[arg(long)]
        groups: bool,

        /// Maximum results.
        #[arg(long)]
        max: Option<usize>,
    },
}
