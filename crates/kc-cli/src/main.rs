//! # kc-idp
//!
//! Operator tool for directory identity sources.

#![forbid(unsafe_code)]
#![deny(warnings)]
#![allow(clippy::uninlined_format_args)]

use clap::Parser;
use kc_cli::{
    cli::{Cli, Command},
    commands::{run_attrs, run_group, run_probe, run_user},
    config::CliConfig,
    output::{error, prompt_password, Printer},
    CliResult,
};
use kc_federation_ldap::LdapIdentityProvider;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        error(&e.to_string());
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = CliConfig::load(cli.config.as_deref())?;
    let printer = Printer::new(cli.output.unwrap_or(config.output_format));

    let identity_source = config.resolve_credential(|| prompt_password("Bind credential: "))?;
    tracing::debug!(
        domain = %identity_source.name,
        urls = ?identity_source.connection_urls,
        "Loaded identity source"
    );
    let provider = LdapIdentityProvider::new(identity_source)?;

    match cli.command {
        Command::Probe => run_probe(&provider).await,
        Command::User(cmd) => run_user(&provider, cmd, printer).await,
        Command::Group(cmd) => run_group(&provider, cmd, printer).await,
        Command::Attrs {
            principal,
            attributes,
        } => run_attrs(&provider, &principal, &attributes, printer).await,
    }
}
