//! Wordhoard CLI - operator tool for the authorization service.
//!
//! Talks to the `PolicyAdmin` gRPC API: decisions, policy tuples, roles,
//! and a live feed of policy changes.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use client::Credential;
use commands::{check, config, policy, role, watch};
use output::OutputFormat;

/// Wordhoard authorization admin
#[derive(Parser)]
#[command(
    name = "wordhoard",
    version,
    about = "Wordhoard authorization admin",
    long_about = "Inspect and change who may do what on the Wordhoard platform.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Admin API address
    #[arg(long, global = true, env = "WORDHOARD_SERVER")]
    server: Option<String>,

    /// Call as this user id (sent in the identity header)
    #[arg(long, global = true, env = "WORDHOARD_USER_ID")]
    user_id: Option<u64>,

    /// Bearer token; takes precedence over --user-id
    #[arg(long, global = true, env = "WORDHOARD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask whether a subject may perform an action on a resource
    Check(check::CheckArgs),

    /// Policy tuple management
    #[command(subcommand)]
    Policy(policy::PolicyCommands),

    /// Role graph and user assignments
    #[command(subcommand)]
    Role(role::RoleCommands),

    /// Stream policy changes
    Watch,

    /// Local CLI configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.output;

    // Config commands never need the server.
    let command = match cli.command {
        Commands::Config(cmd) => return config::execute(cmd, format).await,
        other => other,
    };

    let stored = config::load_config()?;
    let server = cli
        .server
        .or_else(|| stored.server().map(str::to_string))
        .unwrap_or_else(|| config::DEFAULT_SERVER.to_string());

    let credential = match (cli.token, cli.user_id) {
        (Some(token), _) => Credential::Bearer(token),
        (None, Some(user_id)) => match stored.credential()? {
            Credential::UserId { header, .. } => Credential::UserId { header, user_id },
            _ => Credential::UserId {
                header: "x-user-id".to_string(),
                user_id,
            },
        },
        (None, None) => stored.credential()?,
    };

    let mut client = client::connect(&server, &credential).await?;

    match command {
        Commands::Check(args) => check::execute(args, &mut client, format).await,
        Commands::Policy(cmd) => policy::execute(cmd, &mut client, format).await,
        Commands::Role(cmd) => role::execute(cmd, &mut client, format).await,
        Commands::Watch => watch::execute(&mut client, format).await,
        Commands::Config(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_persist_parses() {
        let cli = Cli::try_parse_from(["wordhoard", "policy", "persist"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Policy(policy::PolicyCommands::Persist)
        ));
    }
}
