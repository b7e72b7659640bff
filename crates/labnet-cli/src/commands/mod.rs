//! CLI command definitions and dispatch.

pub mod pool;
pub mod serve;

use clap::{Parser, Subcommand};

/// labctl: static-address lab containers on a private bridge network.
#[derive(Parser, Debug)]
#[command(name = "labctl", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "LABNET_LOG_JSON")]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the control plane with an interactive operator console.
    Serve(serve::ServeArgs),
    /// Show the address range a subnet would provide.
    Pool(pool::PoolArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => serve::execute(args).await,
        Command::Pool(args) => pool::execute(&args),
    }
}
