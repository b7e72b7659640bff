//! Operator console read from stdin while the control plane runs.
//!
//! Each line is split into words with POSIX shell quoting rules and
//! parsed with clap.

use std::io::Write;

use clap::{Parser, Subcommand};
use labnet_common::constants::BIN_NAME;
use labnet_common::error::LabError;
use labnet_runtime::control_plane::ControlPlane;
use labnet_runtime::coordinator::DeploymentCoordinator;
use labnet_runtime::events::EventLog;
use labnet_runtime::request::{DeployRequest, parse_env_pair, parse_volume};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::output;

/// One console line.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, name = "console", disable_version_flag = true)]
pub struct ConsoleLine {
    /// Console command.
    #[command(subcommand)]
    pub command: ConsoleCommand,
}

/// Commands accepted by the console.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Deploy a container on the lab network.
    Deploy {
        /// Image reference.
        image: String,
        /// Container name.
        #[arg(long)]
        name: Option<String>,
        /// Environment variable, KEY=VALUE.
        #[arg(short = 'e', long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
        /// Bind mount, HOST:CONTAINER[:ro].
        #[arg(short = 'v', long = "volume", value_parser = parse_volume)]
        volumes: Vec<(String, String)>,
        /// Command override, after `--`.
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Force-remove a tracked container.
    #[command(alias = "remove")]
    Rm {
        /// Container id, name, or unique id prefix.
        id: String,
    },
    /// List tracked containers.
    #[command(alias = "list")]
    Ps,
    /// Show one tracked container as JSON.
    Inspect {
        /// Container id, name, or unique id prefix.
        id: String,
    },
    /// Print a container's recent output.
    Logs {
        /// Container id, name, or unique id prefix.
        id: String,
        /// Number of lines.
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Remove every tracked container.
    Cleanup,
    /// Show recent control-plane events.
    Events,
    /// Show address and container counters.
    Stats,
    /// Leave the console.
    #[command(alias = "exit")]
    Quit,
}

/// Builds a deploy request from the parsed `deploy` arguments.
fn deploy_request(
    image: String,
    name: Option<String>,
    env: Vec<(String, String)>,
    volumes: Vec<(String, String)>,
    command: Vec<String>,
) -> DeployRequest {
    DeployRequest {
        image,
        name,
        env: env.into_iter().collect(),
        volumes: volumes.into_iter().collect(),
        command: (!command.is_empty()).then_some(command),
    }
}

/// What the loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Print this and read the next line.
    Output(String),
    /// Stop reading.
    Quit,
}

/// Reads and executes console lines until EOF, `quit`, or Ctrl-C.
///
/// # Errors
///
/// Returns an error if stdin cannot be read.
pub async fn run(plane: &ControlPlane, events: &EventLog) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{BIN_NAME} console ready. Type 'help' for commands.");

    loop {
        print!("{BIN_NAME}> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                tracing::info!("interrupted, shutting down");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        match execute(plane, events, command).await {
            Outcome::Output(text) => println!("{text}"),
            Outcome::Quit => break,
        }
    }
    Ok(())
}

/// Parses one console line. Blank lines yield `Ok(None)`; the error is a
/// printable message (including clap's help output).
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let words = shlex::split(line).ok_or("unterminated quote or trailing backslash")?;
    if words.is_empty() {
        return Ok(None);
    }
    ConsoleLine::try_parse_from(words)
        .map(|parsed| Some(parsed.command))
        .map_err(|e| e.render().to_string().trim_end().to_string())
}

/// Runs one console command against the control plane.
pub async fn execute(plane: &ControlPlane, events: &EventLog, command: ConsoleCommand) -> Outcome {
    let coordinator = plane.coordinator();
    let text = match command {
        ConsoleCommand::Deploy {
            image,
            name,
            env,
            volumes,
            command,
        } => {
            let request = deploy_request(image, name, env, volumes, command);
            match coordinator.deploy(request).await {
                Ok(record) => output::format_deployed(&record),
                Err(e) => output::format_error(&e),
            }
        }
        ConsoleCommand::Rm { id } => remove(coordinator, &id)
            .await
            .unwrap_or_else(|e| output::format_error(&e)),
        ConsoleCommand::Ps => {
            let records = coordinator.list().await;
            output::format_records(&records, chrono::Utc::now())
        }
        ConsoleCommand::Inspect { id } => inspect(coordinator, &id)
            .await
            .unwrap_or_else(|e| output::format_error(&e)),
        ConsoleCommand::Logs { id, tail } => logs(coordinator, &id, tail)
            .await
            .unwrap_or_else(|e| output::format_error(&e)),
        ConsoleCommand::Cleanup => {
            let removed = coordinator.cleanup_all().await;
            if removed.is_empty() {
                "Nothing removed.".to_string()
            } else {
                format!("Removed {}: {}", removed.len(), removed.join(", "))
            }
        }
        ConsoleCommand::Events => output::format_events(&events.snapshot()),
        ConsoleCommand::Stats => output::format_stats(&coordinator.stats()),
        ConsoleCommand::Quit => return Outcome::Quit,
    };
    Outcome::Output(text)
}

// `rm`, `inspect` and `logs` accept a full id, a name, or a unique id
// prefix such as the short id `ps` prints.

async fn remove(coordinator: &DeploymentCoordinator, reference: &str) -> Result<String, LabError> {
    let id = coordinator.resolve(reference)?;
    coordinator.remove(&id).await?;
    Ok(format!("Removed {reference}"))
}

async fn inspect(coordinator: &DeploymentCoordinator, reference: &str) -> Result<String, LabError> {
    let id = coordinator.resolve(reference)?;
    let record = coordinator.get(&id).await.ok_or_else(|| LabError::NotFound {
        kind: "container",
        id: reference.to_string(),
    })?;
    Ok(serde_json::to_string_pretty(&record)?)
}

async fn logs(
    coordinator: &DeploymentCoordinator,
    reference: &str,
    tail: Option<usize>,
) -> Result<String, LabError> {
    let id = coordinator.resolve(reference)?;
    let logs = coordinator.logs(&id, tail).await?;
    Ok(logs.trim_end().to_string())
}
