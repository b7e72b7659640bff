//! `labctl serve`: Run the control plane and its operator console.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use labnet_common::config::LabConfig;
use labnet_runtime::backend::RuntimeClient;
use labnet_runtime::backend::docker::DockerCli;
use labnet_runtime::clock::SystemClock;
use labnet_runtime::control_plane::ControlPlane;
use labnet_runtime::events::EventLog;
use tokio::sync::watch;

use crate::console;

/// Arguments for the `serve` command.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// JSON configuration file.
    #[arg(long, env = "LABNET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Lab network name.
    #[arg(long, env = "LABNET_NETWORK")]
    pub network: Option<String>,

    /// Lab subnet in CIDR notation.
    #[arg(long, env = "LABNET_SUBNET")]
    pub subnet: Option<String>,

    /// Gateway address (defaults to the first host).
    #[arg(long, env = "LABNET_GATEWAY")]
    pub gateway: Option<String>,

    /// Reconciler tick period in seconds.
    #[arg(long, env = "LABNET_RECONCILE_INTERVAL")]
    pub reconcile_interval: Option<u64>,

    /// Container runtime CLI executable.
    #[arg(long, env = "LABNET_DOCKER")]
    pub docker: Option<String>,

    /// Do not pull images before deploying.
    #[arg(long)]
    pub no_pull: bool,

    /// Remove every tracked container on exit.
    #[arg(long, env = "LABNET_CLEANUP_ON_SHUTDOWN")]
    pub cleanup_on_shutdown: bool,
}

/// Executes the `serve` command.
///
/// Provisions the lab network, starts the reconciler and reads console
/// commands from stdin until EOF, `quit`, or Ctrl-C.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the runtime is
/// missing, or the lab network cannot be provisioned.
pub async fn execute(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    tracing::info!(
        network = %config.network_name,
        subnet = %config.subnet,
        interval_secs = config.reconcile_interval_secs,
        "starting control plane"
    );

    let runtime = Arc::new(DockerCli::new(config.docker_binary.clone()));
    if !runtime.is_available() {
        anyhow::bail!(
            "container runtime '{}' not found in PATH",
            config.docker_binary
        );
    }

    let events = Arc::new(EventLog::new(config.event_log_capacity));
    let plane = ControlPlane::new(config, runtime, events.clone(), Arc::new(SystemClock))?;
    let network = plane
        .start()
        .await
        .context("failed to provision the lab network")?;
    tracing::info!(network = %network.name, id = %network.id, "lab network ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = plane.spawn_reconciler(shutdown_rx);

    let outcome = console::run(&plane, &events).await;

    let _ = shutdown_tx.send(true);
    reconciler.await.context("reconciler task failed")?;

    if plane.config().cleanup_on_shutdown {
        let removed = plane.coordinator().cleanup_all().await;
        println!("Removed {} container(s) on shutdown.", removed.len());
    }
    outcome
}

/// Builds the effective configuration: file (or defaults), then flags.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the result is invalid.
pub fn load_config(args: &ServeArgs) -> anyhow::Result<LabConfig> {
    let mut config = match &args.config {
        Some(path) => LabConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => LabConfig::default(),
    };

    if let Some(network) = &args.network {
        config.network_name.clone_from(network);
    }
    if let Some(subnet) = &args.subnet {
        config.subnet.clone_from(subnet);
    }
    if args.gateway.is_some() {
        config.gateway.clone_from(&args.gateway);
    }
    if let Some(secs) = args.reconcile_interval {
        config.reconcile_interval_secs = secs;
    }
    if let Some(docker) = &args.docker {
        config.docker_binary.clone_from(docker);
    }
    if args.no_pull {
        config.pull_images = false;
    }
    if args.cleanup_on_shutdown {
        config.cleanup_on_shutdown = true;
    }

    config.validate()?;
    Ok(config)
}
