//! Configuration model for the labnet control plane.
//!
//! Values come from an optional JSON file, are overridden by CLI flags,
//! and are checked once at startup with [`LabConfig::validate`].

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{LabError, Result};

/// Root configuration for the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LabConfig {
    /// Name of the lab bridge network.
    pub network_name: String,
    /// Lab subnet in CIDR notation.
    pub subnet: String,
    /// Explicit gateway address. Defaults to the first host of the subnet.
    pub gateway: Option<String>,
    /// Optional cap on the number of candidate addresses.
    pub max_pool_size: Option<usize>,
    /// Reconciler tick period in seconds.
    pub reconcile_interval_secs: u64,
    /// Bound on each runtime call in seconds.
    pub runtime_timeout_secs: u64,
    /// Bound on an image pull in seconds.
    pub pull_timeout_secs: u64,
    /// Default number of log lines returned for a container.
    pub log_tail_lines: usize,
    /// Number of control-plane events retained for display.
    pub event_log_capacity: usize,
    /// Pull the image before creating the container.
    pub pull_images: bool,
    /// Remove every tracked container when the process exits.
    pub cleanup_on_shutdown: bool,
    /// Container runtime CLI executable.
    pub docker_binary: String,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            network_name: constants::DEFAULT_NETWORK_NAME.to_string(),
            subnet: constants::DEFAULT_SUBNET.to_string(),
            gateway: None,
            max_pool_size: None,
            reconcile_interval_secs: constants::DEFAULT_RECONCILE_INTERVAL_SECS,
            runtime_timeout_secs: constants::DEFAULT_RUNTIME_TIMEOUT_SECS,
            pull_timeout_secs: constants::DEFAULT_PULL_TIMEOUT_SECS,
            log_tail_lines: constants::DEFAULT_LOG_TAIL_LINES,
            event_log_capacity: constants::DEFAULT_EVENT_LOG_CAPACITY,
            pull_images: true,
            cleanup_on_shutdown: false,
            docker_binary: constants::DEFAULT_DOCKER_BINARY.to_string(),
        }
    }
}

impl LabConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LabError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Checks every value that would otherwise fail later at startup.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.network_name.trim().is_empty() {
            return Err(LabError::config("network_name must not be empty"));
        }
        let subnet = self.subnet()?;
        let _ = self.gateway_in(subnet)?;
        if self.max_pool_size == Some(0) {
            return Err(LabError::config("max_pool_size must be greater than 0"));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(LabError::config(
                "reconcile_interval_secs must be greater than 0",
            ));
        }
        if self.runtime_timeout_secs == 0 || self.pull_timeout_secs == 0 {
            return Err(LabError::config("runtime timeouts must be greater than 0"));
        }
        if self.event_log_capacity == 0 {
            return Err(LabError::config("event_log_capacity must be greater than 0"));
        }
        if self.docker_binary.trim().is_empty() {
            return Err(LabError::config("docker_binary must not be empty"));
        }
        Ok(())
    }

    /// Returns the parsed lab subnet.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Config`] if the subnet is malformed.
    pub fn subnet(&self) -> Result<Ipv4Net> {
        parse_subnet(&self.subnet)
    }

    /// Returns the gateway address, defaulting to the first host.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Config`] if the subnet or gateway is malformed,
    /// or the gateway is not a host address of the subnet.
    pub fn gateway(&self) -> Result<Ipv4Addr> {
        self.gateway_in(self.subnet()?)
    }

    fn gateway_in(&self, subnet: Ipv4Net) -> Result<Ipv4Addr> {
        match &self.gateway {
            Some(raw) => parse_gateway(raw, subnet),
            None => first_host(subnet),
        }
    }

    /// Reconciler tick period.
    pub const fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Bound on a single runtime call.
    pub const fn runtime_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime_timeout_secs)
    }

    /// Bound on an image pull.
    pub const fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

/// Parses an IPv4 CIDR string. Host bits are cleared (`172.20.3.4/16`
/// becomes `172.20.0.0/16`).
///
/// # Errors
///
/// Returns [`LabError::Config`] if the value is not an IPv4 CIDR.
pub fn parse_subnet(raw: &str) -> Result<Ipv4Net> {
    raw.trim()
        .parse::<Ipv4Net>()
        .map(|net| net.trunc())
        .map_err(|e| LabError::config(format!("malformed subnet '{raw}': {e}")))
}

/// Parses a gateway address and checks it is a host address of `subnet`.
///
/// # Errors
///
/// Returns [`LabError::Config`] if the value is not an IPv4 address or
/// lies outside the subnet's host range.
pub fn parse_gateway(raw: &str, subnet: Ipv4Net) -> Result<Ipv4Addr> {
    let gateway: Ipv4Addr = raw
        .trim()
        .parse()
        .map_err(|e| LabError::config(format!("malformed gateway '{raw}': {e}")))?;
    if !subnet.contains(&gateway) || gateway == subnet.network() || gateway == subnet.broadcast()
    {
        return Err(LabError::config(format!(
            "gateway {gateway} is not a host address of {subnet}"
        )));
    }
    Ok(gateway)
}

fn first_host(subnet: Ipv4Net) -> Result<Ipv4Addr> {
    subnet
        .hosts()
        .next()
        .ok_or_else(|| LabError::config(format!("subnet {subnet} has no host addresses")))
}
