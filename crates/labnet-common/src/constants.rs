//! System-wide constants and defaults.

/// Default name of the lab bridge network.
pub const DEFAULT_NETWORK_NAME: &str = "lab-network";

/// Default lab subnet.
pub const DEFAULT_SUBNET: &str = "172.20.0.0/16";

/// Prefix of synthesized container names (`lab-container-<unix-ts>`).
pub const CONTAINER_NAME_PREFIX: &str = "lab-container";

/// Default reconciler tick period in seconds.
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;

/// Default bound on a single runtime call in seconds.
pub const DEFAULT_RUNTIME_TIMEOUT_SECS: u64 = 30;

/// Default bound on an image pull in seconds.
pub const DEFAULT_PULL_TIMEOUT_SECS: u64 = 300;

/// Default number of log lines returned for a container.
pub const DEFAULT_LOG_TAIL_LINES: usize = 100;

/// Default number of control-plane events retained for display.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 100;

/// Default container runtime CLI executable.
pub const DEFAULT_DOCKER_BINARY: &str = "docker";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "labctl";
