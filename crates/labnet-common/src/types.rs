//! Domain primitive types used across the labnet workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a container, as assigned by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the 12-character short form used in human-facing output.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle status of a tracked container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerStatus {
    /// Created by the runtime but not yet running.
    Starting,
    /// Actively running.
    Running,
    /// The runtime is restarting the container.
    Restarting,
    /// Processes are frozen by the runtime.
    Paused,
    /// The main process finished.
    Exited,
    /// The container disappeared from the runtime without a remove request.
    RemovedExternally,
}

impl ContainerStatus {
    /// Returns `true` for states the reconciler evicts.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exited | Self::RemovedExternally)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Restarting => write!(f, "restarting"),
            Self::Paused => write!(f, "paused"),
            Self::Exited => write!(f, "exited"),
            Self::RemovedExternally => write!(f, "removed-externally"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates_long_ids() {
        let id = ContainerId::new("4f2a9c0e1b7d5a3c8e6f0a1b2c3d4e5f");
        assert_eq!(id.short(), "4f2a9c0e1b7d");
    }

    #[test]
    fn short_id_keeps_short_ids() {
        let id = ContainerId::new("abc");
        assert_eq!(id.short(), "abc");
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&ContainerStatus::RemovedExternally).unwrap();
        assert_eq!(json, "\"removed-externally\"");
        assert_eq!(ContainerStatus::RemovedExternally.to_string(), "removed-externally");
    }

    #[test]
    fn only_exited_and_removed_are_terminal() {
        assert!(ContainerStatus::Exited.is_terminal());
        assert!(ContainerStatus::RemovedExternally.is_terminal());
        assert!(!ContainerStatus::Running.is_terminal());
        assert!(!ContainerStatus::Restarting.is_terminal());
    }
}
