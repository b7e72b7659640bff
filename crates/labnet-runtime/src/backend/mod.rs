//! Container runtime abstraction.
//!
//! The control plane never talks to a container engine directly; it goes
//! through [`RuntimeClient`] so the engine can be swapped (or mocked in
//! tests) without touching allocation or tracking logic.

pub mod docker;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use labnet_common::types::{ContainerId, ContainerStatus};
use thiserror::Error;

/// Errors reported by a [`RuntimeClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The container or network does not exist.
    #[error("no such {kind}: {id}")]
    NotFound {
        /// Resource kind (`container`, `network`).
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The image reference cannot be resolved.
    #[error("image not found: {image}")]
    ImageNotFound {
        /// Image reference.
        image: String,
    },

    /// A resource with the same name already exists.
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// Resource kind (`container`, `network`).
        kind: &'static str,
        /// Conflicting name.
        name: String,
    },

    /// The call did not complete within its deadline.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Runtime operation name.
        operation: &'static str,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// The runtime cannot be reached at all.
    #[error("runtime unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The runtime rejected the call.
    #[error("{operation} failed: {message}")]
    Failed {
        /// Runtime operation name.
        operation: &'static str,
        /// Runtime error output.
        message: String,
    },
}

impl RuntimeError {
    /// Returns `true` if the error means the resource is already gone.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias for runtime calls.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Everything the runtime needs to create and start one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Network to attach to.
    pub network: String,
    /// Static address on `network`.
    pub address: Ipv4Addr,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Bind mounts, host path to container path (optionally `:ro`).
    pub volumes: BTreeMap<String, String>,
    /// Command override.
    pub command: Option<Vec<String>>,
}

/// State of a freshly started container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Runtime-assigned identifier.
    pub id: ContainerId,
    /// Address on the lab network, if the runtime reports one.
    pub address: Option<Ipv4Addr>,
    /// Reported status.
    pub status: RuntimeStatus,
    /// Exposed ports from the image metadata (`80/tcp`, ...).
    pub exposed_ports: Vec<String>,
}

/// Container status as the runtime names it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuntimeStatus {
    /// Created, not started.
    Created,
    /// Running.
    Running,
    /// Being restarted by the runtime.
    Restarting,
    /// Frozen.
    Paused,
    /// Main process finished.
    Exited,
    /// Could not be stopped or removed cleanly.
    Dead,
    /// Removal in progress.
    Removing,
    /// Anything else.
    Unknown(String),
}

impl RuntimeStatus {
    /// Parses the runtime's status string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            "removing" => Self::Removing,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Returns `true` once the container will not run again on its own.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Exited | Self::Dead)
    }

    /// Maps to the tracked status, or `None` when it carries no usable
    /// information (`removing`, unknown strings).
    #[must_use]
    pub const fn tracked_status(&self) -> Option<ContainerStatus> {
        match self {
            Self::Created => Some(ContainerStatus::Starting),
            Self::Running => Some(ContainerStatus::Running),
            Self::Restarting => Some(ContainerStatus::Restarting),
            Self::Paused => Some(ContainerStatus::Paused),
            Self::Exited | Self::Dead => Some(ContainerStatus::Exited),
            Self::Removing | Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Restarting => write!(f, "restarting"),
            Self::Paused => write!(f, "paused"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Removing => write!(f, "removing"),
            Self::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// Desired shape of the lab bridge network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    /// Network name.
    pub name: String,
    /// Subnet handed to the runtime's IPAM.
    pub subnet: Ipv4Net,
    /// Gateway address.
    pub gateway: Ipv4Addr,
}

/// A network known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    /// Runtime-assigned identifier.
    pub id: String,
    /// Network name.
    pub name: String,
    /// Driver (`bridge`).
    pub driver: String,
    /// Configured subnet, if any.
    pub subnet: Option<Ipv4Net>,
    /// Configured gateway, if any.
    pub gateway: Option<Ipv4Addr>,
}

/// Narrow interface to the container runtime.
///
/// Implementors handle the engine-specific details of image, container,
/// and network management. None of these calls carry a deadline; callers
/// wrap them with [`with_timeout`].
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Pulls an image.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ImageNotFound`] if the reference cannot be
    /// resolved, or another error if the pull fails.
    async fn pull_image(&self, image: &str) -> RuntimeResult<()>;

    /// Creates and starts a container attached to the lab network,
    /// without publishing host ports.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ImageNotFound`] for unknown images and
    /// [`RuntimeError::AlreadyExists`] for name conflicts.
    async fn create_and_start(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle>;

    /// Returns the live status of a container.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if the container no longer exists.
    async fn status(&self, id: &ContainerId) -> RuntimeResult<RuntimeStatus>;

    /// Deletes a container, stopping it first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if the container no longer exists.
    async fn force_remove(&self, id: &ContainerId) -> RuntimeResult<()>;

    /// Returns the last `tail` lines of the container's output.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotFound`] if the container no longer exists.
    async fn fetch_logs(&self, id: &ContainerId, tail: usize) -> RuntimeResult<String>;

    /// Looks up a network by name.
    ///
    /// # Errors
    ///
    /// Returns an error only if the lookup itself fails; an absent network
    /// is `Ok(None)`.
    async fn find_network(&self, name: &str) -> RuntimeResult<Option<NetworkHandle>>;

    /// Creates an attachable bridge network.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AlreadyExists`] if the name is taken.
    async fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<NetworkHandle>;

    /// Returns whether the runtime is usable on this host.
    fn is_available(&self) -> bool;
}

/// Runs a runtime call with a deadline.
///
/// # Errors
///
/// Returns [`RuntimeError::Timeout`] if `after` elapses first, otherwise
/// the call's own result.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, call: F) -> RuntimeResult<T>
where
    F: Future<Output = RuntimeResult<T>>,
{
    tokio::time::timeout(after, call)
        .await
        .unwrap_or(Err(RuntimeError::Timeout { operation, after }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_status_parses_known_states() {
        assert_eq!(RuntimeStatus::parse("running"), RuntimeStatus::Running);
        assert_eq!(RuntimeStatus::parse(" Exited\n"), RuntimeStatus::Exited);
        assert_eq!(
            RuntimeStatus::parse("zombie"),
            RuntimeStatus::Unknown("zombie".into())
        );
    }

    #[test]
    fn dead_maps_to_exited() {
        assert!(RuntimeStatus::Dead.is_finished());
        assert_eq!(
            RuntimeStatus::Dead.tracked_status(),
            Some(ContainerStatus::Exited)
        );
    }

    #[test]
    fn removing_carries_no_tracked_status() {
        assert_eq!(RuntimeStatus::Removing.tracked_status(), None);
        assert!(!RuntimeStatus::Removing.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_reports_operation() {
        let result: RuntimeResult<()> = with_timeout("status", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(
            result,
            Err(RuntimeError::Timeout {
                operation: "status",
                after: Duration::from_secs(5)
            })
        );
    }

    #[tokio::test]
    async fn with_timeout_passes_result_through() {
        let result = with_timeout("logs", Duration::from_secs(5), async {
            Ok::<_, RuntimeError>("hello".to_string())
        })
        .await;
        assert_eq!(result.as_deref(), Ok("hello"));
    }
}
