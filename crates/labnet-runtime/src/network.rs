//! Create-or-get of the lab bridge network.

use std::sync::Arc;
use std::time::Duration;

use labnet_common::error::{LabError, Result};
use tokio::sync::Mutex;

use crate::backend::{NetworkHandle, NetworkSpec, RuntimeClient, RuntimeError, with_timeout};

/// Makes sure the lab network exists, and remembers it once it does.
pub struct NetworkProvisioner {
    runtime: Arc<dyn RuntimeClient>,
    spec: NetworkSpec,
    timeout: Duration,
    cached: Mutex<Option<NetworkHandle>>,
}

impl NetworkProvisioner {
    /// Creates a provisioner for `spec`.
    pub fn new(runtime: Arc<dyn RuntimeClient>, spec: NetworkSpec, timeout: Duration) -> Self {
        Self {
            runtime,
            spec,
            timeout,
            cached: Mutex::new(None),
        }
    }

    /// The desired network.
    pub const fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    /// Looks the network up by name and creates it if absent. Calling it
    /// again returns the same network without touching the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::NetworkProvision`] if the lookup or creation
    /// fails, or an existing network of that name uses another subnet.
    pub async fn ensure_network(&self) -> Result<NetworkHandle> {
        let mut cached = self.cached.lock().await;
        if let Some(handle) = cached.as_ref() {
            return Ok(handle.clone());
        }

        let handle = match self.lookup().await? {
            Some(existing) => {
                tracing::info!(network = %existing.name, id = %existing.id, "using existing network");
                existing
            }
            None => self.create().await?,
        };
        self.check_subnet(&handle)?;
        *cached = Some(handle.clone());
        Ok(handle)
    }

    async fn lookup(&self) -> Result<Option<NetworkHandle>> {
        with_timeout(
            "inspect-network",
            self.timeout,
            self.runtime.find_network(&self.spec.name),
        )
        .await
        .map_err(|e| self.provision_error(&e))
    }

    async fn create(&self) -> Result<NetworkHandle> {
        let created = with_timeout(
            "create-network",
            self.timeout,
            self.runtime.create_network(&self.spec),
        )
        .await;
        match created {
            Ok(handle) => {
                tracing::info!(
                    network = %handle.name,
                    subnet = %self.spec.subnet,
                    gateway = %self.spec.gateway,
                    "created network"
                );
                Ok(handle)
            }
            // Lost a race with another creator; take theirs.
            Err(RuntimeError::AlreadyExists { .. }) => self.lookup().await?.ok_or_else(|| {
                LabError::NetworkProvision {
                    network: self.spec.name.clone(),
                    message: "network reported as existing but cannot be found".into(),
                }
            }),
            Err(e) => Err(self.provision_error(&e)),
        }
    }

    fn check_subnet(&self, handle: &NetworkHandle) -> Result<()> {
        match handle.subnet {
            Some(subnet) if subnet != self.spec.subnet => Err(LabError::NetworkProvision {
                network: self.spec.name.clone(),
                message: format!(
                    "existing network uses subnet {subnet}, expected {}",
                    self.spec.subnet
                ),
            }),
            _ => Ok(()),
        }
    }

    fn provision_error(&self, e: &RuntimeError) -> LabError {
        LabError::NetworkProvision {
            network: self.spec.name.clone(),
            message: e.to_string(),
        }
    }
}

impl std::fmt::Debug for NetworkProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkProvisioner")
            .field("spec", &self.spec)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
