//! Context object holding every control-plane component.

use std::sync::Arc;

use labnet_common::config::LabConfig;
use labnet_common::error::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{NetworkHandle, NetworkSpec, RuntimeClient};
use crate::clock::Clock;
use crate::coordinator::{CoordinatorSettings, DeploymentCoordinator};
use crate::events::{EventReporter, EventSink};
use crate::network::NetworkProvisioner;
use crate::pool::AddressPool;
use crate::reconciler::LifecycleReconciler;
use crate::registry::ContainerRegistry;

/// Everything built once at startup and shared by the request path and
/// the reconciler.
#[derive(Debug)]
pub struct ControlPlane {
    config: LabConfig,
    pool: Arc<AddressPool>,
    registry: Arc<ContainerRegistry>,
    network: Arc<NetworkProvisioner>,
    coordinator: Arc<DeploymentCoordinator>,
    reconciler: Arc<LifecycleReconciler>,
    events: EventReporter,
}

impl ControlPlane {
    /// Validates `config` and builds the components around `runtime`.
    ///
    /// # Errors
    ///
    /// Returns [`labnet_common::error::LabError::Config`] if the
    /// configuration is invalid.
    pub fn new(
        config: LabConfig,
        runtime: Arc<dyn RuntimeClient>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(AddressPool::from_config(&config)?);
        let registry = Arc::new(ContainerRegistry::new());
        let events = EventReporter::new(sink, clock);

        let network = Arc::new(NetworkProvisioner::new(
            Arc::clone(&runtime),
            NetworkSpec {
                name: config.network_name.clone(),
                subnet: pool.subnet(),
                gateway: pool.gateway(),
            },
            config.runtime_timeout(),
        ));
        let coordinator = Arc::new(DeploymentCoordinator::new(
            Arc::clone(&runtime),
            Arc::clone(&pool),
            Arc::clone(&registry),
            Arc::clone(&network),
            events.clone(),
            CoordinatorSettings::from_config(&config),
        ));
        let reconciler = Arc::new(LifecycleReconciler::new(
            runtime,
            Arc::clone(&pool),
            Arc::clone(&registry),
            events.clone(),
            config.reconcile_interval(),
            config.runtime_timeout(),
        ));

        Ok(Self {
            config,
            pool,
            registry,
            network,
            coordinator,
            reconciler,
            events,
        })
    }

    /// Provisions the lab network. A failure here should stop the process.
    ///
    /// # Errors
    ///
    /// Returns [`labnet_common::error::LabError::NetworkProvision`] if the
    /// network cannot be found or created.
    pub async fn start(&self) -> Result<NetworkHandle> {
        let handle = self.network.ensure_network().await.inspect_err(|e| {
            self.events.error(format!("Failed to set up network: {e}"));
        })?;
        let (first, last) = self.pool.bounds();
        self.events.info(format!(
            "Network {} ready on {} (gateway {}, {} addresses {first} - {last})",
            handle.name,
            self.pool.subnet(),
            self.pool.gateway(),
            self.pool.capacity(),
        ));
        Ok(handle)
    }

    /// Spawns the reconciler loop; it stops when `shutdown` turns `true`.
    pub fn spawn_reconciler(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        Arc::clone(&self.reconciler).spawn(shutdown)
    }

    /// Effective configuration.
    pub const fn config(&self) -> &LabConfig {
        &self.config
    }

    /// Deploy/remove entry point.
    pub const fn coordinator(&self) -> &Arc<DeploymentCoordinator> {
        &self.coordinator
    }

    /// The reconciler, for manual ticks.
    pub const fn reconciler(&self) -> &Arc<LifecycleReconciler> {
        &self.reconciler
    }

    /// The address pool.
    pub const fn pool(&self) -> &Arc<AddressPool> {
        &self.pool
    }

    /// The container registry.
    pub const fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.registry
    }
}
