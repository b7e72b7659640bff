//! Deploy and remove orchestration.
//!
//! A deploy reserves the lowest free address, asks the runtime to start
//! the container with exactly that address, checks the address the
//! runtime reports back, and only then records the container. Any failure
//! after the reservation hands the address back before returning.
//!
//! A container name is reserved from the moment a deploy picks it until
//! the record is stored or the deploy fails, so concurrent deploys never
//! race on the same name.
//!
//! A record's address is released by whoever takes the record out of the
//! registry, so a remove racing the reconciler releases it once.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use labnet_common::config::LabConfig;
use labnet_common::constants::CONTAINER_NAME_PREFIX;
use labnet_common::error::{LabError, Result};
use labnet_common::types::{ContainerId, ContainerStatus};
use serde::Serialize;

use crate::backend::{ContainerHandle, ContainerSpec, RuntimeClient, RuntimeError, with_timeout};
use crate::events::EventReporter;
use crate::network::NetworkProvisioner;
use crate::pool::AddressPool;
use crate::registry::{ContainerRecord, ContainerRegistry};
use crate::request::DeployRequest;

/// Timeouts and switches the coordinator needs from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Bound on create, remove, status and log calls.
    pub runtime_timeout: Duration,
    /// Bound on image pulls.
    pub pull_timeout: Duration,
    /// Pull images before creating containers.
    pub pull_images: bool,
    /// Default number of log lines.
    pub log_tail_lines: usize,
}

impl CoordinatorSettings {
    /// Extracts the settings from a configuration.
    #[must_use]
    pub const fn from_config(config: &LabConfig) -> Self {
        Self {
            runtime_timeout: config.runtime_timeout(),
            pull_timeout: config.pull_timeout(),
            pull_images: config.pull_images,
            log_tail_lines: config.log_tail_lines,
        }
    }
}

/// Counters for a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlPlaneStats {
    /// Tracked containers.
    pub tracked: usize,
    /// Addresses currently assigned.
    pub addresses_assigned: usize,
    /// Total candidate addresses.
    pub address_capacity: usize,
}

/// Orchestrates deploy, remove and the read operations over tracked
/// containers.
pub struct DeploymentCoordinator {
    runtime: Arc<dyn RuntimeClient>,
    pool: Arc<AddressPool>,
    registry: Arc<ContainerRegistry>,
    network: Arc<NetworkProvisioner>,
    events: EventReporter,
    settings: CoordinatorSettings,
    names_in_flight: Mutex<HashSet<String>>,
}

impl DeploymentCoordinator {
    /// Creates a coordinator over shared pool and registry.
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        pool: Arc<AddressPool>,
        registry: Arc<ContainerRegistry>,
        network: Arc<NetworkProvisioner>,
        events: EventReporter,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            runtime,
            pool,
            registry,
            network,
            events,
            settings,
            names_in_flight: Mutex::default(),
        }
    }

    /// Deploys a container and returns its record.
    ///
    /// The request is validated before anything else happens. A failed
    /// deploy leaves neither a record nor an assigned address behind.
    ///
    /// # Errors
    ///
    /// - [`LabError::Validation`] for bad input or a name already in use.
    /// - [`LabError::NetworkProvision`] if the lab network cannot be ensured.
    /// - [`LabError::PoolExhausted`] if no address is free.
    /// - [`LabError::ImageNotFound`] if the runtime cannot resolve the image.
    /// - [`LabError::DeploymentFailed`] for any other runtime failure,
    ///   including a timeout or an unexpected address.
    pub async fn deploy(&self, request: DeployRequest) -> Result<ContainerRecord> {
        request.validate()?;
        let reservation = self.reserve_name(request.name.as_deref())?;
        let name = reservation.name.clone();
        let network = self.network.ensure_network().await?;

        let address = self.pool.allocate().inspect_err(|e| {
            self.events.error(format!("Cannot deploy {name}: {e}"));
        })?;
        tracing::debug!(name = %name, address = %address, "address reserved");

        if self.settings.pull_images {
            self.pull(&request.image).await;
        }

        let spec = ContainerSpec {
            name: name.clone(),
            image: request.image.clone(),
            network: network.name,
            address,
            env: request.env,
            volumes: request.volumes,
            command: request.command,
        };

        match self.launch(&spec).await {
            Ok(record) => {
                self.registry.put(record.clone());
                drop(reservation);
                tracing::info!(
                    id = %record.id,
                    name = %record.name,
                    address = %record.address,
                    image = %record.image,
                    "container deployed"
                );
                self.events.deployment(format!(
                    "Deployed {} ({}) at {}",
                    record.name, record.image, record.address
                ));
                Ok(record)
            }
            Err(e) => {
                self.release_address(address);
                self.events
                    .error(format!("Deployment of {name} ({}) failed: {e}", spec.image));
                Err(e)
            }
        }
    }

    /// Force-removes a tracked container and frees its address.
    ///
    /// A container the runtime no longer knows counts as removed. If the
    /// record was evicted concurrently, the call still succeeds.
    ///
    /// # Errors
    ///
    /// - [`LabError::NotFound`] if `id` is not tracked.
    /// - [`LabError::RemovalFailed`] if the runtime refuses; the record and
    ///   its address are kept so the caller can retry.
    pub async fn remove(&self, id: &ContainerId) -> Result<()> {
        let Some(record) = self.registry.get(id) else {
            return Err(LabError::NotFound {
                kind: "container",
                id: id.to_string(),
            });
        };

        match with_timeout(
            "remove",
            self.settings.runtime_timeout,
            self.runtime.force_remove(id),
        )
        .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!(id = %id, "container already gone from runtime");
            }
            Err(e) => {
                self.events
                    .error(format!("Failed to remove {}: {e}", record.name));
                return Err(LabError::RemovalFailed {
                    id: id.to_string(),
                    message: e.to_string(),
                });
            }
        }

        if let Some(removed) = evict(&self.registry, &self.pool, id) {
            tracing::info!(id = %id, address = %removed.address, "container removed");
            self.events
                .deployment(format!("Removed {} ({})", removed.name, removed.address));
        }
        Ok(())
    }

    /// Removes every tracked container, best effort. Returns the names of
    /// the containers that were removed.
    pub async fn cleanup_all(&self) -> Vec<String> {
        let mut removed = Vec::new();
        let mut failed = 0_usize;
        for record in self.registry.list_all() {
            match self.remove(&record.id).await {
                Ok(()) => removed.push(record.name),
                // Evicted by the reconciler in the meantime.
                Err(LabError::NotFound { .. }) => {}
                Err(e) => {
                    failed += 1;
                    tracing::warn!(id = %record.id, error = %e, "cleanup skipped container");
                }
            }
        }
        self.events.info(format!(
            "Cleanup removed {} container(s), {failed} failed",
            removed.len()
        ));
        removed
    }

    /// Returns the record for `id` with its status refreshed from the
    /// runtime. A container the runtime no longer knows is evicted and
    /// reported as absent; if the runtime cannot be asked, the cached
    /// record is returned.
    pub async fn get(&self, id: &ContainerId) -> Option<ContainerRecord> {
        let record = self.registry.get(id)?;
        self.refresh(record).await
    }

    /// Lists tracked containers, refreshing each as [`Self::get`] does.
    pub async fn list(&self) -> Vec<ContainerRecord> {
        let mut records = Vec::new();
        for record in self.registry.list_all() {
            if let Some(fresh) = self.refresh(record).await {
                records.push(fresh);
            }
        }
        records
    }

    /// Returns the last `tail` lines of a tracked container's output,
    /// or the configured default when `tail` is `None`.
    ///
    /// # Errors
    ///
    /// - [`LabError::NotFound`] if `id` is not tracked or the runtime
    ///   lost it.
    /// - [`LabError::RuntimeUnavailable`] if the runtime call fails.
    pub async fn logs(&self, id: &ContainerId, tail: Option<usize>) -> Result<String> {
        if self.registry.get(id).is_none() {
            return Err(LabError::NotFound {
                kind: "container",
                id: id.to_string(),
            });
        }
        let tail = tail.unwrap_or(self.settings.log_tail_lines);
        with_timeout(
            "logs",
            self.settings.runtime_timeout,
            self.runtime.fetch_logs(id, tail),
        )
        .await
        .map_err(|e| match e {
            RuntimeError::NotFound { kind, id } => LabError::NotFound { kind, id },
            other => LabError::RuntimeUnavailable {
                message: other.to_string(),
            },
        })
    }

    /// Resolves an operator-supplied reference to a tracked container:
    /// a full id, then a container name, then a unique id prefix.
    ///
    /// # Errors
    ///
    /// - [`LabError::NotFound`] if nothing tracked matches.
    /// - [`LabError::Validation`] if the prefix matches several containers.
    pub fn resolve(&self, reference: &str) -> Result<ContainerId> {
        let exact = ContainerId::new(reference);
        if self.registry.get(&exact).is_some() {
            return Ok(exact);
        }
        if let Some(record) = self.registry.find_by_name(reference) {
            return Ok(record.id);
        }
        let not_found = || LabError::NotFound {
            kind: "container",
            id: reference.to_string(),
        };
        if reference.is_empty() {
            return Err(not_found());
        }
        let mut matches = self.registry.ids_with_prefix(reference);
        match matches.len() {
            0 => Err(not_found()),
            1 => Ok(matches.remove(0)),
            n => Err(LabError::validation(format!(
                "'{reference}' matches {n} containers, use a longer id"
            ))),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> ControlPlaneStats {
        ControlPlaneStats {
            tracked: self.registry.len(),
            addresses_assigned: self.pool.assigned_count(),
            address_capacity: self.pool.capacity(),
        }
    }

    /// Picks the container name and holds it until the returned
    /// reservation is dropped.
    fn reserve_name(&self, requested: Option<&str>) -> Result<NameReservation<'_>> {
        let mut in_flight = self.lock_names();
        let name = if let Some(name) = requested {
            if self.name_taken(&in_flight, name) {
                return Err(LabError::validation(format!(
                    "container name '{name}' is already in use"
                )));
            }
            name.to_string()
        } else {
            let base = format!(
                "{CONTAINER_NAME_PREFIX}-{}",
                self.events.now().timestamp()
            );
            let mut candidate = base.clone();
            let mut suffix = 2_u32;
            while self.name_taken(&in_flight, &candidate) {
                candidate = format!("{base}-{suffix}");
                suffix += 1;
            }
            candidate
        };
        let _ = in_flight.insert(name.clone());
        Ok(NameReservation {
            names: &self.names_in_flight,
            name,
        })
    }

    fn name_taken(&self, in_flight: &HashSet<String>, name: &str) -> bool {
        in_flight.contains(name) || self.registry.find_by_name(name).is_some()
    }

    fn lock_names(&self) -> MutexGuard<'_, HashSet<String>> {
        self.names_in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn pull(&self, image: &str) {
        match with_timeout(
            "pull",
            self.settings.pull_timeout,
            self.runtime.pull_image(image),
        )
        .await
        {
            Ok(()) => tracing::debug!(image = %image, "image pulled"),
            Err(e) => {
                self.events
                    .warning(format!("Could not pull {image}, trying local copy: {e}"));
            }
        }
    }

    async fn launch(&self, spec: &ContainerSpec) -> Result<ContainerRecord> {
        let created = with_timeout(
            "create",
            self.settings.runtime_timeout,
            self.runtime.create_and_start(spec),
        )
        .await;

        let handle = match created {
            Ok(handle) => handle,
            Err(RuntimeError::ImageNotFound { .. }) => {
                return Err(LabError::ImageNotFound {
                    image: spec.image.clone(),
                });
            }
            Err(e @ (RuntimeError::Timeout { .. } | RuntimeError::Failed { .. })) => {
                // The runtime may have created it anyway; try by name.
                self.discard(&ContainerId::new(spec.name.clone())).await;
                return Err(self.deployment_failed(spec, e.to_string()));
            }
            Err(e) => return Err(self.deployment_failed(spec, e.to_string())),
        };

        if handle.address != Some(spec.address) {
            let reported = handle
                .address
                .map_or_else(|| "no address".to_string(), |a| a.to_string());
            self.discard(&handle.id).await;
            return Err(self.deployment_failed(
                spec,
                format!(
                    "runtime reported {reported} on {}, expected {}",
                    spec.network, spec.address
                ),
            ));
        }

        Ok(self.record_for(spec, handle))
    }

    fn record_for(&self, spec: &ContainerSpec, handle: ContainerHandle) -> ContainerRecord {
        let access_url = ContainerRecord::access_url_for(spec.address, &handle.exposed_ports);
        ContainerRecord {
            id: handle.id,
            name: spec.name.clone(),
            image: spec.image.clone(),
            address: spec.address,
            network: spec.network.clone(),
            status: ContainerStatus::Running,
            created_at: self.events.now(),
            exposed_ports: handle.exposed_ports,
            access_url,
        }
    }

    async fn discard(&self, id: &ContainerId) {
        match with_timeout(
            "remove",
            self.settings.runtime_timeout,
            self.runtime.force_remove(id),
        )
        .await
        {
            Ok(()) => tracing::info!(id = %id, "discarded partially deployed container"),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                self.events
                    .warning(format!("Could not discard partial container {id}: {e}"));
            }
        }
    }

    async fn refresh(&self, mut record: ContainerRecord) -> Option<ContainerRecord> {
        let status = with_timeout(
            "status",
            self.settings.runtime_timeout,
            self.runtime.status(&record.id),
        )
        .await;

        match status {
            Ok(status) => {
                if let Some(tracked) = status.tracked_status() {
                    if !self.registry.update_status(&record.id, tracked) {
                        return None;
                    }
                    record.status = tracked;
                }
                Some(record)
            }
            Err(e) if e.is_not_found() => {
                if let Some(gone) = evict(&self.registry, &self.pool, &record.id) {
                    self.events.info(format!(
                        "{} disappeared from the runtime, released {}",
                        gone.name, gone.address
                    ));
                }
                None
            }
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "status refresh failed, using cached record");
                Some(record)
            }
        }
    }

    fn deployment_failed(&self, spec: &ContainerSpec, message: String) -> LabError {
        tracing::warn!(name = %spec.name, address = %spec.address, message = %message, "deployment failed");
        LabError::DeploymentFailed {
            name: spec.name.clone(),
            message,
        }
    }

    fn release_address(&self, address: Ipv4Addr) {
        if !self.pool.release(address) {
            tracing::warn!(address = %address, "released address was not assigned");
        }
    }
}

impl std::fmt::Debug for DeploymentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentCoordinator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// A name claimed by a deploy in progress.
struct NameReservation<'a> {
    names: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for NameReservation<'_> {
    fn drop(&mut self) {
        let _ = self
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

/// Takes the record for `id` out of the registry and releases its
/// address. Returns `None`, releasing nothing, if someone else got there
/// first.
pub(crate) fn evict(
    registry: &ContainerRegistry,
    pool: &AddressPool,
    id: &ContainerId,
) -> Option<ContainerRecord> {
    let record = registry.remove(id)?;
    if !pool.release(record.address) {
        tracing::warn!(id = %id, address = %record.address, "evicted record's address was not assigned");
    }
    Some(record)
}
