//! Shared fixtures: a scriptable in-memory runtime and a fixed clock.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use labnet_common::config::LabConfig;
use labnet_common::types::ContainerId;
use labnet_runtime::backend::{
    ContainerHandle, ContainerSpec, NetworkHandle, NetworkSpec, RuntimeClient, RuntimeError,
    RuntimeResult, RuntimeStatus,
};
use labnet_runtime::clock::Clock;
use labnet_runtime::control_plane::ControlPlane;
use labnet_runtime::events::{EventLog, LabEvent};

#[derive(Debug, Clone)]
struct MockContainer {
    name: String,
    status: RuntimeStatus,
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<ContainerId, MockContainer>,
    networks: HashMap<String, NetworkHandle>,
    missing_images: HashSet<String>,
    failing_removals: HashSet<ContainerId>,
    reported_address: Option<Option<Ipv4Addr>>,
    exposed_ports: Vec<String>,
    create_delay: Option<Duration>,
    create_error: Option<RuntimeError>,
    start_error: Option<RuntimeError>,
    network_error: Option<RuntimeError>,
    unavailable: bool,
    pull_fails: bool,
}

/// In-memory [`RuntimeClient`] with per-method call counts.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    calls: Mutex<HashMap<&'static str, usize>>,
    next_id: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record_call(&self, method: &'static str) {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;
    }

    /// Calls made to `method`.
    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    /// Calls made to any method.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn set_status(&self, id: &ContainerId, status: RuntimeStatus) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(id) {
            c.status = status;
        }
    }

    /// Deletes a container behind the control plane's back.
    pub fn vanish(&self, id: &ContainerId) {
        let _ = self.state.lock().unwrap().containers.remove(id);
    }

    pub fn fail_removal_of(&self, id: &ContainerId) {
        let _ = self.state.lock().unwrap().failing_removals.insert(id.clone());
    }

    pub fn allow_removal_of(&self, id: &ContainerId) {
        let _ = self.state.lock().unwrap().failing_removals.remove(id);
    }

    pub fn missing_image(&self, image: &str) {
        let _ = self
            .state
            .lock()
            .unwrap()
            .missing_images
            .insert(image.to_string());
    }

    pub fn report_address(&self, address: Option<Ipv4Addr>) {
        self.state.lock().unwrap().reported_address = Some(address);
    }

    pub fn expose_ports(&self, ports: &[&str]) {
        self.state.lock().unwrap().exposed_ports = ports.iter().map(|p| (*p).to_string()).collect();
    }

    pub fn delay_create(&self, delay: Duration) {
        self.state.lock().unwrap().create_delay = Some(delay);
    }

    pub fn fail_create(&self, error: RuntimeError) {
        self.state.lock().unwrap().create_error = Some(error);
    }

    pub fn clear_create_failure(&self) {
        self.state.lock().unwrap().create_error = None;
    }

    /// Creates the container but fails to start it, like `docker run -d`
    /// when the entrypoint cannot be executed.
    pub fn fail_start(&self, error: RuntimeError) {
        self.state.lock().unwrap().start_error = Some(error);
    }

    pub fn fail_network(&self, error: RuntimeError) {
        self.state.lock().unwrap().network_error = Some(error);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn fail_pulls(&self) {
        self.state.lock().unwrap().pull_fails = true;
    }

    pub fn add_network(&self, handle: NetworkHandle) {
        let _ = self
            .state
            .lock()
            .unwrap()
            .networks
            .insert(handle.name.clone(), handle);
    }

    /// Whether the runtime still has the container.
    pub fn has_container(&self, id: &ContainerId) -> bool {
        self.state.lock().unwrap().containers.contains_key(id)
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    fn unavailable(&self) -> RuntimeResult<()> {
        if self.state.lock().unwrap().unavailable {
            return Err(RuntimeError::Unavailable {
                message: "daemon not responding".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeClient for MockRuntime {
    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        self.record_call("pull_image");
        let state = self.state.lock().unwrap();
        if state.pull_fails {
            return Err(RuntimeError::Failed {
                operation: "pull",
                message: "registry unreachable".into(),
            });
        }
        if state.missing_images.contains(image) {
            return Err(RuntimeError::ImageNotFound {
                image: image.to_string(),
            });
        }
        Ok(())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle> {
        self.record_call("create_and_start");
        let delay = self.state.lock().unwrap().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.unavailable()?;

        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.create_error.clone() {
            return Err(error);
        }
        if state.missing_images.contains(&spec.image) {
            return Err(RuntimeError::ImageNotFound {
                image: spec.image.clone(),
            });
        }
        if state.containers.values().any(|c| c.name == spec.name) {
            return Err(RuntimeError::AlreadyExists {
                kind: "container",
                name: spec.name.clone(),
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        // Distinct leading digits so short ids differ, like real runtime ids.
        let id = ContainerId::new(format!("{n:04x}{}", "c".repeat(60)));
        if let Some(error) = state.start_error.clone() {
            let _ = state.containers.insert(
                id,
                MockContainer {
                    name: spec.name.clone(),
                    status: RuntimeStatus::Created,
                },
            );
            return Err(error);
        }
        let _ = state.containers.insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                status: RuntimeStatus::Running,
            },
        );
        Ok(ContainerHandle {
            id,
            address: state.reported_address.unwrap_or(Some(spec.address)),
            status: RuntimeStatus::Running,
            exposed_ports: state.exposed_ports.clone(),
        })
    }

    async fn status(&self, id: &ContainerId) -> RuntimeResult<RuntimeStatus> {
        self.record_call("status");
        self.unavailable()?;
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .map(|c| c.status.clone())
            .ok_or_else(|| RuntimeError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
    }

    async fn force_remove(&self, id: &ContainerId) -> RuntimeResult<()> {
        self.record_call("force_remove");
        self.unavailable()?;

        let mut state = self.state.lock().unwrap();
        if state.failing_removals.contains(id) {
            return Err(RuntimeError::Failed {
                operation: "remove",
                message: "device or resource busy".into(),
            });
        }
        let key = state
            .containers
            .iter()
            .find(|(key, c)| *key == id || c.name == id.as_str())
            .map(|(key, _)| key.clone());
        match key {
            Some(key) => {
                let _ = state.containers.remove(&key);
                Ok(())
            }
            None => Err(RuntimeError::NotFound {
                kind: "container",
                id: id.to_string(),
            }),
        }
    }

    async fn fetch_logs(&self, id: &ContainerId, tail: usize) -> RuntimeResult<String> {
        self.record_call("fetch_logs");
        self.unavailable()?;
        if !self.has_container(id) {
            return Err(RuntimeError::NotFound {
                kind: "container",
                id: id.to_string(),
            });
        }
        Ok((1..=tail).map(|i| format!("line {i}\n")).collect())
    }

    async fn find_network(&self, name: &str) -> RuntimeResult<Option<NetworkHandle>> {
        self.record_call("find_network");
        let state = self.state.lock().unwrap();
        if let Some(error) = state.network_error.clone() {
            return Err(error);
        }
        Ok(state.networks.get(name).cloned())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<NetworkHandle> {
        self.record_call("create_network");
        let mut state = self.state.lock().unwrap();
        if state.networks.contains_key(&spec.name) {
            return Err(RuntimeError::AlreadyExists {
                kind: "network",
                name: spec.name.clone(),
            });
        }
        let handle = NetworkHandle {
            id: format!("net-{}", spec.name),
            name: spec.name.clone(),
            driver: "bridge".into(),
            subnet: Some(spec.subnet),
            gateway: Some(spec.gateway),
        };
        let _ = state.networks.insert(spec.name.clone(), handle.clone());
        Ok(handle)
    }

    fn is_available(&self) -> bool {
        !self.state.lock().unwrap().unavailable
    }
}

/// Clock frozen at a settable instant.
#[derive(Debug)]
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn at(secs: i64) -> Arc<Self> {
        Arc::new(Self(Mutex::new(Utc.timestamp_opt(secs, 0).unwrap())))
    }

    pub fn advance(&self, secs: i64) {
        let mut now = self.0.lock().unwrap();
        *now += chrono::Duration::seconds(secs);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub const T0: i64 = 1_700_000_000;

/// Lab config on a /29 (five candidates, .2 to .6) with short timeouts.
pub fn small_config() -> LabConfig {
    LabConfig {
        network_name: "lab-test".into(),
        subnet: "10.77.0.0/29".into(),
        runtime_timeout_secs: 5,
        pull_timeout_secs: 5,
        ..LabConfig::default()
    }
}

pub struct Harness {
    pub plane: ControlPlane,
    pub runtime: Arc<MockRuntime>,
    pub clock: Arc<FixedClock>,
    pub events: Arc<EventLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(small_config())
    }

    pub fn with_config(config: LabConfig) -> Self {
        let runtime = MockRuntime::new();
        let clock = FixedClock::at(T0);
        let events = Arc::new(EventLog::new(config.event_log_capacity));
        let plane = ControlPlane::new(
            config,
            runtime.clone(),
            events.clone(),
            clock.clone(),
        )
        .expect("control plane");
        Self {
            plane,
            runtime,
            clock,
            events,
        }
    }

    pub fn events(&self) -> Vec<LabEvent> {
        self.events.snapshot()
    }

    pub fn messages_mentioning(&self, needle: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|e| e.message)
            .filter(|m| m.contains(needle))
            .collect()
    }
}

pub fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 77, 0, last)
}
