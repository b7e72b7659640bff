//! Periodic reconciliation of tracked records against the runtime.
//!
//! Each tick asks the runtime for the status of every tracked container:
//!
//! | Runtime says          | Action                                          |
//! |-----------------------|-------------------------------------------------|
//! | no such container     | evict, release address                          |
//! | exited / dead         | force-remove, evict, release address            |
//! | any other live status | update the record's status                      |
//! | error / timeout       | log, leave the record for the next tick         |

use std::sync::Arc;
use std::time::Duration;

use labnet_common::types::{ContainerId, ContainerStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::{RuntimeClient, RuntimeStatus, with_timeout};
use crate::coordinator::evict;
use crate::events::EventReporter;
use crate::pool::AddressPool;
use crate::registry::{ContainerRecord, ContainerRegistry};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records inspected.
    pub checked: usize,
    /// Records whose status changed in place.
    pub refreshed: usize,
    /// Records evicted, with their final status.
    pub evicted: Vec<ContainerRecord>,
    /// Status queries or removals that failed.
    pub errors: usize,
}

/// Background task keeping the registry consistent with the runtime.
pub struct LifecycleReconciler {
    runtime: Arc<dyn RuntimeClient>,
    pool: Arc<AddressPool>,
    registry: Arc<ContainerRegistry>,
    events: EventReporter,
    interval: Duration,
    timeout: Duration,
}

impl LifecycleReconciler {
    /// Creates a reconciler ticking every `interval`, bounding each
    /// runtime call by `timeout`.
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        pool: Arc<AddressPool>,
        registry: Arc<ContainerRegistry>,
        events: EventReporter,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            pool,
            registry,
            events,
            interval,
            timeout,
        }
    }

    /// Tick period.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one reconciliation pass over a snapshot of the registry.
    pub async fn tick(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for record in self.registry.list_all() {
            report.checked += 1;
            let status = with_timeout("status", self.timeout, self.runtime.status(&record.id)).await;
            match status {
                Ok(status) if status.is_finished() => self.collect_exited(&record, &mut report).await,
                Ok(status) => self.refresh(&record, &status, &mut report),
                Err(e) if e.is_not_found() => {
                    if let Some(gone) = self.evict(&record.id, ContainerStatus::RemovedExternally) {
                        self.events.info(format!(
                            "Evicted {}: removed outside the control plane, released {}",
                            gone.name, gone.address
                        ));
                        report.evicted.push(gone);
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(id = %record.id, error = %e, "status query failed, will retry");
                }
            }
        }
        if report.errors > 0 {
            self.events.error(format!(
                "Reconciliation could not check {} container(s)",
                report.errors
            ));
        }
        tracing::debug!(
            checked = report.checked,
            refreshed = report.refreshed,
            evicted = report.evicted.len(),
            errors = report.errors,
            "reconcile tick finished"
        );
        report
    }

    /// Ticks every interval until `shutdown` turns `true` or its sender
    /// is dropped. The first tick happens one interval after start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let _ = ticker.tick().await;
        tracing::info!(interval_secs = self.interval.as_secs(), "reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("reconciler stopped");
    }

    /// Spawns [`Self::run`] on the current tokio runtime.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn collect_exited(&self, record: &ContainerRecord, report: &mut ReconcileReport) {
        // Exited containers keep their address in the runtime until removed.
        match with_timeout("remove", self.timeout, self.runtime.force_remove(&record.id)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                report.errors += 1;
                let _ = self
                    .registry
                    .update_status(&record.id, ContainerStatus::Exited);
                tracing::warn!(id = %record.id, error = %e, "could not remove exited container, will retry");
                return;
            }
        }
        if let Some(gone) = self.evict(&record.id, ContainerStatus::Exited) {
            self.events.info(format!(
                "Auto-cleaned exited container {}, released {}",
                gone.name, gone.address
            ));
            report.evicted.push(gone);
        }
    }

    fn refresh(&self, record: &ContainerRecord, status: &RuntimeStatus, report: &mut ReconcileReport) {
        let Some(tracked) = status.tracked_status() else {
            return;
        };
        if tracked != record.status && self.registry.update_status(&record.id, tracked) {
            report.refreshed += 1;
            tracing::debug!(id = %record.id, from = %record.status, to = %tracked, "status refreshed");
        }
    }

    fn evict(&self, id: &ContainerId, status: ContainerStatus) -> Option<ContainerRecord> {
        let mut gone = evict(&self.registry, &self.pool, id)?;
        gone.status = status;
        tracing::info!(id = %id, name = %gone.name, address = %gone.address, status = %status, "evicted container");
        Some(gone)
    }
}

impl std::fmt::Debug for LifecycleReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleReconciler")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
