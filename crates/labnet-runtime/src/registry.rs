//! In-memory record of every container the control plane launched.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use labnet_common::types::{ContainerId, ContainerStatus};
use serde::{Deserialize, Serialize};

/// One tracked container. Its address stays assigned in the pool for as
/// long as the record exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Runtime-assigned identifier.
    pub id: ContainerId,
    /// Container name, unique among tracked records.
    pub name: String,
    /// Image reference the container was started from.
    pub image: String,
    /// Static address on the lab network.
    pub address: Ipv4Addr,
    /// Lab network name.
    pub network: String,
    /// Last known lifecycle status.
    pub status: ContainerStatus,
    /// When the deployment completed.
    pub created_at: DateTime<Utc>,
    /// Ports declared by the image (`80/tcp`, ...).
    #[serde(default)]
    pub exposed_ports: Vec<String>,
    /// `http://<address>` when the image exposes `80/tcp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
}

impl ContainerRecord {
    /// Derives the access URL from the exposed ports.
    #[must_use]
    pub fn access_url_for(address: Ipv4Addr, exposed_ports: &[String]) -> Option<String> {
        exposed_ports
            .iter()
            .any(|p| p == "80/tcp")
            .then(|| format!("http://{address}"))
    }
}

/// Map of tracked containers keyed by id.
///
/// Every method takes the lock for its whole read-modify-write and never
/// holds it across an `.await`.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    records: Mutex<HashMap<ContainerId, ContainerRecord>>,
}

impl ContainerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the record for `record.id`.
    pub fn put(&self, record: ContainerRecord) {
        let _ = self.lock().insert(record.id.clone(), record);
    }

    /// Returns a copy of the record for `id`.
    pub fn get(&self, id: &ContainerId) -> Option<ContainerRecord> {
        self.lock().get(id).cloned()
    }

    /// Sets the status of `id`. Returns `false` if it is not tracked.
    pub fn update_status(&self, id: &ContainerId, status: ContainerStatus) -> bool {
        let mut records = self.lock();
        let Some(record) = records.get_mut(id) else {
            return false;
        };
        record.status = status;
        true
    }

    /// Deletes and returns the record for `id`.
    ///
    /// Whoever receives `Some` owns the release of the record's address.
    pub fn remove(&self, id: &ContainerId) -> Option<ContainerRecord> {
        self.lock().remove(id)
    }

    /// Snapshot of all records, oldest first, ties broken by name.
    pub fn list_all(&self) -> Vec<ContainerRecord> {
        let mut records: Vec<_> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        records
    }

    /// Returns the record named `name`, if tracked.
    pub fn find_by_name(&self, name: &str) -> Option<ContainerRecord> {
        self.lock().values().find(|r| r.name == name).cloned()
    }

    /// Ids of the records whose id starts with `prefix`.
    pub fn ids_with_prefix(&self, prefix: &str) -> Vec<ContainerId> {
        self.lock()
            .keys()
            .filter(|id| id.as_str().starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ContainerId, ContainerRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn record(id: &str, name: &str, last_octet: u8, secs: i64) -> ContainerRecord {
        ContainerRecord {
            id: ContainerId::new(id),
            name: name.into(),
            image: "nginx:alpine".into(),
            address: Ipv4Addr::new(172, 20, 0, last_octet),
            network: "lab-network".into(),
            status: ContainerStatus::Running,
            created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            exposed_ports: Vec::new(),
            access_url: None,
        }
    }

    #[test]
    fn put_get_remove() {
        let registry = ContainerRegistry::new();
        registry.put(record("a1", "web", 2, 0));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&"a1".into()).unwrap().name, "web");

        let removed = registry.remove(&"a1".into()).unwrap();
        assert_eq!(removed.address, Ipv4Addr::new(172, 20, 0, 2));
        assert!(registry.get(&"a1".into()).is_none());
        assert!(registry.remove(&"a1".into()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn put_replaces_existing_record() {
        let registry = ContainerRegistry::new();
        registry.put(record("a1", "web", 2, 0));
        registry.put(record("a1", "web-renamed", 2, 0));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&"a1".into()).unwrap().name, "web-renamed");
    }

    #[test]
    fn update_status_touches_only_status() {
        let registry = ContainerRegistry::new();
        let original = record("a1", "web", 2, 0);
        registry.put(original.clone());

        assert!(registry.update_status(&"a1".into(), ContainerStatus::Paused));
        let updated = registry.get(&"a1".into()).unwrap();
        assert_eq!(updated.status, ContainerStatus::Paused);
        assert_eq!(
            ContainerRecord {
                status: ContainerStatus::Running,
                ..updated
            },
            original
        );
        assert!(!registry.update_status(&"missing".into(), ContainerStatus::Exited));
    }

    #[test]
    fn list_is_ordered_by_creation_then_name() {
        let registry = ContainerRegistry::new();
        registry.put(record("c", "zeta", 4, 10));
        registry.put(record("b", "beta", 3, 5));
        registry.put(record("a", "alpha", 2, 5));
        let names: Vec<_> = registry.list_all().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["alpha", "beta", "zeta"]);
    }

    #[test]
    fn find_by_name() {
        let registry = ContainerRegistry::new();
        registry.put(record("a1", "web", 2, 0));
        assert_eq!(registry.find_by_name("web").unwrap().id.as_str(), "a1");
        assert!(registry.find_by_name("db").is_none());
    }

    #[test]
    fn ids_with_prefix_matches_leading_characters_only() {
        let registry = ContainerRegistry::new();
        registry.put(record("abc123", "web", 2, 0));
        registry.put(record("abd456", "db", 3, 0));
        assert_eq!(registry.ids_with_prefix("abc"), vec![ContainerId::new("abc123")]);
        assert_eq!(registry.ids_with_prefix("ab").len(), 2);
        assert!(registry.ids_with_prefix("123").is_empty());
    }

    #[test]
    fn access_url_requires_port_80() {
        let addr = Ipv4Addr::new(172, 20, 0, 7);
        assert_eq!(
            ContainerRecord::access_url_for(addr, &["80/tcp".into(), "443/tcp".into()]),
            Some("http://172.20.0.7".into())
        );
        assert_eq!(ContainerRecord::access_url_for(addr, &["8080/tcp".into()]), None);
    }
}
