//! Static address pool for the lab subnet.
//!
//! Candidates are the usable host addresses of the subnet in ascending
//! order, minus the gateway. Allocation always hands out the lowest free
//! candidate so assignments are deterministic.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ipnet::Ipv4Net;
use labnet_common::config::LabConfig;
use labnet_common::error::{LabError, Result};

/// Finite set of allocatable addresses plus the set currently assigned.
#[derive(Debug)]
pub struct AddressPool {
    subnet: Ipv4Net,
    gateway: Ipv4Addr,
    candidates: Vec<Ipv4Addr>,
    assigned: Mutex<BTreeSet<Ipv4Addr>>,
}

impl AddressPool {
    /// Builds the pool for `subnet`, excluding the network, broadcast and
    /// gateway addresses. `max_size` caps the number of candidates.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Config`] if the gateway lies outside the subnet
    /// or no candidate address remains.
    pub fn initialize(subnet: Ipv4Net, gateway: Ipv4Addr, max_size: Option<usize>) -> Result<Self> {
        let subnet = subnet.trunc();
        if !subnet.contains(&gateway) {
            return Err(LabError::config(format!(
                "gateway {gateway} is outside subnet {subnet}"
            )));
        }

        let network = subnet.network();
        let broadcast = subnet.broadcast();
        let candidates: Vec<Ipv4Addr> = subnet
            .hosts()
            .filter(|addr| *addr != gateway && *addr != network && *addr != broadcast)
            .take(max_size.unwrap_or(usize::MAX))
            .collect();

        if candidates.is_empty() {
            return Err(LabError::config(format!(
                "subnet {subnet} has no allocatable addresses besides gateway {gateway}"
            )));
        }

        tracing::debug!(
            subnet = %subnet,
            gateway = %gateway,
            capacity = candidates.len(),
            "address pool initialized"
        );
        Ok(Self {
            subnet,
            gateway,
            candidates,
            assigned: Mutex::new(BTreeSet::new()),
        })
    }

    /// Builds the pool described by a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Config`] if the subnet or gateway is malformed.
    pub fn from_config(config: &LabConfig) -> Result<Self> {
        Self::initialize(config.subnet()?, config.gateway()?, config.max_pool_size)
    }

    /// Reserves the lowest unassigned candidate.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::PoolExhausted`] if every candidate is assigned.
    pub fn allocate(&self) -> Result<Ipv4Addr> {
        let mut assigned = self.lock();
        let addr = self
            .candidates
            .iter()
            .copied()
            .find(|addr| !assigned.contains(addr))
            .ok_or(LabError::PoolExhausted {
                capacity: self.candidates.len(),
            })?;
        let _ = assigned.insert(addr);
        Ok(addr)
    }

    /// Returns `addr` to the pool. Returns `false` if it was not assigned,
    /// which is not an error.
    pub fn release(&self, addr: Ipv4Addr) -> bool {
        self.lock().remove(&addr)
    }

    /// Returns whether `addr` is currently assigned.
    pub fn is_assigned(&self, addr: Ipv4Addr) -> bool {
        self.lock().contains(&addr)
    }

    /// Number of assigned addresses.
    pub fn assigned_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of candidate addresses.
    pub fn capacity(&self) -> usize {
        self.candidates.len()
    }

    /// Lowest and highest candidate.
    pub fn bounds(&self) -> (Ipv4Addr, Ipv4Addr) {
        // initialize guarantees at least one candidate
        let first = self.candidates.first().copied().unwrap_or(self.gateway);
        let last = self.candidates.last().copied().unwrap_or(self.gateway);
        (first, last)
    }

    /// Gateway of the lab subnet.
    pub const fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// The lab subnet.
    pub const fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<Ipv4Addr>> {
        self.assigned.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
