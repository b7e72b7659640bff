//! Address allocation and container lifecycle tracking for the lab network.
//!
//! [`control_plane::ControlPlane`] wires the components together: the
//! [`pool::AddressPool`] hands out static addresses, the
//! [`coordinator::DeploymentCoordinator`] launches and removes containers
//! through a [`backend::RuntimeClient`], the [`registry::ContainerRegistry`]
//! tracks what is running, and the [`reconciler::LifecycleReconciler`]
//! evicts whatever exited or disappeared behind our back.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod clock;
pub mod control_plane;
pub mod coordinator;
pub mod events;
pub mod network;
pub mod pool;
pub mod reconciler;
pub mod registry;
pub mod request;
