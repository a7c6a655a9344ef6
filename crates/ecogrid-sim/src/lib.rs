//! ecogrid-sim: an in-memory fabric.
//!
//! `SimFabric` implements `ecogrid_core::Fabric` over plain collections so
//! the scheduler can be exercised without a real cluster. Control calls
//! that are asynchronous in a real datacenter (power transitions,
//! migrations) are recorded as `FabricEvent`s and only take effect when the
//! driver calls `complete_state_change` / `complete_migration`.

pub mod fabric;

pub use fabric::{FabricEvent, MachineSpec, SimFabric};
