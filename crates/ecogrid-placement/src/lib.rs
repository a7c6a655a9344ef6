//! EcoGrid placement engine: where does an arriving task go?
//!
//! This crate only *decides*. It looks at snapshots of the cluster and
//! returns a `PlacementDecision`; `ecogrid-scheduler` applies it through
//! the fabric.
//!
//! # Components
//!
//! - **`classifier`**: SLA tier → scheduling priority
//! - **`fit`**: requirement checks for VMs and machines
//! - **`placer`**: the placement ladder (reuse VM → new VM → wake machine → reject)

pub mod classifier;
pub mod fit;
pub mod placer;

pub use classifier::classify;
pub use fit::{PlacementRequirements, could_host, machine_fits, vm_fits};
pub use placer::{ClusterView, MachineCandidate, PlacementDecision, VmCandidate, decide_placement};
