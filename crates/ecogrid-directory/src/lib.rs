//! ecogrid-directory: the scheduler's in-memory view of the cluster.
//!
//! Indexes machines, VMs, and task assignments, and remembers what the
//! scheduler has asked the fabric to do but has not seen finish yet
//! (machine phases, migrations, parked tasks).
//!
//! # Architecture
//!
//! ```text
//! ResourceDirectory
//!   ├── machines + MachinePhase      (inventory, Asleep/Waking/Active/PoweringDown)
//!   ├── powered_on                   (authoritative "on" set)
//!   ├── vms ↔ machine_to_vms         (VM placement cache)
//!   ├── task_to_vm                   (assignments)
//!   ├── MigrationState per VM
//!   └── PendingTasks                 (tasks parked on a machine or VM)
//! ```
//!
//! There is no validation here. Callers record a VM only after the fabric
//! accepted both the create and the attach.

pub mod directory;
pub mod pending;

pub use directory::{MachinePhase, MigrationState, ResourceDirectory};
pub use pending::{PendingKey, PendingTasks};
