//! EcoGrid scheduler: event-driven task placement and power management.
//!
//! The scheduler owns a `ResourceDirectory` and a `Fabric`. Each fabric
//! event is handled to completion: placement decisions come from
//! `ecogrid-placement`, power-down decisions from `ecogrid-power`, and this
//! crate applies both through the fabric.
//!
//! # Architecture
//!
//! ```text
//! SchedulerEvent ──► Scheduler::dispatch
//!                      │
//!          ┌───────────┼─────────────────┐
//!          ▼           ▼                 ▼
//!     new_task    task_complete     periodic_check
//!          │           │                 │
//!   decide_placement   after_completion  sweep
//!          │           │                 │
//!   placement_executor └──► power_executor ◄┘
//!          │
//!   pending tasks (flushed on vm ready / machine on)
//! ```
//!
//! `SchedulerHandle` runs the same scheduler on a tokio task.

pub mod error;
pub mod event;
pub mod handle;
pub mod placement_executor;
mod power_executor;
pub mod report;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use event::SchedulerEvent;
pub use handle::SchedulerHandle;
pub use placement_executor::PlacementOutcome;
pub use report::{SchedulerReport, SchedulerStats, SlaCompliance};
pub use scheduler::Scheduler;
