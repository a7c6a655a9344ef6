//! ecogrid-power: consolidation of idle machines.
//!
//! Reads live machine snapshots from the fabric, cross-checks them with the
//! resource directory, and emits power decisions. Applying a decision
//! (shutting VMs down, requesting S5) is the scheduler's job.
//!
//! # Consolidation rule
//!
//! ```text
//! power down machine m iff
//!     snapshot(m).s_state == S0
//!     and m ∈ powered_on
//!     and snapshot(m).active_tasks == 0
//!     and snapshot(m).active_vms == 0
//!     and no task is parked on m or its VMs
//!     and no migration touches m
//! ```
//!
//! Two entry points use the rule: `sweep` on every periodic tick, and
//! `after_completion` when a task finishes.

pub mod consolidator;

pub use consolidator::{PowerDecision, after_completion, evaluate, sweep};
