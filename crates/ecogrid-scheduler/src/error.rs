//! Scheduler error types.

use thiserror::Error;

use ecogrid_core::{FabricError, MachineId, VmId};

/// Errors raised inside the scheduler.
///
/// Event handlers never return these; they log them. Only explicit
/// requests (`migrate_vm`, the async handle) surface them to callers.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("fabric error: {0}")]
    Fabric(#[from] FabricError),

    #[error("unknown vm: {0}")]
    UnknownVm(VmId),

    #[error("machine not schedulable: {0}")]
    UnknownMachine(MachineId),

    #[error("invalid migration: {0}")]
    InvalidMigration(String),

    #[error("scheduler task has stopped")]
    Closed,
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
