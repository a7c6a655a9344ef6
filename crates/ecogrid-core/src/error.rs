//! Error types for fabric calls and configuration loading.

use thiserror::Error;

use crate::types::{MachineId, TaskId, VmId};

/// Result type alias for fabric calls.
pub type FabricResult<T> = Result<T, FabricError>;

/// Errors a fabric implementation can report.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FabricError {
    #[error("unknown machine: {0}")]
    UnknownMachine(MachineId),

    #[error("unknown vm: {0}")]
    UnknownVm(VmId),

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Errors that can occur while loading a `SchedulerConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
