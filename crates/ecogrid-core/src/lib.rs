//! ecogrid-core: shared types for the EcoGrid scheduler.
//!
//! Everything the scheduler crates agree on lives here:
//!
//! - **`types`**: ids, architectures, SLA tiers, power states, and the
//!   read-only snapshots the fabric hands out
//! - **`fabric`**: the narrow interface to the execution environment
//! - **`config`**: `SchedulerConfig`, loaded from TOML
//! - **`error`**: fabric and configuration errors

pub mod config;
pub mod error;
pub mod fabric;
pub mod types;

pub use config::{DeferPolicy, PoolConfig, SchedulerConfig, WarmVmConfig};
pub use error::{ConfigError, FabricError, FabricResult};
pub use fabric::Fabric;
pub use types::*;
