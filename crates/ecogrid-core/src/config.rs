//! Scheduler configuration, loaded from TOML.
//!
//! ```toml
//! memory_overhead = 8
//! deferred_tasks = "retry"
//!
//! [pool]
//! size = 16
//! architectures = ["x86"]
//!
//! [pool.warm_vm]
//! vm_type = "linux"
//! cpu = "x86"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::types::{CpuArch, VmType};

/// Memory reserved per VM, in MB.
pub const DEFAULT_MEMORY_OVERHEAD: u64 = 8;

/// Machines brought up at initialisation.
pub const DEFAULT_POOL_SIZE: u32 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Memory reserved per VM beyond task requirements (MB).
    pub memory_overhead: u64,
    /// What happens to a task the scheduler had to create a VM or wake a
    /// machine for.
    pub deferred_tasks: DeferPolicy,
    pub pool: PoolConfig,
}

/// Partitioning of the fabric inventory, resolved at initialisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of schedulable machines kept on at start-up.
    pub size: u32,
    /// Architectures the scheduler places work on. Machines of any other
    /// architecture are put to sleep and never scheduled.
    pub architectures: Vec<CpuArch>,
    /// VM created on every pool machine at start-up.
    pub warm_vm: Option<WarmVmConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarmVmConfig {
    pub vm_type: VmType,
    pub cpu: CpuArch,
}

/// Handling of tasks deferred behind a VM creation or a machine wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferPolicy {
    /// Park the task and place it once the resource is ready.
    #[default]
    Retry,
    /// Drop the task; only a redelivered arrival gets another chance.
    Drop,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            memory_overhead: DEFAULT_MEMORY_OVERHEAD,
            deferred_tasks: DeferPolicy::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            architectures: vec![CpuArch::X86],
            warm_vm: Some(WarmVmConfig {
                vm_type: VmType::Linux,
                cpu: CpuArch::X86,
            }),
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could never schedule anything sensible.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.architectures.is_empty() {
            return Err(ConfigError::Invalid(
                "pool.architectures must name at least one architecture".to_string(),
            ));
        }
        if let Some(warm) = &self.pool.warm_vm
            && !self.pool.architectures.contains(&warm.cpu)
        {
            return Err(ConfigError::Invalid(format!(
                "pool.warm_vm.cpu {:?} is not a schedulable architecture",
                warm.cpu
            )));
        }
        Ok(())
    }

    pub fn is_schedulable(&self, cpu: CpuArch) -> bool {
        self.pool.architectures.contains(&cpu)
    }
}
