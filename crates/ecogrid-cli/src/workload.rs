//! Workload files: the machines and task stream for one simulation run.
//!
//! ```toml
//! tick_interval_us = 1_000_000
//!
//! [[machines]]
//! cpu = "x86"
//! memory_size = 16384
//! count = 4
//!
//! [[tasks]]
//! arrival_us = 0
//! duration_us = 5_000_000
//! deadline_us = 8_000_000
//! cpu = "x86"
//! vm_type = "linux"
//! memory = 1024
//! sla = "sla1"
//! count = 10
//! ```
//!
//! All times are in microseconds.

use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use ecogrid_core::{CpuArch, MachineId, SlaTier, TaskDescriptor, TaskId, Time, VmId, VmType};
use ecogrid_sim::MachineSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    #[serde(default = "default_tick")]
    pub tick_interval_us: Time,
    #[serde(default = "default_boot")]
    pub boot_latency_us: Time,
    #[serde(default = "default_sleep")]
    pub sleep_latency_us: Time,
    #[serde(default = "default_migration")]
    pub migration_latency_us: Time,
    pub machines: Vec<MachineGroup>,
    #[serde(default)]
    pub tasks: Vec<TaskGroup>,
    #[serde(default)]
    pub migrations: Vec<MigrationRequest>,
}

/// `count` identical machines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineGroup {
    #[serde(flatten)]
    pub spec: MachineSpec,
    #[serde(default = "one")]
    pub count: u32,
}

/// `count` identical tasks, arriving `spacing_us` apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroup {
    pub arrival_us: Time,
    pub duration_us: Time,
    /// Relative to arrival. Completing later misses the SLA.
    pub deadline_us: Option<Time>,
    pub cpu: CpuArch,
    #[serde(default = "default_vm_type")]
    pub vm_type: VmType,
    pub memory: u64,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default = "default_sla")]
    pub sla: SlaTier,
    #[serde(default = "one")]
    pub count: u32,
    #[serde(default)]
    pub spacing_us: Time,
}

impl TaskGroup {
    /// Arrival of the `i`-th task, saturating at the end of time.
    fn arrival_at(&self, i: u32) -> Time {
        self.spacing_us
            .saturating_mul(Time::from(i))
            .saturating_add(self.arrival_us)
    }

    fn last_arrival(&self) -> Option<Time> {
        let last = Time::from(self.count.saturating_sub(1));
        self.spacing_us.checked_mul(last)?.checked_add(self.arrival_us)
    }
}

/// Operator-requested VM move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub at_us: Time,
    pub vm: VmId,
    pub target: MachineId,
}

/// One concrete task, expanded from a group.
#[derive(Debug, Clone)]
pub struct TaskArrival {
    pub descriptor: TaskDescriptor,
    pub arrival: Time,
    pub duration: Time,
    pub deadline: Option<Time>,
}

fn one() -> u32 {
    1
}

fn default_tick() -> Time {
    1_000_000
}

fn default_boot() -> Time {
    2_000_000
}

fn default_sleep() -> Time {
    500_000
}

fn default_migration() -> Time {
    1_000_000
}

fn default_vm_type() -> VmType {
    VmType::Linux
}

fn default_sla() -> SlaTier {
    SlaTier::Sla2
}

impl Workload {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading workload {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing workload {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let workload: Workload = toml::from_str(content)?;
        if workload.machines.is_empty() {
            bail!("workload has no machines");
        }
        if workload.tick_interval_us == 0 {
            bail!("tick_interval_us must be positive");
        }
        for (i, group) in workload.tasks.iter().enumerate() {
            if group.last_arrival().is_none() {
                bail!("task group {i}: arrival time overflows");
            }
        }
        Ok(workload)
    }

    pub fn machine_specs(&self) -> Vec<MachineSpec> {
        self.machines
            .iter()
            .flat_map(|g| std::iter::repeat_n(g.spec.clone(), g.count as usize))
            .collect()
    }

    /// Expand task groups into individual arrivals, numbered in file order.
    pub fn arrivals(&self) -> Vec<TaskArrival> {
        let mut next: TaskId = 0;
        let mut out = Vec::new();
        for group in &self.tasks {
            for i in 0..group.count {
                out.push(TaskArrival {
                    descriptor: TaskDescriptor {
                        id: next,
                        required_cpu: group.cpu,
                        required_vm: group.vm_type,
                        required_memory: group.memory,
                        gpu_capable: group.gpu,
                        required_sla: group.sla,
                    },
                    arrival: group.arrival_at(i),
                    duration: group.duration_us,
                    deadline: group.deadline_us,
                });
                next += 1;
            }
        }
        out
    }
}
