//! Domain types shared across EcoGrid crates.
//!
//! Machines, VMs, and tasks are owned by the fabric. The scheduler only
//! ever sees them as ids plus point-in-time snapshots.

use serde::{Deserialize, Serialize};

/// Identifier of a physical machine.
pub type MachineId = u32;

/// Identifier of a virtual machine.
pub type VmId = u32;

/// Identifier of a task.
pub type TaskId = u32;

/// Simulation time in microseconds.
pub type Time = u64;

/// CPU instruction-set architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuArch {
    Arm,
    Power,
    Riscv,
    X86,
}

/// Guest OS / VM flavour a task needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmType {
    Linux,
    LinuxRt,
    Win,
    Aix,
}

/// Service-level class attached to a task, strictest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaTier {
    Sla0,
    Sla1,
    Sla2,
    /// Best-effort: no compliance target.
    Sla3,
    /// A tier code this scheduler does not know about.
    #[serde(other)]
    Unrecognized,
}

impl SlaTier {
    /// Tiers that carry a compliance target.
    pub const WITH_TARGET: [SlaTier; 3] = [SlaTier::Sla0, SlaTier::Sla1, SlaTier::Sla2];

    /// Map a raw tier code (0 = strictest) to a tier.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => SlaTier::Sla0,
            1 => SlaTier::Sla1,
            2 => SlaTier::Sla2,
            3 => SlaTier::Sla3,
            _ => SlaTier::Unrecognized,
        }
    }

    pub fn is_best_effort(&self) -> bool {
        matches!(self, SlaTier::Sla3)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SlaTier::Sla0 => "SLA0",
            SlaTier::Sla1 => "SLA1",
            SlaTier::Sla2 => "SLA2",
            SlaTier::Sla3 => "SLA3",
            SlaTier::Unrecognized => "SLA?",
        }
    }
}

/// Scheduling urgency derived from an SLA tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Mid,
    Low,
}

/// Machine power state as reported by the fabric.
///
/// `S0` is fully on; `S5` is off. The intermediate states are sleep levels
/// the fabric may report during or instead of a full power-off. The
/// scheduler only cares whether a machine is ready to host work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    S0,
    S0i1,
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl PowerState {
    /// True when the machine can host VMs and run tasks.
    pub fn is_active(&self) -> bool {
        matches!(self, PowerState::S0)
    }
}

/// Point-in-time view of a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub id: MachineId,
    pub cpu: CpuArch,
    /// Total memory in MB.
    pub memory_size: u64,
    /// Memory in use (tasks plus VM overhead) in MB.
    pub memory_used: u64,
    pub gpus: bool,
    pub s_state: PowerState,
    /// VMs on this machine currently running at least one task.
    pub active_vms: u32,
    pub active_tasks: u32,
    /// Energy consumed by this machine so far.
    pub energy_consumed: f64,
}

impl MachineSnapshot {
    pub fn free_memory(&self) -> u64 {
        self.memory_size.saturating_sub(self.memory_used)
    }

    /// No tasks and no busy VMs.
    pub fn is_idle(&self) -> bool {
        self.active_tasks == 0 && self.active_vms == 0
    }
}

/// Point-in-time view of a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSnapshot {
    pub id: VmId,
    pub cpu: CpuArch,
    pub vm_type: VmType,
    /// Hosting machine; `None` while unattached.
    pub machine_id: Option<MachineId>,
    pub active_tasks: Vec<TaskId>,
}

/// Immutable requirements of an arriving task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub required_cpu: CpuArch,
    pub required_vm: VmType,
    /// Memory in MB.
    pub required_memory: u64,
    pub gpu_capable: bool,
    pub required_sla: SlaTier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_s0_is_active() {
        assert!(PowerState::S0.is_active());
        for state in [
            PowerState::S0i1,
            PowerState::S1,
            PowerState::S2,
            PowerState::S3,
            PowerState::S4,
            PowerState::S5,
        ] {
            assert!(!state.is_active(), "{state:?} should not host work");
        }
    }

    #[test]
    fn tier_codes_map_in_order() {
        assert_eq!(SlaTier::from_code(0), SlaTier::Sla0);
        assert_eq!(SlaTier::from_code(3), SlaTier::Sla3);
        assert_eq!(SlaTier::from_code(7), SlaTier::Unrecognized);
    }

    #[test]
    fn unknown_tier_name_deserializes_as_unrecognized() {
        #[derive(Deserialize)]
        struct Wrapper {
            tier: SlaTier,
        }
        let w: Wrapper = toml::from_str(r#"tier = "gold""#).unwrap();
        assert_eq!(w.tier, SlaTier::Unrecognized);
    }

    #[test]
    fn free_memory_saturates() {
        let snap = MachineSnapshot {
            id: 0,
            cpu: CpuArch::X86,
            memory_size: 1024,
            memory_used: 2048,
            gpus: false,
            s_state: PowerState::S0,
            active_vms: 0,
            active_tasks: 0,
            energy_consumed: 0.0,
        };
        assert_eq!(snap.free_memory(), 0);
        assert!(snap.is_idle());
    }
}
