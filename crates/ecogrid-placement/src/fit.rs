//! Requirement checks for placement candidates.
//!
//! A candidate either satisfies every hard constraint or is rejected:
//! - **Architecture** must match exactly
//! - **VM type** must match exactly (VM candidates only)
//! - **GPU** must be present on the host if the task asks for one
//! - **Memory**: free host memory ≥ task memory + per-VM overhead

use serde::{Deserialize, Serialize};

use ecogrid_core::{CpuArch, MachineSnapshot, SlaTier, TaskDescriptor, VmSnapshot, VmType};

/// What a task needs from its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRequirements {
    pub cpu: CpuArch,
    pub vm_type: VmType,
    /// Task memory plus the per-VM overhead, in MB.
    pub memory: u64,
    pub gpu: bool,
    pub sla: SlaTier,
}

impl PlacementRequirements {
    pub fn from_task(task: &TaskDescriptor, memory_overhead: u64) -> Self {
        Self {
            cpu: task.required_cpu,
            vm_type: task.required_vm,
            memory: task.required_memory.saturating_add(memory_overhead),
            gpu: task.gpu_capable,
            sla: task.required_sla,
        }
    }
}

/// Host-side checks shared by VM and machine candidates.
fn host_fits(host: &MachineSnapshot, req: &PlacementRequirements) -> bool {
    if req.gpu && !host.gpus {
        return false;
    }
    host.free_memory() >= req.memory
}

/// Can `machine` take a new VM for this task right now?
///
/// Power state is not checked here; the placer does that against both the
/// snapshot and the directory.
pub fn machine_fits(machine: &MachineSnapshot, req: &PlacementRequirements) -> bool {
    machine.cpu == req.cpu && host_fits(machine, req)
}

/// Can the task run in `vm`, hosted on `host`, right now?
pub fn vm_fits(vm: &VmSnapshot, host: &MachineSnapshot, req: &PlacementRequirements) -> bool {
    vm.cpu == req.cpu && vm.vm_type == req.vm_type && host_fits(host, req)
}

/// Could `machine` ever host the task, once powered on and empty?
pub fn could_host(machine: &MachineSnapshot, req: &PlacementRequirements) -> bool {
    machine.cpu == req.cpu && (!req.gpu || machine.gpus) && machine.memory_size >= req.memory
}
