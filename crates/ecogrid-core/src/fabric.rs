//! The fabric: the execution environment the scheduler drives.
//!
//! Queries are side-effect free. Control calls only *request* a change:
//! the effect (a machine reaching S0, a migration finishing) shows up later
//! as a separate event delivered to the scheduler.

use crate::error::FabricResult;
use crate::types::*;

/// Machine, VM, and task primitives supplied by the environment.
///
/// The scheduler owns one value implementing this trait, so tests can
/// substitute an in-memory fabric.
pub trait Fabric {
    /// Number of machines in the inventory. Ids run `0..total_machines()`.
    fn total_machines(&self) -> u32;

    fn machine_info(&self, machine: MachineId) -> FabricResult<MachineSnapshot>;

    fn vm_info(&self, vm: VmId) -> FabricResult<VmSnapshot>;

    fn task_info(&self, task: TaskId) -> FabricResult<TaskDescriptor>;

    /// Energy consumed by the whole cluster so far.
    fn cluster_energy(&self) -> f64;

    /// Percentage of tasks of `tier` that met their SLA.
    fn sla_report(&self, tier: SlaTier) -> f64;

    fn create_vm(&mut self, vm_type: VmType, cpu: CpuArch) -> FabricResult<VmId>;

    fn attach_vm(&mut self, vm: VmId, machine: MachineId) -> FabricResult<()>;

    fn add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> FabricResult<()>;

    fn shutdown_vm(&mut self, vm: VmId) -> FabricResult<()>;

    /// Request a power-state transition. Completion is reported later.
    fn set_machine_state(&mut self, machine: MachineId, state: PowerState) -> FabricResult<()>;

    /// Request a live migration. Completion is reported later.
    fn migrate_vm(&mut self, vm: VmId, target: MachineId) -> FabricResult<()>;

    fn set_task_priority(&mut self, task: TaskId, priority: Priority) -> FabricResult<()>;
}
