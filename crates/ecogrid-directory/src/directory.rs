//! ResourceDirectory: machine ↔ VM ↔ task indices.
//!
//! Iteration over machines and VMs follows registration order, which the
//! placement engine relies on for its first-match tie-breaks.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use ecogrid_core::{MachineId, TaskId, VmId};

use crate::pending::{PendingKey, PendingTasks};

/// Scheduler-observed power lifecycle of a machine.
///
/// `Asleep → Waking → Active → PoweringDown → Asleep`. Transitions out of
/// `Waking` and `PoweringDown` only happen when the fabric reports the
/// state change complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MachinePhase {
    Asleep,
    Waking,
    Active,
    PoweringDown,
}

/// Per-VM migration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    #[default]
    Stable,
    Migrating { target: MachineId },
}

#[derive(Debug, Default)]
pub struct ResourceDirectory {
    machines: Vec<MachineId>,
    phases: HashMap<MachineId, MachinePhase>,
    powered_on: BTreeSet<MachineId>,
    vms: Vec<VmId>,
    vm_to_machine: HashMap<VmId, MachineId>,
    machine_to_vms: HashMap<MachineId, Vec<VmId>>,
    migrations: HashMap<VmId, MigrationState>,
    task_to_vm: HashMap<TaskId, VmId>,
    /// Tasks raised to High by an SLA warning.
    escalated: HashSet<TaskId>,
    pending: PendingTasks,
}

impl ResourceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Machines ───────────────────────────────────────────────────

    /// Add a machine to the schedulable inventory.
    pub fn register_machine(&mut self, machine: MachineId, phase: MachinePhase) {
        if self.phases.insert(machine, phase).is_none() {
            self.machines.push(machine);
        }
        debug!(machine, ?phase, "machine registered");
    }

    pub fn machines(&self) -> &[MachineId] {
        &self.machines
    }

    pub fn is_known_machine(&self, machine: MachineId) -> bool {
        self.phases.contains_key(&machine)
    }

    pub fn phase(&self, machine: MachineId) -> Option<MachinePhase> {
        self.phases.get(&machine).copied()
    }

    pub fn set_phase(&mut self, machine: MachineId, phase: MachinePhase) {
        if let Some(current) = self.phases.get_mut(&machine) {
            *current = phase;
        }
    }

    /// Known machines currently in `phase`, in registration order.
    pub fn machines_in_phase(&self, phase: MachinePhase) -> Vec<MachineId> {
        self.machines
            .iter()
            .copied()
            .filter(|m| self.phases.get(m) == Some(&phase))
            .collect()
    }

    pub fn mark_powered_on(&mut self, machine: MachineId) {
        self.powered_on.insert(machine);
    }

    pub fn mark_powered_off(&mut self, machine: MachineId) {
        self.powered_on.remove(&machine);
    }

    pub fn is_powered_on(&self, machine: MachineId) -> bool {
        self.powered_on.contains(&machine)
    }

    pub fn powered_on(&self) -> impl Iterator<Item = MachineId> + '_ {
        self.powered_on.iter().copied()
    }

    // ── VMs ────────────────────────────────────────────────────────

    /// Record a VM and its host. The VM must already be attached.
    pub fn register_vm(&mut self, vm: VmId, host: MachineId) {
        self.vms.push(vm);
        self.vm_to_machine.insert(vm, host);
        self.machine_to_vms.entry(host).or_default().push(vm);
        self.migrations.insert(vm, MigrationState::Stable);
        debug!(vm, machine = host, "vm registered");
    }

    pub fn vms(&self) -> &[VmId] {
        &self.vms
    }

    pub fn host_of(&self, vm: VmId) -> Option<MachineId> {
        self.vm_to_machine.get(&vm).copied()
    }

    pub fn vms_on(&self, machine: MachineId) -> &[VmId] {
        self.machine_to_vms
            .get(&machine)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Forget a VM everywhere it is indexed.
    ///
    /// Returns tasks that were parked on the VM; the caller must place them
    /// elsewhere.
    pub fn remove_vm(&mut self, vm: VmId) -> Vec<TaskId> {
        self.vms.retain(|v| *v != vm);
        if let Some(host) = self.vm_to_machine.remove(&vm)
            && let Some(list) = self.machine_to_vms.get_mut(&host)
        {
            list.retain(|v| *v != vm);
            if list.is_empty() {
                self.machine_to_vms.remove(&host);
            }
        }
        self.migrations.remove(&vm);
        self.task_to_vm.retain(|_, v| *v != vm);
        let orphans = self.pending.drain(PendingKey::Vm(vm));
        debug!(vm, orphaned = orphans.len(), "vm removed");
        orphans
    }

    /// Move a VM to a new host after a migration.
    pub fn move_vm(&mut self, vm: VmId, new_host: MachineId) {
        let Some(old_host) = self.vm_to_machine.get(&vm).copied() else {
            return;
        };
        if old_host == new_host {
            return;
        }
        self.vm_to_machine.insert(vm, new_host);
        if let Some(list) = self.machine_to_vms.get_mut(&old_host) {
            list.retain(|v| *v != vm);
            if list.is_empty() {
                self.machine_to_vms.remove(&old_host);
            }
        }
        self.machine_to_vms.entry(new_host).or_default().push(vm);
        debug!(vm, from = old_host, to = new_host, "vm moved");
    }

    pub fn migration_state(&self, vm: VmId) -> MigrationState {
        self.migrations.get(&vm).copied().unwrap_or_default()
    }

    pub fn set_migration_state(&mut self, vm: VmId, state: MigrationState) {
        if self.vm_to_machine.contains_key(&vm) {
            self.migrations.insert(vm, state);
        }
    }

    pub fn is_migrating(&self, vm: VmId) -> bool {
        matches!(self.migration_state(vm), MigrationState::Migrating { .. })
    }

    // ── Tasks ──────────────────────────────────────────────────────

    pub fn assign_task(&mut self, task: TaskId, vm: VmId) {
        self.task_to_vm.insert(task, vm);
    }

    pub fn vm_for_task(&self, task: TaskId) -> Option<VmId> {
        self.task_to_vm.get(&task).copied()
    }

    /// Drop a finished task's assignment, returning the VM it ran on.
    pub fn complete_task(&mut self, task: TaskId) -> Option<VmId> {
        self.escalated.remove(&task);
        self.task_to_vm.remove(&task)
    }

    /// Record that `task` must run at High from now on, wherever it lands.
    pub fn escalate(&mut self, task: TaskId) {
        self.escalated.insert(task);
    }

    pub fn is_escalated(&self, task: TaskId) -> bool {
        self.escalated.contains(&task)
    }

    pub fn assigned_tasks(&self) -> usize {
        self.task_to_vm.len()
    }

    // ── Pending work ───────────────────────────────────────────────

    pub fn pending(&self) -> &PendingTasks {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingTasks {
        &mut self.pending
    }

    /// True if the machine has parked tasks or a migration touching it.
    ///
    /// A machine with outstanding work must not be powered down even when
    /// the fabric reports it idle.
    pub fn has_outstanding_work(&self, machine: MachineId) -> bool {
        if self.pending.has(PendingKey::Machine(machine)) {
            return true;
        }
        if self
            .vms_on(machine)
            .iter()
            .any(|vm| self.pending.has(PendingKey::Vm(*vm)) || self.is_migrating(*vm))
        {
            return true;
        }
        self.migrations
            .values()
            .any(|state| matches!(state, MigrationState::Migrating { target } if *target == machine))
    }
}
