//! SimFabric: machines, VMs, and tasks held in memory.
//!
//! Memory use is derived: each attached VM costs the configured overhead
//! plus the memory of its tasks. Energy is integrated per machine by
//! `advance`, at `active_watts` while in S0 (or transitioning) and
//! `sleep_watts` otherwise.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use ecogrid_core::*;

/// Static description of a simulated machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub cpu: CpuArch,
    /// Memory in MB.
    pub memory_size: u64,
    #[serde(default)]
    pub gpus: bool,
    #[serde(default = "default_initial_state")]
    pub initial_state: PowerState,
    #[serde(default = "default_active_watts")]
    pub active_watts: f64,
    #[serde(default = "default_sleep_watts")]
    pub sleep_watts: f64,
}

fn default_initial_state() -> PowerState {
    PowerState::S0
}

fn default_active_watts() -> f64 {
    120.0
}

fn default_sleep_watts() -> f64 {
    5.0
}

impl MachineSpec {
    pub fn new(cpu: CpuArch, memory_size: u64) -> Self {
        Self {
            cpu,
            memory_size,
            gpus: false,
            initial_state: default_initial_state(),
            active_watts: default_active_watts(),
            sleep_watts: default_sleep_watts(),
        }
    }

    pub fn with_gpus(mut self) -> Self {
        self.gpus = true;
        self
    }

    pub fn asleep(mut self) -> Self {
        self.initial_state = PowerState::S5;
        self
    }
}

/// An asynchronous request the driver must eventually complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FabricEvent {
    StateChangeRequested { machine: MachineId, target: PowerState },
    MigrationRequested { vm: VmId, target: MachineId },
}

#[derive(Debug)]
struct SimMachine {
    spec: MachineSpec,
    state: PowerState,
    target: Option<PowerState>,
    energy: f64,
    /// Sleep requests are refused.
    pinned: bool,
}

#[derive(Debug)]
struct SimVm {
    cpu: CpuArch,
    vm_type: VmType,
    machine: Option<MachineId>,
    tasks: Vec<TaskId>,
    migrating_to: Option<MachineId>,
}

#[derive(Debug)]
struct SimTask {
    descriptor: TaskDescriptor,
    priority: Option<Priority>,
    vm: Option<VmId>,
}

#[derive(Debug)]
pub struct SimFabric {
    machines: Vec<SimMachine>,
    vms: BTreeMap<VmId, SimVm>,
    tasks: HashMap<TaskId, SimTask>,
    next_vm: VmId,
    vm_overhead: u64,
    outbox: VecDeque<FabricEvent>,
    /// Tier → (met, finished).
    sla: HashMap<SlaTier, (u64, u64)>,
    clock: Time,
}

impl SimFabric {
    pub fn new(machines: Vec<MachineSpec>, vm_overhead: u64) -> Self {
        let machines = machines
            .into_iter()
            .map(|spec| SimMachine {
                state: spec.initial_state,
                spec,
                target: None,
                energy: 0.0,
                pinned: false,
            })
            .collect();
        Self {
            machines,
            vms: BTreeMap::new(),
            tasks: HashMap::new(),
            next_vm: 0,
            vm_overhead,
            outbox: VecDeque::new(),
            sla: HashMap::new(),
            clock: 0,
        }
    }

    // ── Driver API ─────────────────────────────────────────────────

    /// Make a task known to the fabric before its arrival is delivered.
    pub fn submit_task(&mut self, descriptor: TaskDescriptor) {
        self.tasks.insert(
            descriptor.id,
            SimTask {
                descriptor,
                priority: None,
                vm: None,
            },
        );
    }

    /// Finish a running task and record whether it met its SLA.
    pub fn complete_task(&mut self, task: TaskId, met_sla: bool) -> FabricResult<()> {
        let entry = self.tasks.remove(&task).ok_or(FabricError::UnknownTask(task))?;
        if let Some(vm) = entry.vm.and_then(|id| self.vms.get_mut(&id)) {
            vm.tasks.retain(|t| *t != task);
        }
        let stats = self.sla.entry(entry.descriptor.required_sla).or_default();
        stats.1 += 1;
        if met_sla {
            stats.0 += 1;
        }
        Ok(())
    }

    /// Apply a requested power transition. Returns the new state.
    pub fn complete_state_change(&mut self, machine: MachineId) -> FabricResult<PowerState> {
        let m = self.machine_mut(machine)?;
        if let Some(target) = m.target.take() {
            m.state = target;
        }
        debug!(machine, state = ?m.state, "sim: state change complete");
        Ok(m.state)
    }

    /// Apply a requested migration. Returns the VM's new host.
    pub fn complete_migration(&mut self, vm: VmId) -> FabricResult<MachineId> {
        let entry = self.vms.get_mut(&vm).ok_or(FabricError::UnknownVm(vm))?;
        let target = entry
            .migrating_to
            .take()
            .ok_or_else(|| FabricError::InvalidOperation(format!("vm {vm} is not migrating")))?;
        entry.machine = Some(target);
        Ok(target)
    }

    /// Refuse every future sleep request for `machine`.
    pub fn pin_on(&mut self, machine: MachineId) -> FabricResult<()> {
        self.machine_mut(machine)?.pinned = true;
        Ok(())
    }

    /// Drain the asynchronous requests issued since the last call.
    pub fn take_events(&mut self) -> Vec<FabricEvent> {
        self.outbox.drain(..).collect()
    }

    /// Integrate energy up to `now`.
    pub fn advance(&mut self, now: Time) {
        let dt = now.saturating_sub(self.clock) as f64;
        for m in &mut self.machines {
            let watts = if m.state.is_active() || m.target.is_some() {
                m.spec.active_watts
            } else {
                m.spec.sleep_watts
            };
            // W·µs → kWh
            m.energy += watts * dt / 3.6e12;
        }
        self.clock = self.clock.max(now);
    }

    pub fn machine_state(&self, machine: MachineId) -> Option<PowerState> {
        self.machines.get(machine as usize).map(|m| m.state)
    }

    pub fn is_transitioning(&self, machine: MachineId) -> bool {
        self.machines
            .get(machine as usize)
            .is_some_and(|m| m.target.is_some())
    }

    /// VMs that exist (created and not shut down).
    pub fn live_vms(&self) -> Vec<VmId> {
        self.vms.keys().copied().collect()
    }

    pub fn vms_created(&self) -> u32 {
        self.next_vm
    }

    pub fn task_vm(&self, task: TaskId) -> Option<VmId> {
        self.tasks.get(&task).and_then(|t| t.vm)
    }

    pub fn task_priority(&self, task: TaskId) -> Option<Priority> {
        self.tasks.get(&task).and_then(|t| t.priority)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn machine(&self, machine: MachineId) -> FabricResult<&SimMachine> {
        self.machines
            .get(machine as usize)
            .ok_or(FabricError::UnknownMachine(machine))
    }

    fn machine_mut(&mut self, machine: MachineId) -> FabricResult<&mut SimMachine> {
        self.machines
            .get_mut(machine as usize)
            .ok_or(FabricError::UnknownMachine(machine))
    }

    fn vms_on(&self, machine: MachineId) -> impl Iterator<Item = &SimVm> {
        self.vms.values().filter(move |vm| vm.machine == Some(machine))
    }

    fn task_memory(&self, task: TaskId) -> u64 {
        self.tasks
            .get(&task)
            .map_or(0, |t| t.descriptor.required_memory)
    }
}

impl Fabric for SimFabric {
    fn total_machines(&self) -> u32 {
        self.machines.len() as u32
    }

    fn machine_info(&self, machine: MachineId) -> FabricResult<MachineSnapshot> {
        let m = self.machine(machine)?;
        let mut memory_used = 0;
        let mut active_vms = 0;
        let mut active_tasks = 0;
        for vm in self.vms_on(machine) {
            memory_used += self.vm_overhead;
            memory_used += vm.tasks.iter().map(|t| self.task_memory(*t)).sum::<u64>();
            if !vm.tasks.is_empty() {
                active_vms += 1;
            }
            active_tasks += vm.tasks.len() as u32;
        }
        Ok(MachineSnapshot {
            id: machine,
            cpu: m.spec.cpu,
            memory_size: m.spec.memory_size,
            memory_used,
            gpus: m.spec.gpus,
            s_state: m.state,
            active_vms,
            active_tasks,
            energy_consumed: m.energy,
        })
    }

    fn vm_info(&self, vm: VmId) -> FabricResult<VmSnapshot> {
        let entry = self.vms.get(&vm).ok_or(FabricError::UnknownVm(vm))?;
        Ok(VmSnapshot {
            id: vm,
            cpu: entry.cpu,
            vm_type: entry.vm_type,
            machine_id: entry.machine,
            active_tasks: entry.tasks.clone(),
        })
    }

    fn task_info(&self, task: TaskId) -> FabricResult<TaskDescriptor> {
        self.tasks
            .get(&task)
            .map(|t| t.descriptor.clone())
            .ok_or(FabricError::UnknownTask(task))
    }

    fn cluster_energy(&self) -> f64 {
        self.machines.iter().map(|m| m.energy).sum()
    }

    fn sla_report(&self, tier: SlaTier) -> f64 {
        match self.sla.get(&tier) {
            Some((met, total)) if *total > 0 => *met as f64 * 100.0 / *total as f64,
            _ => 100.0,
        }
    }

    fn create_vm(&mut self, vm_type: VmType, cpu: CpuArch) -> FabricResult<VmId> {
        let id = self.next_vm;
        self.next_vm += 1;
        self.vms.insert(
            id,
            SimVm {
                cpu,
                vm_type,
                machine: None,
                tasks: Vec::new(),
                migrating_to: None,
            },
        );
        Ok(id)
    }

    fn attach_vm(&mut self, vm: VmId, machine: MachineId) -> FabricResult<()> {
        let (cpu, state) = {
            let m = self.machine(machine)?;
            (m.spec.cpu, m.state)
        };
        let entry = self.vms.get_mut(&vm).ok_or(FabricError::UnknownVm(vm))?;
        if entry.machine.is_some() {
            return Err(FabricError::InvalidOperation(format!("vm {vm} already attached")));
        }
        if entry.cpu != cpu {
            return Err(FabricError::InvalidOperation(format!(
                "vm {vm} is {:?}, machine {machine} is {cpu:?}",
                entry.cpu
            )));
        }
        if !state.is_active() {
            return Err(FabricError::InvalidOperation(format!("machine {machine} is not on")));
        }
        entry.machine = Some(machine);
        Ok(())
    }

    fn add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> FabricResult<()> {
        let entry = self.vms.get(&vm).ok_or(FabricError::UnknownVm(vm))?;
        let host = entry
            .machine
            .ok_or_else(|| FabricError::InvalidOperation(format!("vm {vm} is not attached")))?;
        if entry.migrating_to.is_some() {
            return Err(FabricError::InvalidOperation(format!("vm {vm} is migrating")));
        }
        if !self.machine(host)?.state.is_active() {
            return Err(FabricError::InvalidOperation(format!("machine {host} is not on")));
        }
        let record = self.tasks.get_mut(&task).ok_or(FabricError::UnknownTask(task))?;
        record.vm = Some(vm);
        record.priority = Some(priority);
        if let Some(entry) = self.vms.get_mut(&vm) {
            entry.tasks.push(task);
        }
        Ok(())
    }

    fn shutdown_vm(&mut self, vm: VmId) -> FabricResult<()> {
        let entry = self.vms.remove(&vm).ok_or(FabricError::UnknownVm(vm))?;
        for task in entry.tasks {
            if let Some(record) = self.tasks.get_mut(&task) {
                record.vm = None;
            }
        }
        Ok(())
    }

    fn set_machine_state(&mut self, machine: MachineId, state: PowerState) -> FabricResult<()> {
        let has_vms = self.vms_on(machine).next().is_some();
        let m = self.machine_mut(machine)?;
        if !state.is_active() && has_vms {
            return Err(FabricError::InvalidOperation(format!(
                "machine {machine} still hosts vms"
            )));
        }
        if !state.is_active() && m.pinned {
            return Err(FabricError::InvalidOperation(format!(
                "machine {machine} is pinned on"
            )));
        }
        m.target = Some(state);
        self.outbox.push_back(FabricEvent::StateChangeRequested { machine, target: state });
        Ok(())
    }

    fn migrate_vm(&mut self, vm: VmId, target: MachineId) -> FabricResult<()> {
        let (cpu, state) = {
            let m = self.machine(target)?;
            (m.spec.cpu, m.state)
        };
        let entry = self.vms.get_mut(&vm).ok_or(FabricError::UnknownVm(vm))?;
        if entry.machine.is_none() || entry.machine == Some(target) {
            return Err(FabricError::InvalidOperation(format!(
                "vm {vm} cannot migrate to machine {target}"
            )));
        }
        if entry.migrating_to.is_some() || entry.cpu != cpu || !state.is_active() {
            return Err(FabricError::InvalidOperation(format!(
                "machine {target} cannot receive vm {vm}"
            )));
        }
        entry.migrating_to = Some(target);
        self.outbox.push_back(FabricEvent::MigrationRequested { vm, target });
        Ok(())
    }

    fn set_task_priority(&mut self, task: TaskId, priority: Priority) -> FabricResult<()> {
        let record = self.tasks.get_mut(&task).ok_or(FabricError::UnknownTask(task))?;
        record.priority = Some(priority);
        Ok(())
    }
}
