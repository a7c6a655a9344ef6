//! Placement executor: turns a `PlacementDecision` into fabric calls.
//!
//! The placer only decides. This module builds the `ClusterView` it
//! decides on, applies the decision, and owns the pending-task table:
//! tasks deferred behind a VM creation or a machine wake-up are parked
//! under the resource they wait for and flushed when it becomes ready.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use ecogrid_core::*;
use ecogrid_directory::{MachinePhase, PendingKey};
use ecogrid_placement::{
    ClusterView, MachineCandidate, PlacementDecision, PlacementRequirements, VmCandidate,
    classify, decide_placement, vm_fits,
};

use crate::scheduler::Scheduler;

/// What happened to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlacementOutcome {
    /// Running in `vm` on `machine`.
    Assigned { vm: VmId, machine: MachineId },
    /// A VM was created for the task. `deferred` is false under the drop
    /// policy.
    VmCreated {
        vm: VmId,
        machine: MachineId,
        deferred: bool,
    },
    /// A machine was asked to wake for the task.
    PoweringOn { machine: MachineId, deferred: bool },
    /// The task waits on a machine that is already waking.
    AwaitingMachine { machine: MachineId, deferred: bool },
    /// Nothing in the cluster can host the task.
    Rejected,
    /// The fabric refused a call; the task was dropped.
    Failed,
}

impl<F: Fabric> Scheduler<F> {
    /// Snapshot the directory's machines and VMs for the placer.
    ///
    /// Machines the fabric cannot describe are left out, along with their VMs.
    pub(crate) fn cluster_view(&self) -> ClusterView {
        let mut snapshots: HashMap<MachineId, MachineSnapshot> = HashMap::new();
        let mut view = ClusterView::default();

        for &machine in self.directory.machines() {
            match self.fabric.machine_info(machine) {
                Ok(snapshot) => {
                    view.machines.push(MachineCandidate {
                        snapshot: snapshot.clone(),
                        phase: self.directory.phase(machine).unwrap_or(MachinePhase::Asleep),
                        powered_on: self.directory.is_powered_on(machine),
                    });
                    snapshots.insert(machine, snapshot);
                }
                Err(e) => warn!(machine, error = %e, "machine snapshot unavailable"),
            }
        }

        for &vm in self.directory.vms() {
            let Some(host) = self.directory.host_of(vm) else {
                continue;
            };
            let Some(host_snapshot) = snapshots.get(&host) else {
                continue;
            };
            match self.fabric.vm_info(vm) {
                Ok(snapshot) => view.vms.push(VmCandidate {
                    vm: snapshot,
                    host: host_snapshot.clone(),
                    host_powered_on: self.directory.is_powered_on(host),
                    migrating: self.directory.is_migrating(vm),
                }),
                Err(e) => warn!(vm, error = %e, "vm snapshot unavailable"),
            }
        }

        view
    }

    /// Run the placement ladder for `task` and apply the result.
    pub(crate) fn place_task(&mut self, task: TaskId) -> PlacementOutcome {
        let descriptor = match self.fabric.task_info(task) {
            Ok(d) => d,
            Err(e) => {
                warn!(task, error = %e, "task descriptor unavailable, dropping task");
                return PlacementOutcome::Failed;
            }
        };
        let req = PlacementRequirements::from_task(&descriptor, self.config.memory_overhead);
        let priority = self.priority_of(&descriptor);

        let decision = decide_placement(&req, &self.cluster_view());
        debug!(task, ?decision, "placement decided");

        match decision {
            PlacementDecision::AssignToVm { vm, machine } => self.assign(task, vm, machine, priority),

            PlacementDecision::CreateVm { machine } => {
                match self.create_vm_on(machine, req.vm_type, req.cpu) {
                    Ok(vm) => {
                        let deferred = self.defer(PendingKey::Vm(vm), task);
                        info!(task, vm, machine, deferred, "created vm for task");
                        PlacementOutcome::VmCreated {
                            vm,
                            machine,
                            deferred,
                        }
                    }
                    Err(e) => {
                        warn!(task, machine, error = %e, "vm creation failed, dropping task");
                        PlacementOutcome::Failed
                    }
                }
            }

            PlacementDecision::PowerOn { machine } => {
                match self.fabric.set_machine_state(machine, PowerState::S0) {
                    Ok(()) => {
                        self.directory.set_phase(machine, MachinePhase::Waking);
                        self.stats.power_on_requests += 1;
                        let deferred = self.defer(PendingKey::Machine(machine), task);
                        info!(task, machine, deferred, "waking machine for task");
                        PlacementOutcome::PoweringOn { machine, deferred }
                    }
                    Err(e) => {
                        warn!(task, machine, error = %e, "power-on request failed, dropping task");
                        PlacementOutcome::Failed
                    }
                }
            }

            PlacementDecision::AwaitWaking { machine } => {
                let deferred = self.defer(PendingKey::Machine(machine), task);
                debug!(task, machine, deferred, "waiting on waking machine");
                PlacementOutcome::AwaitingMachine { machine, deferred }
            }

            PlacementDecision::Reject => {
                self.stats.tasks_rejected += 1;
                warn!(task, cpu = ?req.cpu, vm_type = ?req.vm_type, memory = req.memory, "no host for task");
                PlacementOutcome::Rejected
            }
        }
    }

    /// Drain `key` and place every task that was waiting on it.
    pub(crate) fn flush(&mut self, key: PendingKey) -> Vec<(TaskId, PlacementOutcome)> {
        let tasks = self.directory.pending_mut().drain(key);
        if !tasks.is_empty() {
            debug!(?key, count = tasks.len(), "flushing parked tasks");
        }
        tasks
            .into_iter()
            .map(|task| {
                let outcome = match key {
                    PendingKey::Vm(vm) => self.assign_parked(task, vm),
                    PendingKey::Machine(_) => self.place_task(task),
                };
                (task, outcome)
            })
            .collect()
    }

    /// Park a deferred task under `key`, or drop it. Returns whether it
    /// was parked.
    fn defer(&mut self, key: PendingKey, task: TaskId) -> bool {
        match self.config.deferred_tasks {
            DeferPolicy::Retry => {
                self.directory.pending_mut().park(key, task);
                self.stats.tasks_deferred += 1;
                true
            }
            DeferPolicy::Drop => {
                debug!(task, ?key, "deferred task dropped");
                false
            }
        }
    }

    /// Assign a task parked on `vm`, provided the VM can still take it.
    /// Otherwise the task goes back through the ladder.
    fn assign_parked(&mut self, task: TaskId, vm: VmId) -> PlacementOutcome {
        let descriptor = match self.fabric.task_info(task) {
            Ok(d) => d,
            Err(e) => {
                warn!(task, error = %e, "parked task no longer known, dropping");
                return PlacementOutcome::Failed;
            }
        };
        // The VM's overhead was reserved when it was created for this task.
        let req = PlacementRequirements::from_task(&descriptor, 0);

        if let Some(machine) = self.directory.host_of(vm)
            && !self.directory.is_migrating(vm)
            && self.directory.is_powered_on(machine)
            && let Ok(vm_snapshot) = self.fabric.vm_info(vm)
            && let Ok(host) = self.fabric.machine_info(machine)
            && host.s_state.is_active()
            && vm_fits(&vm_snapshot, &host, &req)
        {
            let priority = self.priority_of(&descriptor);
            return self.assign(task, vm, machine, priority);
        }

        debug!(task, vm, "parked vm no longer eligible, re-placing");
        self.place_task(task)
    }

    /// Tier priority, unless an SLA warning already raised the task.
    fn priority_of(&self, descriptor: &TaskDescriptor) -> Priority {
        if self.directory.is_escalated(descriptor.id) {
            Priority::High
        } else {
            classify(descriptor.required_sla)
        }
    }

    fn assign(
        &mut self,
        task: TaskId,
        vm: VmId,
        machine: MachineId,
        priority: Priority,
    ) -> PlacementOutcome {
        match self.fabric.add_task(vm, task, priority) {
            Ok(()) => {
                self.directory.assign_task(task, vm);
                self.stats.tasks_assigned += 1;
                info!(task, vm, machine, ?priority, "task assigned");
                PlacementOutcome::Assigned { vm, machine }
            }
            Err(e) => {
                warn!(task, vm, error = %e, "add_task failed, dropping task");
                PlacementOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecogrid_sim::{MachineSpec, SimFabric};

    fn task(id: TaskId, memory: u64) -> TaskDescriptor {
        TaskDescriptor {
            id,
            required_cpu: CpuArch::X86,
            required_vm: VmType::Linux,
            required_memory: memory,
            gpu_capable: false,
            required_sla: SlaTier::Sla1,
        }
    }

    fn scheduler(specs: Vec<MachineSpec>, pool: u32) -> Scheduler<SimFabric> {
        let mut config = SchedulerConfig::default();
        config.pool.size = pool;
        let mut scheduler = Scheduler::new(SimFabric::new(specs, 8), config);
        scheduler.init();
        scheduler
    }

    #[test]
    fn view_skips_nothing_on_healthy_fabric() {
        let s = scheduler(vec![MachineSpec::new(CpuArch::X86, 4096); 2], 1);
        let view = s.cluster_view();
        assert_eq!(view.machines.len(), 2);
        assert_eq!(view.vms.len(), 1);
        assert!(view.machines[0].powered_on);
        assert!(!view.machines[1].powered_on);
    }

    #[test]
    fn unknown_task_fails() {
        let mut s = scheduler(vec![MachineSpec::new(CpuArch::X86, 4096)], 1);
        assert_eq!(s.place_task(42), PlacementOutcome::Failed);
    }

    #[test]
    fn warm_vm_takes_task_with_mapped_priority() {
        let mut s = scheduler(vec![MachineSpec::new(CpuArch::X86, 4096)], 1);
        s.fabric_mut().submit_task(task(1, 256));

        let outcome = s.place_task(1);

        assert_eq!(outcome, PlacementOutcome::Assigned { vm: 0, machine: 0 });
        assert_eq!(s.directory().vm_for_task(1), Some(0));
        assert_eq!(s.fabric().task_priority(1), Some(Priority::High));
        assert_eq!(s.stats().tasks_assigned, 1);
    }

    #[test]
    fn parked_task_is_replaced_when_vm_is_gone() {
        let mut s = scheduler(vec![MachineSpec::new(CpuArch::X86, 4096)], 1);
        s.fabric_mut().submit_task(task(1, 256));
        s.directory.pending_mut().park(PendingKey::Vm(77), 1);

        let flushed = s.flush(PendingKey::Vm(77));

        assert_eq!(flushed, vec![(1, PlacementOutcome::Assigned { vm: 0, machine: 0 })]);
        assert!(s.directory().pending().is_empty());
    }

    #[test]
    fn escalated_task_is_assigned_at_high() {
        let mut s = scheduler(vec![MachineSpec::new(CpuArch::X86, 4096)], 1);
        let mut desc = task(1, 256);
        desc.required_sla = SlaTier::Sla3;
        s.fabric_mut().submit_task(desc);
        s.directory.escalate(1);

        s.place_task(1);

        assert_eq!(s.fabric().task_priority(1), Some(Priority::High));
    }

    #[test]
    fn drop_policy_parks_nothing() {
        let mut config = SchedulerConfig::default();
        config.pool.size = 1;
        config.pool.warm_vm = None;
        config.deferred_tasks = DeferPolicy::Drop;
        let mut s = Scheduler::new(SimFabric::new(vec![MachineSpec::new(CpuArch::X86, 4096)], 8), config);
        s.init();
        s.fabric_mut().submit_task(task(1, 256));

        let outcome = s.place_task(1);

        assert!(matches!(outcome, PlacementOutcome::VmCreated { deferred: false, .. }));
        assert!(s.directory().pending().is_empty());
        assert_eq!(s.stats().tasks_deferred, 0);
    }

    #[test]
    fn power_on_marks_machine_waking() {
        let mut s = scheduler(
            vec![
                MachineSpec::new(CpuArch::X86, 512),
                MachineSpec::new(CpuArch::X86, 8192).asleep(),
            ],
            1,
        );
        s.fabric_mut().submit_task(task(1, 2048));

        let outcome = s.place_task(1);

        assert_eq!(outcome, PlacementOutcome::PoweringOn { machine: 1, deferred: true });
        assert_eq!(s.directory().phase(1), Some(MachinePhase::Waking));
        assert!(!s.directory().is_powered_on(1));
        assert_eq!(s.stats().power_on_requests, 1);
    }
}
