//! Scheduler: reacts to fabric events.
//!
//! The `Scheduler` is the single owner of the resource directory and of
//! the fabric handle. Every handler runs to completion and never returns
//! an error: fabric failures are logged and the event is dropped.
//!
//! Placement lives in `placement_executor`, consolidation in
//! `power_executor`. This module wires them to events.

use tracing::{debug, error, info, warn};

use ecogrid_core::*;
use ecogrid_directory::{MachinePhase, MigrationState, PendingKey, ResourceDirectory};

use crate::error::{SchedulerError, SchedulerResult};
use crate::event::SchedulerEvent;
use crate::placement_executor::PlacementOutcome;
use crate::report::{SchedulerReport, SchedulerStats, SlaCompliance};

pub struct Scheduler<F: Fabric> {
    pub(crate) fabric: F,
    pub(crate) config: SchedulerConfig,
    pub(crate) directory: ResourceDirectory,
    pub(crate) stats: SchedulerStats,
}

impl<F: Fabric> Scheduler<F> {
    pub fn new(fabric: F, config: SchedulerConfig) -> Self {
        Self {
            fabric,
            config,
            directory: ResourceDirectory::new(),
            stats: SchedulerStats::default(),
        }
    }

    pub fn fabric(&self) -> &F {
        &self.fabric
    }

    pub fn fabric_mut(&mut self) -> &mut F {
        &mut self.fabric
    }

    pub fn directory(&self) -> &ResourceDirectory {
        &self.directory
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Partition the fabric inventory and bring up the initial pool.
    ///
    /// Machines of an unschedulable architecture are put to sleep and
    /// forgotten. The first `pool.size` schedulable machines that are on
    /// become the pool (with a warm VM if configured); every other
    /// schedulable machine is kept as sleeping reserve.
    pub fn init(&mut self) {
        let total = self.fabric.total_machines();
        info!(total, pool = self.config.pool.size, "initializing scheduler");

        let mut pool_left = self.config.pool.size;
        for machine in 0..total {
            let snapshot = match self.fabric.machine_info(machine) {
                Ok(s) => s,
                Err(e) => {
                    warn!(machine, error = %e, "init: machine snapshot unavailable, skipping");
                    continue;
                }
            };

            if !self.config.is_schedulable(snapshot.cpu) {
                if snapshot.s_state != PowerState::S5 {
                    self.request_sleep(machine);
                }
                debug!(machine, cpu = ?snapshot.cpu, "unschedulable architecture, not tracked");
                continue;
            }

            if pool_left > 0 && snapshot.s_state.is_active() {
                pool_left -= 1;
                self.directory.register_machine(machine, MachinePhase::Active);
                self.directory.mark_powered_on(machine);
                if let Some(warm) = self.config.pool.warm_vm
                    && warm.cpu == snapshot.cpu
                    && let Err(e) = self.create_vm_on(machine, warm.vm_type, warm.cpu)
                {
                    error!(machine, error = %e, "init: failed to create warm vm");
                }
            } else if snapshot.s_state.is_active() {
                self.directory.register_machine(machine, MachinePhase::Active);
                if self.request_sleep(machine) {
                    self.directory.set_phase(machine, MachinePhase::PoweringDown);
                } else {
                    // Still on, so it serves as an extra pool member.
                    self.directory.mark_powered_on(machine);
                }
            } else {
                self.directory.register_machine(machine, MachinePhase::Asleep);
            }
        }

        info!(
            scheduled = self.directory.machines().len(),
            powered_on = self.directory.powered_on().count(),
            vms = self.directory.vms().len(),
            "scheduler initialized"
        );
    }

    /// Route an event to its handler.
    pub fn dispatch(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::NewTask { time, task } => {
                self.new_task(time, task);
            }
            SchedulerEvent::TaskComplete { time, task } => self.task_complete(time, task),
            SchedulerEvent::MigrationComplete { time, vm } => self.migration_complete(time, vm),
            SchedulerEvent::StateChangeComplete { time, machine } => {
                self.state_change_complete(time, machine);
            }
            SchedulerEvent::VmReady { time, vm } => {
                self.vm_ready(time, vm);
            }
            SchedulerEvent::PeriodicCheck { time } => self.periodic_check(time),
            SchedulerEvent::SlaWarning { time, task } => self.sla_warning(time, task),
            SchedulerEvent::MemoryWarning { time, machine } => self.memory_warning(time, machine),
        }
    }

    /// A task arrived.
    pub fn new_task(&mut self, now: Time, task: TaskId) -> PlacementOutcome {
        debug!(task, now, "new task");
        self.place_task(task)
    }

    /// A task finished. Drops its assignment and may power its host down.
    pub fn task_complete(&mut self, now: Time, task: TaskId) {
        let Some(vm) = self.directory.complete_task(task) else {
            warn!(task, now, "completion for a task that was never assigned");
            return;
        };
        let Some(machine) = self.directory.host_of(vm) else {
            warn!(task, vm, "completed task's vm is no longer tracked");
            return;
        };

        let decision = ecogrid_power::after_completion(&self.fabric, &self.directory, machine, vm);
        self.apply_power(decision);
        info!(task, vm, machine, now, "task complete");
    }

    /// A migration finished. The VM is eligible for placement again.
    pub fn migration_complete(&mut self, now: Time, vm: VmId) {
        if self.directory.host_of(vm).is_none() {
            warn!(vm, now, "migration complete for an untracked vm");
            return;
        }
        self.directory.set_migration_state(vm, MigrationState::Stable);
        match self.fabric.vm_info(vm) {
            Ok(snapshot) => {
                if let Some(host) = snapshot.machine_id {
                    self.directory.move_vm(vm, host);
                }
            }
            Err(e) => warn!(vm, error = %e, "migration complete: vm snapshot unavailable"),
        }
        info!(vm, now, host = ?self.directory.host_of(vm), "migration complete");
    }

    /// A power transition requested earlier has finished.
    ///
    /// Returns the outcome for every task that was parked on the machine.
    pub fn state_change_complete(
        &mut self,
        now: Time,
        machine: MachineId,
    ) -> Vec<(TaskId, PlacementOutcome)> {
        if !self.directory.is_known_machine(machine) {
            debug!(machine, now, "state change for an unscheduled machine");
            return Vec::new();
        }
        let snapshot = match self.fabric.machine_info(machine) {
            Ok(s) => s,
            Err(e) => {
                error!(machine, error = %e, "state change: machine snapshot unavailable");
                return Vec::new();
            }
        };

        if snapshot.s_state.is_active() {
            self.directory.set_phase(machine, MachinePhase::Active);
            self.directory.mark_powered_on(machine);
            info!(machine, now, "machine is on");
        } else {
            self.directory.set_phase(machine, MachinePhase::Asleep);
            self.directory.mark_powered_off(machine);
            info!(machine, now, state = ?snapshot.s_state, "machine is asleep");
        }

        // Either way, parked tasks go back through the ladder: an active
        // machine now fits them, a sleeping one never will.
        self.flush(PendingKey::Machine(machine))
    }

    /// A VM reported ready. Tasks parked on it are assigned.
    pub fn vm_ready(&mut self, now: Time, vm: VmId) -> Vec<(TaskId, PlacementOutcome)> {
        debug!(vm, now, "vm ready");
        self.flush(PendingKey::Vm(vm))
    }

    /// Periodic tick: assign tasks parked on VMs, then consolidate.
    pub fn periodic_check(&mut self, now: Time) {
        debug!(now, "periodic check");

        // The fabric has no VM-ready event; by the next tick an attached
        // VM can take work.
        for vm in self.directory.pending().vm_keys() {
            self.vm_ready(now, vm);
        }

        let decisions = ecogrid_power::sweep(&self.fabric, &self.directory);
        for decision in decisions {
            self.apply_power(decision);
        }
    }

    /// A task is at risk of missing its SLA; escalate it.
    ///
    /// The escalation is remembered, so a task still parked is assigned at
    /// High when it finally lands.
    pub fn sla_warning(&mut self, now: Time, task: TaskId) {
        self.directory.escalate(task);
        match self.fabric.set_task_priority(task, Priority::High) {
            Ok(()) => info!(task, now, "sla warning, priority raised to high"),
            Err(e) => warn!(task, error = %e, "sla warning: failed to raise priority"),
        }
    }

    /// The fabric reports memory overcommit on a machine. Logged only.
    pub fn memory_warning(&mut self, now: Time, machine: MachineId) {
        warn!(machine, now, "memory overcommitted");
    }

    /// Ask the fabric to move `vm` to `target`.
    ///
    /// The VM is excluded from placement until the migration completes.
    pub fn migrate_vm(&mut self, now: Time, vm: VmId, target: MachineId) -> SchedulerResult<()> {
        let source = self
            .directory
            .host_of(vm)
            .ok_or(SchedulerError::UnknownVm(vm))?;
        if !self.directory.is_known_machine(target) {
            return Err(SchedulerError::UnknownMachine(target));
        }
        if source == target {
            return Err(SchedulerError::InvalidMigration(format!(
                "vm {vm} already on machine {target}"
            )));
        }
        if self.directory.is_migrating(vm) {
            return Err(SchedulerError::InvalidMigration(format!("vm {vm} is already migrating")));
        }
        if !self.is_machine_on(target) {
            return Err(SchedulerError::InvalidMigration(format!("machine {target} is not on")));
        }

        self.fabric.migrate_vm(vm, target)?;
        self.directory
            .set_migration_state(vm, MigrationState::Migrating { target });
        info!(vm, from = source, to = target, now, "migration requested");
        Ok(())
    }

    /// Shut every VM down and produce the final report.
    pub fn shutdown(&mut self, now: Time) -> SchedulerReport {
        let unplaced_tasks = self.directory.pending().len();
        if unplaced_tasks > 0 {
            warn!(unplaced_tasks, "shutting down with parked tasks");
        }

        for vm in self.directory.vms().to_vec() {
            if let Err(e) = self.fabric.shutdown_vm(vm) {
                warn!(vm, error = %e, "shutdown: vm shutdown failed");
            }
            self.directory.remove_vm(vm);
        }

        let mut sla: Vec<SlaCompliance> = SlaTier::WITH_TARGET
            .iter()
            .map(|tier| SlaCompliance {
                tier: *tier,
                compliance_percent: Some(self.fabric.sla_report(*tier)),
            })
            .collect();
        sla.push(SlaCompliance {
            tier: SlaTier::Sla3,
            compliance_percent: None,
        });

        let report = SchedulerReport {
            time: now,
            total_energy_kwh: self.fabric.cluster_energy(),
            sla,
            unplaced_tasks,
            stats: self.stats.clone(),
        };

        info!(
            now,
            energy_kwh = report.total_energy_kwh,
            sla0 = ?report.compliance(SlaTier::Sla0),
            sla1 = ?report.compliance(SlaTier::Sla1),
            sla2 = ?report.compliance(SlaTier::Sla2),
            "scheduler shut down (SLA3 is best-effort)"
        );
        report
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Create a VM, attach it, and record it. Nothing is recorded if
    /// either fabric call fails.
    pub(crate) fn create_vm_on(
        &mut self,
        machine: MachineId,
        vm_type: VmType,
        cpu: CpuArch,
    ) -> SchedulerResult<VmId> {
        let vm = self.fabric.create_vm(vm_type, cpu)?;
        if let Err(e) = self.fabric.attach_vm(vm, machine) {
            if let Err(cleanup) = self.fabric.shutdown_vm(vm) {
                warn!(vm, error = %cleanup, "failed to clean up unattached vm");
            }
            return Err(e.into());
        }
        self.directory.register_vm(vm, machine);
        self.stats.vms_created += 1;
        Ok(vm)
    }

    /// Request S5. Returns false if the fabric refused.
    fn request_sleep(&mut self, machine: MachineId) -> bool {
        match self.fabric.set_machine_state(machine, PowerState::S5) {
            Ok(()) => {
                self.stats.power_down_requests += 1;
                true
            }
            Err(e) => {
                warn!(machine, error = %e, "failed to request sleep");
                false
            }
        }
    }
}
