//! Power executor: applies consolidation decisions.

use tracing::{debug, info, warn};

use ecogrid_core::{Fabric, MachineId, PowerState, TaskId, VmId};
use ecogrid_directory::MachinePhase;
use ecogrid_power::PowerDecision;

use crate::scheduler::Scheduler;

impl<F: Fabric> Scheduler<F> {
    /// Shut down the machine's VMs in order, then request S5.
    ///
    /// A failed VM shutdown aborts the power-down; VMs already shut down
    /// stay removed and the machine stays on. Tasks parked on the removed
    /// VMs are placed again only once the machine has left the pool.
    pub(crate) fn apply_power(&mut self, decision: PowerDecision) {
        let PowerDecision::PowerDown { machine, vms } = decision else {
            return;
        };

        let mut orphans = Vec::new();
        let powered_down = self.power_down(machine, &vms, &mut orphans);
        if !powered_down && !orphans.is_empty() {
            debug!(machine, "power-down aborted, re-placing orphans with machine on");
        }
        for task in orphans {
            let outcome = self.place_task(task);
            warn!(task, machine, ?outcome, "re-placed task parked on a shut-down vm");
        }
    }

    fn power_down(&mut self, machine: MachineId, vms: &[VmId], orphans: &mut Vec<TaskId>) -> bool {
        for &vm in vms {
            if let Err(e) = self.fabric.shutdown_vm(vm) {
                warn!(machine, vm, error = %e, "vm shutdown failed, machine stays on");
                return false;
            }
            orphans.extend(self.directory.remove_vm(vm));
        }

        if let Err(e) = self.fabric.set_machine_state(machine, PowerState::S5) {
            warn!(machine, error = %e, "sleep request failed, machine stays on");
            return false;
        }
        self.directory.mark_powered_off(machine);
        self.directory.set_phase(machine, MachinePhase::PoweringDown);
        self.stats.power_down_requests += 1;
        info!(machine, "machine powering down");
        true
    }

    pub(crate) fn is_machine_on(&self, machine: MachineId) -> bool {
        self.directory.is_powered_on(machine)
            && self
                .fabric
                .machine_info(machine)
                .is_ok_and(|s| s.s_state.is_active())
    }
}

#[cfg(test)]
mod tests {
    use ecogrid_core::*;
    use ecogrid_directory::PendingKey;
    use ecogrid_power::PowerDecision;
    use ecogrid_sim::{MachineSpec, SimFabric};

    use crate::scheduler::Scheduler;

    fn scheduler() -> Scheduler<SimFabric> {
        let mut config = SchedulerConfig::default();
        config.pool.size = 2;
        let mut s = Scheduler::new(
            SimFabric::new(vec![MachineSpec::new(CpuArch::X86, 4096); 2], 8),
            config,
        );
        s.init();
        s
    }

    #[test]
    fn power_down_removes_vms_and_marks_off() {
        let mut s = scheduler();
        let vms = s.directory().vms_on(0).to_vec();

        s.apply_power(PowerDecision::PowerDown { machine: 0, vms });

        assert!(!s.is_machine_on(0));
        assert!(s.directory().vms_on(0).is_empty());
        assert!(s.fabric().is_transitioning(0));
        assert_eq!(s.stats().power_down_requests, 1);
    }

    #[test]
    fn failed_vm_shutdown_keeps_machine_on() {
        let mut s = scheduler();

        s.apply_power(PowerDecision::PowerDown {
            machine: 0,
            vms: vec![99],
        });

        assert!(s.is_machine_on(0));
        assert!(!s.fabric().is_transitioning(0));
    }

    #[test]
    fn orphaned_parked_task_is_replaced() {
        let mut s = scheduler();
        s.fabric_mut().submit_task(TaskDescriptor {
            id: 5,
            required_cpu: CpuArch::X86,
            required_vm: VmType::Linux,
            required_memory: 128,
            gpu_capable: false,
            required_sla: SlaTier::Sla2,
        });
        let vms = s.directory().vms_on(0).to_vec();
        s.directory.pending_mut().park(PendingKey::Vm(vms[0]), 5);

        s.apply_power(PowerDecision::PowerDown { machine: 0, vms });

        let vm = s.directory().vm_for_task(5).unwrap();
        assert_eq!(s.directory().host_of(vm), Some(1));
    }

    #[test]
    fn orphan_never_lands_on_the_machine_going_down() {
        let mut s = scheduler();
        s.fabric_mut().submit_task(TaskDescriptor {
            id: 5,
            required_cpu: CpuArch::X86,
            required_vm: VmType::Linux,
            required_memory: 128,
            gpu_capable: false,
            required_sla: SlaTier::Sla2,
        });
        let first = s.directory().vms_on(0)[0];
        let second = s.create_vm_on(0, VmType::Linux, CpuArch::X86).unwrap();
        s.directory.pending_mut().park(PendingKey::Vm(first), 5);

        s.apply_power(PowerDecision::PowerDown {
            machine: 0,
            vms: vec![first, second],
        });

        assert!(!s.is_machine_on(0));
        assert!(s.fabric().live_vms().iter().all(|vm| *vm != first && *vm != second));
        let vm = s.directory().vm_for_task(5).unwrap();
        assert_eq!(s.directory().host_of(vm), Some(1));
        assert_eq!(s.fabric().task_vm(5), Some(vm));
    }

    #[test]
    fn no_change_is_a_no_op() {
        let mut s = scheduler();
        s.apply_power(PowerDecision::NoChange);
        assert!(s.is_machine_on(0));
        assert!(s.is_machine_on(1));
    }
}
