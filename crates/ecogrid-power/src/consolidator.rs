//! Consolidator: decides which machines can go to sleep.

use tracing::{debug, warn};

use ecogrid_core::{Fabric, MachineId, MachineSnapshot, VmId};
use ecogrid_directory::ResourceDirectory;

/// A power decision for a single machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerDecision {
    /// Shut down `vms` (in order) and put the machine to sleep.
    PowerDown { machine: MachineId, vms: Vec<VmId> },
    /// Leave the machine as it is.
    NoChange,
}

/// Apply the consolidation rule to one machine.
pub fn evaluate(snapshot: &MachineSnapshot, directory: &ResourceDirectory) -> PowerDecision {
    let machine = snapshot.id;

    if !snapshot.s_state.is_active() || !directory.is_powered_on(machine) {
        return PowerDecision::NoChange;
    }
    if !snapshot.is_idle() {
        return PowerDecision::NoChange;
    }
    if directory.has_outstanding_work(machine) {
        debug!(machine, "idle but has outstanding work, keeping on");
        return PowerDecision::NoChange;
    }

    PowerDecision::PowerDown {
        machine,
        vms: directory.vms_on(machine).to_vec(),
    }
}

/// Periodic sweep over every known machine.
///
/// Machines the fabric cannot describe are skipped with a warning.
pub fn sweep<F: Fabric>(fabric: &F, directory: &ResourceDirectory) -> Vec<PowerDecision> {
    let mut decisions = Vec::new();

    for &machine in directory.machines() {
        let snapshot = match fabric.machine_info(machine) {
            Ok(s) => s,
            Err(e) => {
                warn!(machine, error = %e, "sweep: machine snapshot unavailable");
                continue;
            }
        };

        let decision = evaluate(&snapshot, directory);
        if decision != PowerDecision::NoChange {
            debug!(machine, "sweep: machine idle, powering down");
            decisions.push(decision);
        }
    }

    decisions
}

/// Check the host of a just-completed task.
///
/// The VM the task ran on is shut down first.
pub fn after_completion<F: Fabric>(
    fabric: &F,
    directory: &ResourceDirectory,
    machine: MachineId,
    vm: VmId,
) -> PowerDecision {
    let snapshot = match fabric.machine_info(machine) {
        Ok(s) => s,
        Err(e) => {
            warn!(machine, error = %e, "completion check: machine snapshot unavailable");
            return PowerDecision::NoChange;
        }
    };

    match evaluate(&snapshot, directory) {
        PowerDecision::PowerDown { machine, mut vms } => {
            if let Some(pos) = vms.iter().position(|v| *v == vm) {
                vms.remove(pos);
                vms.insert(0, vm);
            }
            PowerDecision::PowerDown { machine, vms }
        }
        PowerDecision::NoChange => PowerDecision::NoChange,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecogrid_core::{CpuArch, PowerState};
    use ecogrid_directory::{MachinePhase, MigrationState, PendingKey};

    fn snapshot(id: MachineId, tasks: u32, vms: u32, state: PowerState) -> MachineSnapshot {
        MachineSnapshot {
            id,
            cpu: CpuArch::X86,
            memory_size: 16_384,
            memory_used: 0,
            gpus: false,
            s_state: state,
            active_vms: vms,
            active_tasks: tasks,
            energy_consumed: 0.0,
        }
    }

    fn directory() -> ResourceDirectory {
        let mut dir = ResourceDirectory::new();
        dir.register_machine(0, MachinePhase::Active);
        dir.mark_powered_on(0);
        dir.register_vm(10, 0);
        dir.register_vm(11, 0);
        dir
    }

    #[test]
    fn idle_machine_is_powered_down_with_its_vms() {
        let dir = directory();
        let decision = evaluate(&snapshot(0, 0, 0, PowerState::S0), &dir);
        assert_eq!(
            decision,
            PowerDecision::PowerDown {
                machine: 0,
                vms: vec![10, 11]
            }
        );
    }

    #[test]
    fn busy_machine_stays_on() {
        let dir = directory();
        assert_eq!(evaluate(&snapshot(0, 1, 1, PowerState::S0), &dir), PowerDecision::NoChange);
        assert_eq!(evaluate(&snapshot(0, 0, 1, PowerState::S0), &dir), PowerDecision::NoChange);
    }

    #[test]
    fn machine_outside_powered_on_set_is_left_alone() {
        let mut dir = directory();
        dir.mark_powered_off(0);
        assert_eq!(evaluate(&snapshot(0, 0, 0, PowerState::S0), &dir), PowerDecision::NoChange);
    }

    #[test]
    fn sleeping_machine_is_left_alone() {
        let dir = directory();
        assert_eq!(evaluate(&snapshot(0, 0, 0, PowerState::S3), &dir), PowerDecision::NoChange);
    }

    #[test]
    fn parked_task_keeps_machine_on() {
        let mut dir = directory();
        dir.pending_mut().park(PendingKey::Vm(11), 7);
        assert_eq!(evaluate(&snapshot(0, 0, 0, PowerState::S0), &dir), PowerDecision::NoChange);
    }

    #[test]
    fn migration_keeps_machine_on() {
        let mut dir = directory();
        dir.set_migration_state(10, MigrationState::Migrating { target: 4 });
        assert_eq!(evaluate(&snapshot(0, 0, 0, PowerState::S0), &dir), PowerDecision::NoChange);
    }
}
