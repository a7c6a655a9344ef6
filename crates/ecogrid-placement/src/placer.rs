//! Placement ladder: decides what to do with one arriving task.
//!
//! Rungs are tried in order and the first match wins:
//! 1. Reuse a warm VM (least-loaded eligible VM)
//! 2. Create a VM on a machine that is already on
//! 3. Wake a sleeping machine (or wait on one already waking)
//! 4. Reject
//!
//! Each rung costs more latency or energy than the one before it.

use serde::Serialize;
use tracing::debug;

use ecogrid_core::{MachineId, MachineSnapshot, VmId, VmSnapshot};
use ecogrid_directory::MachinePhase;

use crate::fit::{PlacementRequirements, could_host, machine_fits, vm_fits};

/// A known VM with its host's snapshot.
#[derive(Debug, Clone)]
pub struct VmCandidate {
    pub vm: VmSnapshot,
    pub host: MachineSnapshot,
    /// Host is in the scheduler's powered-on set.
    pub host_powered_on: bool,
    pub migrating: bool,
}

/// A known machine with the scheduler's bookkeeping for it.
#[derive(Debug, Clone)]
pub struct MachineCandidate {
    pub snapshot: MachineSnapshot,
    pub phase: MachinePhase,
    pub powered_on: bool,
}

impl MachineCandidate {
    /// On according to both the fabric and the scheduler.
    fn is_ready(&self) -> bool {
        self.powered_on && self.snapshot.s_state.is_active()
    }

    /// Off according to both the fabric and the scheduler, and not mid-transition.
    fn is_wakeable(&self) -> bool {
        self.phase == MachinePhase::Asleep
            && !self.powered_on
            && !self.snapshot.s_state.is_active()
    }
}

/// Everything the placer looks at, in directory order.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    pub vms: Vec<VmCandidate>,
    pub machines: Vec<MachineCandidate>,
}

/// Outcome of the placement ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlacementDecision {
    /// Add the task to an existing VM.
    AssignToVm { vm: VmId, machine: MachineId },
    /// Create and attach a VM on an already-on machine; the task waits for it.
    CreateVm { machine: MachineId },
    /// Power on a sleeping machine; the task waits for it.
    PowerOn { machine: MachineId },
    /// A suitable machine is already waking up; wait for it.
    AwaitWaking { machine: MachineId },
    /// Nothing in the cluster can take the task.
    Reject,
}

/// Run the placement ladder for one task.
pub fn decide_placement(req: &PlacementRequirements, view: &ClusterView) -> PlacementDecision {
    if let Some(decision) = best_vm(req, view) {
        return decision;
    }

    if let Some(m) = view
        .machines
        .iter()
        .find(|m| m.is_ready() && machine_fits(&m.snapshot, req))
    {
        debug!(machine = m.snapshot.id, "no eligible vm, will create one");
        return PlacementDecision::CreateVm {
            machine: m.snapshot.id,
        };
    }

    if let Some(m) = view
        .machines
        .iter()
        .find(|m| m.phase == MachinePhase::Waking && could_host(&m.snapshot, req))
    {
        return PlacementDecision::AwaitWaking {
            machine: m.snapshot.id,
        };
    }

    if let Some(m) = view
        .machines
        .iter()
        .find(|m| m.is_wakeable() && could_host(&m.snapshot, req))
    {
        return PlacementDecision::PowerOn {
            machine: m.snapshot.id,
        };
    }

    PlacementDecision::Reject
}

/// Least-loaded eligible VM. Ties go to the first one seen.
fn best_vm(req: &PlacementRequirements, view: &ClusterView) -> Option<PlacementDecision> {
    let mut best: Option<&VmCandidate> = None;

    for candidate in &view.vms {
        if candidate.vm.machine_id.is_none()
            || candidate.migrating
            || !candidate.host_powered_on
            || !candidate.host.s_state.is_active()
            || !vm_fits(&candidate.vm, &candidate.host, req)
        {
            continue;
        }
        let load = candidate.vm.active_tasks.len();
        if best.is_none_or(|b| load < b.vm.active_tasks.len()) {
            best = Some(candidate);
        }
    }

    best.map(|c| PlacementDecision::AssignToVm {
        vm: c.vm.id,
        machine: c.host.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecogrid_core::{CpuArch, PowerState, SlaTier, VmType};

    fn snapshot(id: MachineId, cpu: CpuArch, free: u64, state: PowerState) -> MachineSnapshot {
        MachineSnapshot {
            id,
            cpu,
            memory_size: 16_384,
            memory_used: 16_384 - free,
            gpus: false,
            s_state: state,
            active_vms: 0,
            active_tasks: 0,
            energy_consumed: 0.0,
        }
    }

    fn on(id: MachineId, free: u64) -> MachineCandidate {
        MachineCandidate {
            snapshot: snapshot(id, CpuArch::X86, free, PowerState::S0),
            phase: MachinePhase::Active,
            powered_on: true,
        }
    }

    fn asleep(id: MachineId, cpu: CpuArch) -> MachineCandidate {
        MachineCandidate {
            snapshot: snapshot(id, cpu, 16_384, PowerState::S5),
            phase: MachinePhase::Asleep,
            powered_on: false,
        }
    }

    fn vm_on(id: VmId, host: &MachineCandidate, tasks: usize) -> VmCandidate {
        VmCandidate {
            vm: VmSnapshot {
                id,
                cpu: CpuArch::X86,
                vm_type: VmType::Linux,
                machine_id: Some(host.snapshot.id),
                active_tasks: (0..tasks as u32).collect(),
            },
            host: host.snapshot.clone(),
            host_powered_on: host.powered_on,
            migrating: false,
        }
    }

    fn req(memory: u64) -> PlacementRequirements {
        PlacementRequirements {
            cpu: CpuArch::X86,
            vm_type: VmType::Linux,
            memory,
            gpu: false,
            sla: SlaTier::Sla0,
        }
    }

    #[test]
    fn picks_least_loaded_vm() {
        let m0 = on(0, 8192);
        let m1 = on(1, 8192);
        let view = ClusterView {
            vms: vec![vm_on(10, &m0, 3), vm_on(11, &m1, 1), vm_on(12, &m0, 2)],
            machines: vec![m0, m1],
        };

        assert_eq!(
            decide_placement(&req(2056), &view),
            PlacementDecision::AssignToVm { vm: 11, machine: 1 }
        );
    }

    #[test]
    fn equal_load_keeps_first_vm() {
        let m0 = on(0, 8192);
        let view = ClusterView {
            vms: vec![vm_on(10, &m0, 1), vm_on(11, &m0, 1)],
            machines: vec![m0],
        };

        assert_eq!(
            decide_placement(&req(64), &view),
            PlacementDecision::AssignToVm { vm: 10, machine: 0 }
        );
    }

    #[test]
    fn skips_migrating_vm() {
        let m0 = on(0, 8192);
        let mut busy = vm_on(10, &m0, 0);
        busy.migrating = true;
        let view = ClusterView {
            vms: vec![busy, vm_on(11, &m0, 5)],
            machines: vec![m0],
        };

        assert_eq!(
            decide_placement(&req(64), &view),
            PlacementDecision::AssignToVm { vm: 11, machine: 0 }
        );
    }

    #[test]
    fn skips_vm_on_machine_being_powered_down() {
        let mut m0 = on(0, 8192);
        m0.powered_on = false;
        m0.phase = MachinePhase::PoweringDown;
        let view = ClusterView {
            vms: vec![vm_on(10, &m0, 0)],
            machines: vec![m0],
        };

        assert_eq!(decide_placement(&req(64), &view), PlacementDecision::Reject);
    }

    #[test]
    fn creates_vm_when_none_fits() {
        let m0 = on(0, 8192);
        let mut wrong_type = vm_on(10, &m0, 0);
        wrong_type.vm.vm_type = VmType::Win;
        let view = ClusterView {
            vms: vec![wrong_type],
            machines: vec![m0],
        };

        assert_eq!(
            decide_placement(&req(64), &view),
            PlacementDecision::CreateVm { machine: 0 }
        );
    }

    #[test]
    fn wakes_first_matching_sleeper() {
        let view = ClusterView {
            vms: Vec::new(),
            machines: vec![on(0, 16), asleep(1, CpuArch::Arm), asleep(2, CpuArch::X86), asleep(3, CpuArch::X86)],
        };

        assert_eq!(
            decide_placement(&req(64), &view),
            PlacementDecision::PowerOn { machine: 2 }
        );
    }

    #[test]
    fn waits_on_machine_already_waking() {
        let mut waking = asleep(2, CpuArch::X86);
        waking.phase = MachinePhase::Waking;
        let view = ClusterView {
            vms: Vec::new(),
            machines: vec![waking, asleep(3, CpuArch::X86)],
        };

        assert_eq!(
            decide_placement(&req(64), &view),
            PlacementDecision::AwaitWaking { machine: 2 }
        );
    }

    #[test]
    fn rejects_unknown_architecture() {
        let view = ClusterView {
            vms: Vec::new(),
            machines: vec![on(0, 8192), asleep(1, CpuArch::X86)],
        };
        let mut power = req(64);
        power.cpu = CpuArch::Power;

        assert_eq!(decide_placement(&power, &view), PlacementDecision::Reject);
    }

    #[test]
    fn empty_cluster_rejects() {
        assert_eq!(
            decide_placement(&req(64), &ClusterView::default()),
            PlacementDecision::Reject
        );
    }
}
