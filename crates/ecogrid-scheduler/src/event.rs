//! Events the fabric delivers to the scheduler.

use serde::{Deserialize, Serialize};

use ecogrid_core::{MachineId, TaskId, Time, VmId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    NewTask { time: Time, task: TaskId },
    TaskComplete { time: Time, task: TaskId },
    MigrationComplete { time: Time, vm: VmId },
    StateChangeComplete { time: Time, machine: MachineId },
    /// A VM created earlier can take work.
    VmReady { time: Time, vm: VmId },
    PeriodicCheck { time: Time },
    SlaWarning { time: Time, task: TaskId },
    MemoryWarning { time: Time, machine: MachineId },
}

impl SchedulerEvent {
    pub fn time(&self) -> Time {
        match *self {
            SchedulerEvent::NewTask { time, .. }
            | SchedulerEvent::TaskComplete { time, .. }
            | SchedulerEvent::MigrationComplete { time, .. }
            | SchedulerEvent::StateChangeComplete { time, .. }
            | SchedulerEvent::VmReady { time, .. }
            | SchedulerEvent::PeriodicCheck { time }
            | SchedulerEvent::SlaWarning { time, .. }
            | SchedulerEvent::MemoryWarning { time, .. } => time,
        }
    }
}
