//! Discrete-event driver: plays a workload against `SimFabric`.
//!
//! The driver stands in for the fabric's event loop. It delivers task
//! arrivals and completions, completes the power transitions and
//! migrations the scheduler requests after a fixed latency, and ticks the
//! periodic check while anything is still in flight.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use serde::Serialize;
use tracing::{debug, info, warn};

use ecogrid_core::*;
use ecogrid_scheduler::{Scheduler, SchedulerEvent, SchedulerReport};
use ecogrid_sim::{FabricEvent, SimFabric};

use crate::workload::{TaskArrival, Workload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Step {
    Arrival(TaskId),
    Finish(TaskId),
    StateChangeDone(MachineId),
    MigrationDone(VmId),
    Migrate { vm: VmId, target: MachineId },
    Tick,
}

/// Final output of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub report: SchedulerReport,
    pub tasks_submitted: usize,
    pub tasks_completed: usize,
    /// Arrived but never started (rejected, dropped, or still parked).
    pub tasks_never_run: usize,
    pub sla_warnings: usize,
}

struct Running {
    arrival: Time,
    deadline: Option<Time>,
}

pub struct Simulation {
    scheduler: Scheduler<SimFabric>,
    workload: Workload,
    queue: BinaryHeap<Reverse<(Time, u64, Step)>>,
    seq: u64,
    /// Non-tick steps still queued.
    in_flight: usize,
    tick_queued: bool,
    arrivals: BTreeMap<TaskId, TaskArrival>,
    /// Arrived, not yet started.
    waiting: BTreeSet<TaskId>,
    running: BTreeMap<TaskId, Running>,
    completed: usize,
    sla_warnings: usize,
    now: Time,
}

impl Simulation {
    pub fn new(workload: Workload, config: SchedulerConfig) -> Self {
        let fabric = SimFabric::new(workload.machine_specs(), config.memory_overhead);
        let arrivals = workload
            .arrivals()
            .into_iter()
            .map(|a| (a.descriptor.id, a))
            .collect();
        Self {
            scheduler: Scheduler::new(fabric, config),
            workload,
            queue: BinaryHeap::new(),
            seq: 0,
            in_flight: 0,
            tick_queued: false,
            arrivals,
            waiting: BTreeSet::new(),
            running: BTreeMap::new(),
            completed: 0,
            sla_warnings: 0,
            now: 0,
        }
    }

    pub fn run(mut self) -> SimulationSummary {
        self.scheduler.init();
        self.collect_fabric_requests();

        let arrivals: Vec<(TaskId, Time)> = self
            .arrivals
            .values()
            .map(|a| (a.descriptor.id, a.arrival))
            .collect();
        for (task, at) in arrivals {
            self.push(at, Step::Arrival(task));
        }
        for m in self.workload.migrations.clone() {
            self.push(m.at_us, Step::Migrate { vm: m.vm, target: m.target });
        }
        self.ensure_tick();

        info!(
            machines = self.scheduler.fabric().total_machines(),
            tasks = self.arrivals.len(),
            "simulation started"
        );

        while let Some(Reverse((at, _, step))) = self.queue.pop() {
            if step == Step::Tick {
                self.tick_queued = false;
            } else {
                self.in_flight -= 1;
            }
            self.now = at;
            self.scheduler.fabric_mut().advance(at);
            self.handle(step);
            self.collect_fabric_requests();
            self.start_assigned();
            self.ensure_tick();
        }

        let report = self.scheduler.shutdown(self.now);
        let summary = SimulationSummary {
            report,
            tasks_submitted: self.arrivals.len(),
            tasks_completed: self.completed,
            tasks_never_run: self.waiting.len(),
            sla_warnings: self.sla_warnings,
        };
        info!(
            now = self.now,
            completed = summary.tasks_completed,
            never_run = summary.tasks_never_run,
            "simulation finished"
        );
        summary
    }

    fn handle(&mut self, step: Step) {
        let now = self.now;
        match step {
            Step::Arrival(task) => {
                if let Some(arrival) = self.arrivals.get(&task) {
                    self.scheduler
                        .fabric_mut()
                        .submit_task(arrival.descriptor.clone());
                    self.waiting.insert(task);
                    self.scheduler.dispatch(SchedulerEvent::NewTask { time: now, task });
                }
            }
            Step::Finish(task) => {
                let met = self
                    .running
                    .remove(&task)
                    .is_none_or(|r| r.deadline.is_none_or(|d| now <= r.arrival.saturating_add(d)));
                if let Err(e) = self.scheduler.fabric_mut().complete_task(task, met) {
                    warn!(task, error = %e, "sim: completion failed");
                    return;
                }
                self.completed += 1;
                self.scheduler.dispatch(SchedulerEvent::TaskComplete { time: now, task });
            }
            Step::StateChangeDone(machine) => {
                if let Err(e) = self.scheduler.fabric_mut().complete_state_change(machine) {
                    warn!(machine, error = %e, "sim: state change failed");
                    return;
                }
                self.scheduler
                    .dispatch(SchedulerEvent::StateChangeComplete { time: now, machine });
            }
            Step::MigrationDone(vm) => {
                if let Err(e) = self.scheduler.fabric_mut().complete_migration(vm) {
                    warn!(vm, error = %e, "sim: migration failed");
                    return;
                }
                self.scheduler
                    .dispatch(SchedulerEvent::MigrationComplete { time: now, vm });
            }
            Step::Migrate { vm, target } => {
                if let Err(e) = self.scheduler.migrate_vm(now, vm, target) {
                    warn!(vm, target, error = %e, "migration request refused");
                }
            }
            Step::Tick => {
                self.check_memory(now);
                self.scheduler.dispatch(SchedulerEvent::PeriodicCheck { time: now });
            }
        }
    }

    /// Turn the fabric's outstanding requests into future completions.
    fn collect_fabric_requests(&mut self) {
        for event in self.scheduler.fabric_mut().take_events() {
            match event {
                FabricEvent::StateChangeRequested { machine, target } => {
                    let latency = if target.is_active() {
                        self.workload.boot_latency_us
                    } else {
                        self.workload.sleep_latency_us
                    };
                    self.push(self.now.saturating_add(latency), Step::StateChangeDone(machine));
                }
                FabricEvent::MigrationRequested { vm, .. } => {
                    self.push(
                        self.now.saturating_add(self.workload.migration_latency_us),
                        Step::MigrationDone(vm),
                    );
                }
            }
        }
    }

    /// Start the clock on tasks the scheduler has placed since the last step.
    fn start_assigned(&mut self) {
        let started: Vec<TaskId> = self
            .waiting
            .iter()
            .copied()
            .filter(|t| self.scheduler.fabric().task_vm(*t).is_some())
            .collect();

        for task in started {
            self.waiting.remove(&task);
            let Some(arrival) = self.arrivals.get(&task) else {
                continue;
            };
            let finish = self.now.saturating_add(arrival.duration);
            let (arrival_at, deadline) = (arrival.arrival, arrival.deadline);
            debug!(task, finish, "sim: task started");

            if let Some(d) = deadline
                && finish > arrival_at.saturating_add(d)
            {
                self.sla_warnings += 1;
                self.scheduler
                    .dispatch(SchedulerEvent::SlaWarning { time: self.now, task });
            }
            self.running.insert(
                task,
                Running {
                    arrival: arrival_at,
                    deadline,
                },
            );
            self.push(finish, Step::Finish(task));
        }
    }

    /// Keep ticking while anything can still change.
    fn ensure_tick(&mut self) {
        let busy = self.in_flight > 0
            || !self.running.is_empty()
            || !self.scheduler.directory().pending().is_empty();
        if busy && !self.tick_queued {
            self.push(self.now.saturating_add(self.workload.tick_interval_us), Step::Tick);
            self.tick_queued = true;
        }
    }

    fn check_memory(&mut self, now: Time) {
        for machine in 0..self.scheduler.fabric().total_machines() {
            if let Ok(s) = self.scheduler.fabric().machine_info(machine)
                && s.memory_used > s.memory_size
            {
                self.scheduler
                    .dispatch(SchedulerEvent::MemoryWarning { time: now, machine });
            }
        }
    }

    fn push(&mut self, at: Time, step: Step) {
        if step != Step::Tick {
            self.in_flight += 1;
        }
        self.seq += 1;
        self.queue.push(Reverse((at, self.seq, step)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(toml: &str, config: SchedulerConfig) -> SimulationSummary {
        let workload = Workload::from_toml_str(toml).unwrap();
        Simulation::new(workload, config).run()
    }

    #[test]
    fn all_tasks_complete_on_a_small_cluster() {
        let summary = run(
            r#"
tick_interval_us = 1000
boot_latency_us = 5000

[[machines]]
cpu = "x86"
memory_size = 4096
count = 2

[[machines]]
cpu = "x86"
memory_size = 4096
initial_state = "s5"

[[tasks]]
arrival_us = 0
duration_us = 10000
cpu = "x86"
memory = 3000
sla = "sla1"
count = 3
spacing_us = 100
"#,
            {
                let mut c = SchedulerConfig::default();
                c.pool.size = 2;
                c
            },
        );

        assert_eq!(summary.tasks_submitted, 3);
        assert_eq!(summary.tasks_completed, 3);
        assert_eq!(summary.tasks_never_run, 0);
        assert_eq!(summary.report.unplaced_tasks, 0);
        assert_eq!(summary.report.compliance(SlaTier::Sla1), Some(100.0));
        assert!(summary.report.stats.power_on_requests >= 1);
        assert!(summary.report.total_energy_kwh > 0.0);
    }

    #[test]
    fn impossible_task_never_runs() {
        let summary = run(
            r#"
[[machines]]
cpu = "x86"
memory_size = 1024

[[tasks]]
arrival_us = 0
duration_us = 10
cpu = "riscv"
memory = 64
"#,
            SchedulerConfig::default(),
        );

        assert_eq!(summary.tasks_completed, 0);
        assert_eq!(summary.tasks_never_run, 1);
        assert_eq!(summary.report.stats.tasks_rejected, 1);
    }

    #[test]
    fn huge_durations_do_not_overflow_the_clock() {
        let mut workload = Workload::from_toml_str(
            r#"
[[machines]]
cpu = "x86"
memory_size = 8192

[[tasks]]
arrival_us = 0
duration_us = 1
cpu = "x86"
memory = 1024
"#,
        )
        .unwrap();
        workload.tick_interval_us = Time::MAX / 4;
        workload.sleep_latency_us = Time::MAX;
        workload.tasks[0].arrival_us = 10;
        workload.tasks[0].duration_us = Time::MAX;
        workload.tasks[0].deadline_us = Some(Time::MAX);

        let summary = Simulation::new(workload, SchedulerConfig::default()).run();

        assert_eq!(summary.tasks_completed, 1);
        assert_eq!(summary.sla_warnings, 0);
        assert_eq!(summary.report.compliance(SlaTier::Sla2), Some(100.0));
    }

    #[test]
    fn late_tasks_miss_sla_and_warn() {
        let summary = run(
            r#"
[[machines]]
cpu = "x86"
memory_size = 8192

[[tasks]]
arrival_us = 0
duration_us = 5000
deadline_us = 1000
cpu = "x86"
memory = 128
sla = "sla0"
"#,
            SchedulerConfig::default(),
        );

        assert_eq!(summary.sla_warnings, 1);
        assert_eq!(summary.report.compliance(SlaTier::Sla0), Some(0.0));
    }
}
