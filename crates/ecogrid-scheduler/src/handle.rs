//! Async front end: runs a `Scheduler` on its own task.
//!
//! Events are delivered over a channel and handled one at a time, so the
//! scheduler's state is never shared. An optional interval drives the
//! periodic check with the elapsed wall time in microseconds.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use ecogrid_core::{Fabric, MachineId, Time, VmId};

use crate::error::{SchedulerError, SchedulerResult};
use crate::event::SchedulerEvent;
use crate::report::SchedulerReport;
use crate::scheduler::Scheduler;

const CHANNEL_CAPACITY: usize = 256;

enum Command {
    Event(SchedulerEvent),
    Migrate {
        time: Time,
        vm: VmId,
        target: MachineId,
        reply: oneshot::Sender<SchedulerResult<()>>,
    },
    Shutdown {
        time: Time,
        reply: oneshot::Sender<SchedulerReport>,
    },
}

/// Cloneable handle to a running scheduler task.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Initialise `scheduler` and move it onto a tokio task.
    ///
    /// With `tick` set, a periodic check runs on that interval in addition
    /// to any `PeriodicCheck` events sent explicitly.
    pub fn spawn<F>(mut scheduler: Scheduler<F>, tick: Option<Duration>) -> (Self, JoinHandle<()>)
    where
        F: Fabric + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);

        let join = tokio::spawn(async move {
            scheduler.init();
            let started = Instant::now();
            let mut interval = tick.map(tokio::time::interval);

            loop {
                tokio::select! {
                    cmd = rx.recv() => {
                        let Some(cmd) = cmd else {
                            debug!("all scheduler handles dropped");
                            break;
                        };
                        match cmd {
                            Command::Event(event) => scheduler.dispatch(event),
                            Command::Migrate { time, vm, target, reply } => {
                                let _ = reply.send(scheduler.migrate_vm(time, vm, target));
                            }
                            Command::Shutdown { time, reply } => {
                                let _ = reply.send(scheduler.shutdown(time));
                                break;
                            }
                        }
                    }
                    _ = next_tick(&mut interval) => {
                        let now = started.elapsed().as_micros() as Time;
                        scheduler.periodic_check(now);
                    }
                }
            }
            info!("scheduler task stopped");
        });

        (Self { tx }, join)
    }

    pub async fn send(&self, event: SchedulerEvent) -> SchedulerResult<()> {
        self.tx
            .send(Command::Event(event))
            .await
            .map_err(|_| SchedulerError::Closed)
    }

    pub async fn migrate(&self, time: Time, vm: VmId, target: MachineId) -> SchedulerResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Migrate {
                time,
                vm,
                target,
                reply,
            })
            .await
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)?
    }

    /// Stop the scheduler and return its final report.
    pub async fn shutdown(&self, time: Time) -> SchedulerResult<SchedulerReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { time, reply })
            .await
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }
}

async fn next_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecogrid_core::*;
    use ecogrid_sim::{MachineSpec, SimFabric};

    fn scheduler() -> Scheduler<SimFabric> {
        let mut config = SchedulerConfig::default();
        config.pool.size = 1;
        let mut fabric = SimFabric::new(vec![MachineSpec::new(CpuArch::X86, 4096); 2], 8);
        fabric.submit_task(TaskDescriptor {
            id: 1,
            required_cpu: CpuArch::X86,
            required_vm: VmType::Linux,
            required_memory: 256,
            gpu_capable: false,
            required_sla: SlaTier::Sla0,
        });
        Scheduler::new(fabric, config)
    }

    #[tokio::test]
    async fn events_then_shutdown() {
        let (handle, join) = SchedulerHandle::spawn(scheduler(), None);

        handle
            .send(SchedulerEvent::NewTask { time: 10, task: 1 })
            .await
            .unwrap();
        let report = handle.shutdown(20).await.unwrap();
        join.await.unwrap();

        assert_eq!(report.time, 20);
        assert_eq!(report.stats.tasks_assigned, 1);
        assert_eq!(report.unplaced_tasks, 0);
    }

    #[tokio::test]
    async fn migrate_errors_come_back() {
        let (handle, _join) = SchedulerHandle::spawn(scheduler(), None);

        let err = handle.migrate(5, 42, 0).await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownVm(42)));
    }

    #[tokio::test]
    async fn closed_after_shutdown() {
        let (handle, join) = SchedulerHandle::spawn(scheduler(), Some(Duration::from_millis(5)));

        handle.shutdown(1).await.unwrap();
        join.await.unwrap();

        let err = handle
            .send(SchedulerEvent::PeriodicCheck { time: 2 })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Closed));
    }
}
