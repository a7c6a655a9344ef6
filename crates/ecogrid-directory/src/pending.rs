//! Pending-task table.
//!
//! A task the scheduler created a VM or woke a machine for is parked here
//! under the resource it is waiting on, and drained when that resource
//! reports ready. Order within a key is arrival order.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use ecogrid_core::{MachineId, TaskId, VmId};

/// The resource a parked task is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PendingKey {
    Machine(MachineId),
    Vm(VmId),
}

#[derive(Debug, Default)]
pub struct PendingTasks {
    queues: BTreeMap<PendingKey, VecDeque<TaskId>>,
}

impl PendingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `task` behind `key`.
    pub fn park(&mut self, key: PendingKey, task: TaskId) {
        self.queues.entry(key).or_default().push_back(task);
    }

    /// Remove and return every task parked behind `key`, oldest first.
    pub fn drain(&mut self, key: PendingKey) -> Vec<TaskId> {
        self.queues
            .remove(&key)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// VMs that currently have tasks parked on them, in id order.
    pub fn vm_keys(&self) -> Vec<VmId> {
        self.queues
            .keys()
            .filter_map(|k| match k {
                PendingKey::Vm(vm) => Some(*vm),
                PendingKey::Machine(_) => None,
            })
            .collect()
    }

    pub fn count_for(&self, key: PendingKey) -> usize {
        self.queues.get(&key).map_or(0, VecDeque::len)
    }

    pub fn has(&self, key: PendingKey) -> bool {
        self.count_for(key) > 0
    }

    pub fn contains_task(&self, task: TaskId) -> bool {
        self.queues.values().any(|q| q.contains(&task))
    }

    /// Total number of parked tasks.
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
