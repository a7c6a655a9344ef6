//! Final report and running counters.

use serde::Serialize;

use ecogrid_core::{SlaTier, Time};

/// Compliance for one SLA tier. `None` for best-effort tiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaCompliance {
    pub tier: SlaTier,
    pub compliance_percent: Option<f64>,
}

/// Decision counters kept across the scheduler's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub tasks_assigned: u64,
    pub tasks_deferred: u64,
    pub tasks_rejected: u64,
    pub vms_created: u64,
    pub power_on_requests: u64,
    pub power_down_requests: u64,
}

/// Produced once, at shutdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerReport {
    pub time: Time,
    pub total_energy_kwh: f64,
    pub sla: Vec<SlaCompliance>,
    /// Tasks still parked when the scheduler stopped.
    pub unplaced_tasks: usize,
    pub stats: SchedulerStats,
}

impl SchedulerReport {
    pub fn compliance(&self, tier: SlaTier) -> Option<f64> {
        self.sla
            .iter()
            .find(|c| c.tier == tier)
            .and_then(|c| c.compliance_percent)
    }
}
