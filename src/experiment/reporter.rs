use std::sync::Mutex;

use crate::experiment::run::{RunId, RunSnapshot, RunStatus};
use crate::sim::RunMetrics;

/// Outbound side: where run status and final metrics go.
pub trait RunReporter: Send + Sync {
    /// Called on every lifecycle transition.
    fn persist_status(&self, snapshot: &RunSnapshot);

    /// Called once with the final metrics of a run that produced a report.
    fn emit_metrics(&self, run_id: RunId, metrics: &RunMetrics);
}

/// Writes everything to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl RunReporter for LogReporter {
    fn persist_status(&self, snapshot: &RunSnapshot) {
        tracing::info!(
            run_id = snapshot.run_id,
            status = %snapshot.status,
            progress = snapshot.progress_percentage,
            completed_jobs = snapshot.completed_jobs,
            total_jobs = snapshot.total_jobs,
            "Run status"
        );
    }

    fn emit_metrics(&self, run_id: RunId, metrics: &RunMetrics) {
        tracing::info!(
            run_id,
            makespan = metrics.makespan,
            average_waiting_time = metrics.average_waiting_time,
            average_turnaround_time = metrics.average_turnaround_time,
            resource_utilization = metrics.resource_utilization,
            "Run metrics"
        );
    }
}

/// Keeps every record it is given. Used by tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    statuses: Mutex<Vec<RunSnapshot>>,
    metrics: Mutex<Vec<(RunId, RunMetrics)>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self, run_id: RunId) -> Vec<RunSnapshot> {
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect()
    }

    /// Statuses persisted for `run_id`, in order.
    pub fn statuses(&self, run_id: RunId) -> Vec<RunStatus> {
        self.snapshots(run_id).iter().map(|s| s.status).collect()
    }

    pub fn metrics(&self, run_id: RunId) -> Option<RunMetrics> {
        self.metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|(id, _)| *id == run_id)
            .map(|(_, m)| m.clone())
    }
}

impl RunReporter for MemoryReporter {
    fn persist_status(&self, snapshot: &RunSnapshot) {
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(snapshot.clone());
    }

    fn emit_metrics(&self, run_id: RunId, metrics: &RunMetrics) {
        self.metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((run_id, metrics.clone()));
    }
}
