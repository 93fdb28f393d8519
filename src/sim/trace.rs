use serde::{Deserialize, Serialize};

use crate::scheduler::{JobId, SimTime, UnitId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Submitted,
    Started { units: Vec<UnitId> },
    Completed,
    Killed { walltime: bool },
    /// Refused at queue insertion because it can never fit.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub time: SimTime,
    pub job_id: JobId,
    #[serde(flatten)]
    pub event: TraceEvent,
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.event {
            TraceEvent::Submitted => write!(f, "[{:>10.2}] job {} submitted", self.time, self.job_id),
            TraceEvent::Started { units } => write!(
                f,
                "[{:>10.2}] job {} scheduled on {:?}",
                self.time, self.job_id, units
            ),
            TraceEvent::Completed => write!(f, "[{:>10.2}] job {} completed", self.time, self.job_id),
            TraceEvent::Killed { walltime: true } => write!(
                f,
                "[{:>10.2}] job {} killed (walltime reached)",
                self.time, self.job_id
            ),
            TraceEvent::Killed { walltime: false } => {
                write!(f, "[{:>10.2}] job {} killed", self.time, self.job_id)
            }
            TraceEvent::Rejected { reason } => write!(
                f,
                "[{:>10.2}] job {} rejected: {}",
                self.time, self.job_id, reason
            ),
        }
    }
}

/// Ordered record of every scheduling decision in a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTrace {
    entries: Vec<TraceEntry>,
}

impl ScheduleTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, time: SimTime, job_id: JobId, event: TraceEvent) {
        let entry = TraceEntry {
            time,
            job_id,
            event,
        };
        tracing::debug!(target: "simlab::trace", "{}", entry);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// `(time, job, units)` for every job start, in trace order.
    pub fn allocations(&self) -> Vec<(SimTime, JobId, Vec<UnitId>)> {
        self.entries
            .iter()
            .filter_map(|e| match &e.event {
                TraceEvent::Started { units } => Some((e.time, e.job_id, units.clone())),
                _ => None,
            })
            .collect()
    }

    /// Job ids in the order they completed normally.
    pub fn completion_order(&self) -> Vec<JobId> {
        self.entries
            .iter()
            .filter(|e| e.event == TraceEvent::Completed)
            .map(|e| e.job_id)
            .collect()
    }

    pub fn start_time(&self, job_id: JobId) -> Option<SimTime> {
        self.entries
            .iter()
            .find(|e| e.job_id == job_id && matches!(e.event, TraceEvent::Started { .. }))
            .map(|e| e.time)
    }

    /// One JSON object per line.
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
