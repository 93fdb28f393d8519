use serde::{Deserialize, Serialize};

pub type JobId = u64;
pub type UnitId = u32;

/// Simulation-relative time, in seconds.
pub type SimTime = f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Killed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Killed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Killed => write!(f, "killed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub submission_time: SimTime,
    pub requested_resources: u32,
    /// Walltime the job asked for. Also the duration strategies plan with.
    pub requested_time: SimTime,
    /// How long the job actually runs once started. Runs longer than
    /// `requested_time` are killed at the walltime.
    pub run_time: SimTime,
    pub status: JobStatus,
    pub start_time: Option<SimTime>,
    pub end_time: Option<SimTime>,
    pub allocated: Vec<UnitId>,
}

impl Job {
    pub fn new(
        id: JobId,
        submission_time: SimTime,
        requested_resources: u32,
        requested_time: SimTime,
    ) -> Self {
        Self {
            id,
            submission_time,
            requested_resources,
            requested_time,
            run_time: requested_time,
            status: JobStatus::Pending,
            start_time: None,
            end_time: None,
            allocated: Vec::new(),
        }
    }

    pub fn with_run_time(mut self, run_time: SimTime) -> Self {
        self.run_time = run_time;
        self
    }

    /// Time the job will stop once started, and whether that stop is a
    /// walltime kill.
    pub fn planned_end(&self, start: SimTime) -> (SimTime, bool) {
        if self.run_time > self.requested_time {
            (start + self.requested_time, true)
        } else {
            (start + self.run_time, false)
        }
    }

    pub fn waiting_time(&self) -> Option<SimTime> {
        self.start_time.map(|s| s - self.submission_time)
    }

    pub fn turnaround_time(&self) -> Option<SimTime> {
        self.end_time.map(|e| e - self.submission_time)
    }

    /// Time actually spent holding resources.
    pub fn run_duration(&self) -> Option<SimTime> {
        match (self.start_time, self.end_time) {
            (Some(s), Some(e)) => Some(e - s),
            _ => None,
        }
    }
}
