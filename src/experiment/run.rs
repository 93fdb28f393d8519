use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimlabError};
use crate::scheduler::{PriorityPolicy, StrategyKind};

pub type RunId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    /// Declared for compatibility, no transition leads here yet.
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What a user asks to run: a scenario plus a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub name: String,
    pub scenario_id: u64,
    pub strategy_id: Option<String>,
    /// Queue order. Falls back to the manager's default.
    pub priority: Option<PriorityPolicy>,
}

impl ExperimentSpec {
    pub fn new(name: impl Into<String>, scenario_id: u64, strategy_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scenario_id,
            strategy_id: Some(strategy_id.into()),
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: PriorityPolicy) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Status record persisted on every transition and returned by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub name: String,
    pub status: RunStatus,
    pub progress_percentage: u8,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub total_jobs: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub strategy: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub error: Option<String>,
    /// `SimlabError::code()` of the error that failed the run, if any.
    #[serde(default)]
    pub error_code: Option<String>,
}

impl RunSnapshot {
    /// Process exit code for a run that ended with an error. Errors with no
    /// recorded code map to the internal exit code.
    pub fn exit_code(&self) -> Option<i32> {
        self.error.as_ref()?;
        Some(match &self.error_code {
            Some(code) => SimlabError::exit_code_for(code),
            None => SimlabError::exit_code_for("INTERNAL"),
        })
    }
}

/// One scheduling session.
#[derive(Debug, Clone)]
pub struct ExperimentRun {
    pub id: RunId,
    pub spec: ExperimentSpec,
    pub status: RunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub progress_percentage: u8,
    pub strategy: Option<StrategyKind>,
    pub work_dir: Option<PathBuf>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl ExperimentRun {
    pub fn new(id: RunId, spec: ExperimentSpec) -> Self {
        Self {
            id,
            spec,
            status: RunStatus::Pending,
            start_time: None,
            end_time: None,
            total_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            progress_percentage: 0,
            strategy: None,
            work_dir: None,
            error: None,
            error_code: None,
        }
    }

    /// Fails with `InvalidTransition` unless the run is in `expected`.
    pub fn ensure(&self, expected: RunStatus, action: &'static str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(SimlabError::InvalidTransition {
                run_id: self.id,
                from: self.status,
                action,
            })
        }
    }

    pub fn set_progress(&mut self, completed: usize, failed: usize) {
        self.completed_jobs = completed;
        self.failed_jobs = failed;
        self.progress_percentage = if self.total_jobs == 0 {
            100
        } else {
            (((completed + failed) * 100) / self.total_jobs).min(100) as u8
        };
    }

    /// Move to a terminal status and stamp the end time.
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.end_time = Some(Utc::now());
        self.error = error;
        self.error_code = None;
    }

    /// Move to `Failed`, keeping the error's message and code.
    pub fn fail(&mut self, err: &SimlabError) {
        self.finish(RunStatus::Failed, Some(err.to_string()));
        self.error_code = Some(err.code().to_string());
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.id,
            name: self.spec.name.clone(),
            status: self.status,
            progress_percentage: self.progress_percentage,
            completed_jobs: self.completed_jobs,
            failed_jobs: self.failed_jobs,
            total_jobs: self.total_jobs,
            start_time: self.start_time,
            end_time: self.end_time,
            strategy: self.strategy.as_ref().map(|s| s.to_string()),
            work_dir: self.work_dir.clone(),
            error: self.error.clone(),
            error_code: self.error_code.clone(),
        }
    }
}
