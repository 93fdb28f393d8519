use thiserror::Error;

use crate::experiment::RunStatus;
use crate::scheduler::{JobId, UnitId};

#[derive(Error, Debug)]
pub enum SimlabError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Job {job_id} requests {requested} resources but the pool only has {capacity}")]
    UnsatisfiableJob {
        job_id: JobId,
        requested: u32,
        capacity: u32,
    },

    #[error("Resource unit {unit} is already held by job {holder}")]
    ResourceConflict { unit: UnitId, holder: JobId },

    #[error("Resource unit {0} is not held")]
    InvalidRelease(UnitId),

    #[error("Resource unit {0} does not exist")]
    UnknownUnit(UnitId),

    #[error("Cannot {action} run {run_id} while it is {from}")]
    InvalidTransition {
        run_id: u64,
        from: RunStatus,
        action: &'static str,
    },

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Scheduler state inconsistent: {0}")]
    Inconsistent(String),

    #[error("Event stream exhausted with {pending} jobs still pending")]
    Stalled { pending: usize },

    #[error("Workload decode error: {0}")]
    Workload(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SimlabError {
    /// Stable error code surfaced to the control surface.
    pub fn code(&self) -> &'static str {
        match self {
            SimlabError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            SimlabError::UnsatisfiableJob { .. } => "UNSATISFIABLE_JOB",
            SimlabError::ResourceConflict { .. } => "RESOURCE_CONFLICT",
            SimlabError::InvalidRelease(_) => "INVALID_RELEASE",
            SimlabError::UnknownUnit(_) => "UNKNOWN_UNIT",
            SimlabError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SimlabError::UnknownStrategy(_) => "UNKNOWN_STRATEGY",
            SimlabError::NotFound(_) => "NOT_FOUND",
            SimlabError::JobNotFound(_) => "JOB_NOT_FOUND",
            SimlabError::Inconsistent(_) => "INCONSISTENT_STATE",
            SimlabError::Stalled { .. } => "STALLED",
            SimlabError::Workload(_) => "WORKLOAD_DECODE",
            SimlabError::Io(_) => "IO",
            SimlabError::Internal(_) => "INTERNAL",
        }
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> i32 {
        Self::exit_code_for(self.code())
    }

    /// Exit code for a code string previously taken from [`code`](Self::code),
    /// e.g. one stored on a failed run. Unrecognised codes map to `INTERNAL`.
    pub fn exit_code_for(code: &str) -> i32 {
        EXIT_CODES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, exit)| *exit)
            .unwrap_or(INTERNAL_EXIT_CODE)
    }

    /// Invariant violations inside the scheduling core. These abort the run
    /// and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SimlabError::ResourceConflict { .. }
                | SimlabError::InvalidRelease(_)
                | SimlabError::UnknownUnit(_)
                | SimlabError::Inconsistent(_)
                | SimlabError::Stalled { .. }
                | SimlabError::Internal(_)
        )
    }
}

const INTERNAL_EXIT_CODE: i32 = 70;

const EXIT_CODES: [(&str, i32); 14] = [
    ("INVALID_CONFIGURATION", 2),
    ("UNSATISFIABLE_JOB", 3),
    ("RESOURCE_CONFLICT", 4),
    ("INVALID_RELEASE", 5),
    ("UNKNOWN_UNIT", 6),
    ("INVALID_TRANSITION", 7),
    ("UNKNOWN_STRATEGY", 8),
    ("NOT_FOUND", 9),
    ("JOB_NOT_FOUND", 10),
    ("INCONSISTENT_STATE", 11),
    ("STALLED", 12),
    ("WORKLOAD_DECODE", 13),
    ("IO", 14),
    ("INTERNAL", INTERNAL_EXIT_CODE),
];

pub type Result<T> = std::result::Result<T, SimlabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errors = vec![
            SimlabError::InvalidConfiguration("x".into()),
            SimlabError::UnsatisfiableJob {
                job_id: 1,
                requested: 8,
                capacity: 4,
            },
            SimlabError::ResourceConflict { unit: 0, holder: 1 },
            SimlabError::InvalidRelease(0),
            SimlabError::UnknownUnit(9),
            SimlabError::InvalidTransition {
                run_id: 1,
                from: RunStatus::Completed,
                action: "start",
            },
            SimlabError::UnknownStrategy("x".into()),
            SimlabError::NotFound("x".into()),
            SimlabError::JobNotFound(3),
            SimlabError::Inconsistent("x".into()),
            SimlabError::Stalled { pending: 1 },
            SimlabError::Workload(serde_json::from_str::<u32>("x").unwrap_err()),
            SimlabError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")),
            SimlabError::Internal("x".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        let mut exits: Vec<_> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort();
        codes.dedup();
        exits.sort();
        exits.dedup();
        assert_eq!(codes.len(), errors.len());
        assert_eq!(exits.len(), errors.len());
        assert!(exits.iter().all(|&code| code != 0 && code != 1));
    }

    #[test]
    fn stored_codes_map_back_to_exit_codes() {
        let err = SimlabError::ResourceConflict { unit: 0, holder: 1 };
        assert_eq!(SimlabError::exit_code_for(err.code()), err.exit_code());
        assert_eq!(SimlabError::exit_code_for("STALLED"), 12);
        assert_eq!(SimlabError::exit_code_for("NO_SUCH_CODE"), 70);
    }

    #[test]
    fn invariant_violations_are_fatal() {
        assert!(SimlabError::ResourceConflict { unit: 0, holder: 1 }.is_fatal());
        assert!(SimlabError::InvalidRelease(2).is_fatal());
        assert!(!SimlabError::InvalidConfiguration("x".into()).is_fatal());
        assert!(!SimlabError::InvalidTransition {
            run_id: 1,
            from: RunStatus::Pending,
            action: "stop",
        }
        .is_fatal());
    }

    #[test]
    fn transition_message_names_state() {
        let err = SimlabError::InvalidTransition {
            run_id: 7,
            from: RunStatus::Running,
            action: "start",
        };
        assert_eq!(err.to_string(), "Cannot start run 7 while it is running");
    }
}
