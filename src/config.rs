use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::PriorityPolicy;

const DEFAULT_MAX_QUEUED_JOBS: usize = 10_000;

/// Configuration handed to the lifecycle manager at construction.
///
/// There is no global state: two managers with different configs can run
/// side by side in one process.
#[derive(Debug, Clone)]
pub struct LabConfig {
    /// Queue order used when a run does not ask for one.
    pub default_priority: PriorityPolicy,
    /// Upper bound on pending jobs per run.
    pub max_queued_jobs: usize,
    /// Parent directory for per-run working directories.
    /// When unset runs have no working directory and write no artifacts.
    pub work_root: Option<PathBuf>,
    /// Wall-clock delay between simulation events. Zero runs flat out.
    pub event_pacing_ms: u64,
    /// Write `trace.jsonl` and `metrics.json` into the working directory
    /// when a run finishes.
    pub write_artifacts: bool,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            default_priority: PriorityPolicy::Fifo,
            max_queued_jobs: DEFAULT_MAX_QUEUED_JOBS,
            work_root: None,
            event_pacing_ms: 0,
            write_artifacts: true,
        }
    }
}

impl LabConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: PriorityPolicy) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    pub fn with_event_pacing_ms(mut self, ms: u64) -> Self {
        self.event_pacing_ms = ms;
        self
    }

    pub fn with_max_queued_jobs(mut self, max: usize) -> Self {
        self.max_queued_jobs = max;
        self
    }

    pub fn without_artifacts(mut self) -> Self {
        self.write_artifacts = false;
        self
    }

    pub fn event_pacing(&self) -> Duration {
        Duration::from_millis(self.event_pacing_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_config_default() {
        let cfg = LabConfig::default();
        assert_eq!(cfg.default_priority, PriorityPolicy::Fifo);
        assert_eq!(cfg.max_queued_jobs, 10_000);
        assert!(cfg.work_root.is_none());
        assert_eq!(cfg.event_pacing_ms, 0);
        assert!(cfg.write_artifacts);
        assert!(cfg.event_pacing().is_zero());
    }

    #[test]
    fn lab_config_builders() {
        let cfg = LabConfig::new()
            .with_priority(PriorityPolicy::Size)
            .with_work_root("/tmp/simlab")
            .with_event_pacing_ms(25)
            .with_max_queued_jobs(16)
            .without_artifacts();
        assert_eq!(cfg.default_priority, PriorityPolicy::Size);
        assert_eq!(cfg.work_root, Some(PathBuf::from("/tmp/simlab")));
        assert_eq!(cfg.event_pacing(), Duration::from_millis(25));
        assert_eq!(cfg.max_queued_jobs, 16);
        assert!(!cfg.write_artifacts);
    }
}
