//! Scheduling strategies.
//!
//! A strategy is a fixed set of four callbacks invoked synchronously by the
//! event dispatcher. Each callback receives a [`SchedContext`], a borrowed
//! view over the run's resource pool, pending queue, and running set, and
//! must leave them consistent before returning.
//!
//! Built-in variants:
//!
//! - [`Fcfs`]: strict in-order scan, stops at the first job that does not fit
//! - [`Backfill`]: FCFS pass, then starts any smaller job that fits now
//! - [`ConservativeBackfill`]: like `Backfill`, but a backfilled job must
//!   finish before the head job's reserved start time

pub mod backfill;
pub mod fcfs;

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimlabError};
use crate::scheduler::job::{Job, JobId, JobStatus, SimTime, UnitId};
use crate::scheduler::pool::ResourcePool;
use crate::scheduler::queue::JobQueue;

pub use backfill::{Backfill, ConservativeBackfill};
pub use fcfs::Fcfs;

/// Placement decision component driven by the event dispatcher.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn on_simulation_begins(&mut self, ctx: &mut SchedContext<'_>) -> Result<()>;

    fn on_job_submission(&mut self, job: &Job, ctx: &mut SchedContext<'_>) -> Result<()>;

    fn on_job_completion(&mut self, job: &Job, ctx: &mut SchedContext<'_>) -> Result<()>;

    fn on_job_killed(&mut self, job: &Job, ctx: &mut SchedContext<'_>) -> Result<()>;
}

/// A job currently holding resources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningJob {
    pub job_id: JobId,
    pub requested_resources: u32,
    pub units: Vec<UnitId>,
    pub started_at: SimTime,
    /// Start plus requested time. Used for planning, the job may end sooner.
    pub expected_end: SimTime,
}

/// Borrowed view a strategy gets for the duration of one callback.
pub struct SchedContext<'a> {
    now: SimTime,
    pool: &'a mut ResourcePool,
    queue: &'a mut JobQueue,
    running: &'a mut BTreeMap<JobId, RunningJob>,
    launched: Vec<Job>,
}

impl<'a> SchedContext<'a> {
    pub fn new(
        now: SimTime,
        pool: &'a mut ResourcePool,
        queue: &'a mut JobQueue,
        running: &'a mut BTreeMap<JobId, RunningJob>,
    ) -> Self {
        Self {
            now,
            pool,
            queue,
            running,
            launched: Vec::new(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn capacity(&self) -> u32 {
        self.pool.capacity()
    }

    /// Free units, ascending.
    pub fn available(&self) -> Vec<UnitId> {
        self.pool.available()
    }

    pub fn free_count(&self) -> u32 {
        self.pool.free_count()
    }

    pub fn queue(&self) -> &JobQueue {
        self.queue
    }

    /// Running jobs in ascending job id order.
    pub fn running(&self) -> impl Iterator<Item = &RunningJob> {
        self.running.values()
    }

    /// Reserve specific units on behalf of a pending job ahead of
    /// [`launch`](Self::launch).
    pub fn reserve(&mut self, job_id: JobId, units: &[UnitId]) -> Result<()> {
        if !self.queue.contains(job_id) {
            return Err(SimlabError::JobNotFound(job_id));
        }
        self.pool.reserve(job_id, units)
    }

    /// Drop reservations made with [`reserve`](Self::reserve). Units of
    /// running jobs are released by the dispatcher, not by strategies.
    pub fn release(&mut self, units: &[UnitId]) -> Result<()> {
        for &unit in units {
            if let Some(holder) = self.pool.holder(unit) {
                if self.running.contains_key(&holder) {
                    return Err(SimlabError::InvalidRelease(unit));
                }
            }
        }
        self.pool.release(units)
    }

    /// Start a pending job.
    ///
    /// Uses the units already reserved for the job if there are any,
    /// otherwise takes the lowest-numbered free units.
    pub fn launch(&mut self, job_id: JobId) -> Result<Vec<UnitId>> {
        let requested = self
            .queue
            .get(job_id)
            .map(|j| j.requested_resources)
            .ok_or(SimlabError::JobNotFound(job_id))?;

        let held = self.pool.held_by(job_id);
        let units = if held.is_empty() {
            let units = self.pool.lowest_free(requested).ok_or_else(|| {
                SimlabError::Inconsistent(format!(
                    "job {job_id} launched with {requested} units requested but only {} free",
                    self.pool.free_count()
                ))
            })?;
            self.pool.reserve(job_id, &units)?;
            units
        } else if held.len() as u32 == requested {
            held
        } else {
            return Err(SimlabError::Inconsistent(format!(
                "job {job_id} holds {} units but requested {requested}",
                held.len()
            )));
        };

        let Some(mut job) = self.queue.remove(job_id) else {
            return Err(SimlabError::JobNotFound(job_id));
        };
        job.status = JobStatus::Running;
        job.start_time = Some(self.now);
        job.allocated = units.clone();

        self.running.insert(
            job_id,
            RunningJob {
                job_id,
                requested_resources: requested,
                units: units.clone(),
                started_at: self.now,
                expected_end: self.now + job.requested_time,
            },
        );
        tracing::debug!(job_id, time = self.now, units = ?units, "Job scheduled");
        self.launched.push(job);
        Ok(units)
    }

    /// Jobs started during this callback, in launch order.
    pub fn take_launched(&mut self) -> Vec<Job> {
        std::mem::take(&mut self.launched)
    }
}

/// Start jobs from the front of the queue until one does not fit.
///
/// Returns the id of the blocking head job, if any.
pub(crate) fn fcfs_pass(ctx: &mut SchedContext<'_>) -> Result<Option<JobId>> {
    loop {
        let Some((job_id, requested)) = ctx.queue().peek().map(|j| (j.id, j.requested_resources))
        else {
            return Ok(None);
        };
        if requested > ctx.free_count() {
            return Ok(Some(job_id));
        }
        ctx.launch(job_id)?;
    }
}

/// Strategy variant tag resolved at run configuration time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Fcfs,
    Backfill,
    ConservativeBackfill,
    Custom(String),
}

impl StrategyKind {
    pub const BUILTIN: [StrategyKind; 3] = [
        StrategyKind::Fcfs,
        StrategyKind::Backfill,
        StrategyKind::ConservativeBackfill,
    ];
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Fcfs => write!(f, "fcfs"),
            StrategyKind::Backfill => write!(f, "backfill"),
            StrategyKind::ConservativeBackfill => write!(f, "conservative-backfill"),
            StrategyKind::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = SimlabError;

    /// Parses the built-in identifiers only.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "fcfs" => Ok(StrategyKind::Fcfs),
            "backfill" => Ok(StrategyKind::Backfill),
            "conservative-backfill" => Ok(StrategyKind::ConservativeBackfill),
            _ => Err(SimlabError::UnknownStrategy(s.to_string())),
        }
    }
}

pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

/// Builds strategy instances from variant tags. Custom variants must be
/// registered before use.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    custom: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &StrategyKind) -> bool {
        match kind {
            StrategyKind::Custom(name) => self.custom.contains_key(name),
            _ => true,
        }
    }

    pub fn build(&self, kind: &StrategyKind) -> Result<Box<dyn Strategy>> {
        match kind {
            StrategyKind::Fcfs => Ok(Box::new(Fcfs::new())),
            StrategyKind::Backfill => Ok(Box::new(Backfill::new())),
            StrategyKind::ConservativeBackfill => Ok(Box::new(ConservativeBackfill::new())),
            StrategyKind::Custom(name) => self
                .custom
                .get(name)
                .map(|factory| factory())
                .ok_or_else(|| SimlabError::UnknownStrategy(name.clone())),
        }
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}
