use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SimlabError};
use crate::scheduler::strategy::RunningJob;
use crate::scheduler::{
    Job, JobId, JobQueue, JobStatus, ResourcePool, SchedContext, SimTime, Strategy,
};
use crate::sim::event::{EventKind, EventPayload, EventQueue, SimEvent};
use crate::sim::metrics::RunMetrics;
use crate::sim::trace::{ScheduleTrace, TraceEvent};
use crate::workload::Workload;

/// Snapshot published after every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchProgress {
    pub clock: SimTime,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub killed_jobs: usize,
    pub rejected_jobs: usize,
    pub running_jobs: usize,
    pub pending_jobs: usize,
    pub held_units: u32,
    /// Set once the loop has returned, for any reason.
    pub halted: bool,
}

impl DispatchProgress {
    pub fn finished_jobs(&self) -> usize {
        self.completed_jobs + self.killed_jobs + self.rejected_jobs
    }

    pub fn percentage(&self) -> u8 {
        if self.total_jobs == 0 {
            return 100;
        }
        ((self.finished_jobs() * 100) / self.total_jobs).min(100) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    /// No future events and nothing pending.
    Exhausted,
    /// Stopped through the cancellation token.
    Halted,
}

/// Everything a finished dispatcher loop hands back.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub outcome: DispatchOutcome,
    pub capacity: u32,
    pub strategy: String,
    pub metrics: RunMetrics,
    pub trace: ScheduleTrace,
    pub jobs: Vec<Job>,
    /// Units freed by the hard halt, zero for an exhausted run.
    pub released_on_halt: u32,
}

/// Single-threaded discrete-event loop.
///
/// Events are delivered in timestamp order (see [`SimEvent`] for tie
/// breaking). Each event is applied to the pool and queue first, then the
/// strategy callback runs to completion before the next event is looked at.
pub struct EventDispatcher {
    clock: SimTime,
    pool: ResourcePool,
    queue: JobQueue,
    running: BTreeMap<JobId, RunningJob>,
    jobs: BTreeMap<JobId, Job>,
    events: EventQueue,
    strategy: Box<dyn Strategy>,
    trace: ScheduleTrace,
    total_jobs: usize,
    rejected_jobs: usize,
    released_on_halt: u32,
    begun: bool,
    halted: bool,
    pacing: Option<Duration>,
    progress: Option<watch::Sender<DispatchProgress>>,
}

impl EventDispatcher {
    pub fn new(pool: ResourcePool, queue: JobQueue, strategy: Box<dyn Strategy>) -> Self {
        Self {
            clock: 0.0,
            pool,
            queue,
            running: BTreeMap::new(),
            jobs: BTreeMap::new(),
            events: EventQueue::new(),
            strategy,
            trace: ScheduleTrace::new(),
            total_jobs: 0,
            rejected_jobs: 0,
            released_on_halt: 0,
            begun: false,
            halted: false,
            pacing: None,
            progress: None,
        }
    }

    /// Dispatcher seeded with every submission and kill of `workload`.
    pub fn from_workload(
        pool: ResourcePool,
        queue: JobQueue,
        strategy: Box<dyn Strategy>,
        workload: &Workload,
    ) -> Result<Self> {
        workload.validate()?;
        let mut dispatcher = Self::new(pool, queue, strategy);
        for job in &workload.jobs {
            dispatcher.submit(job.clone())?;
        }
        for &(job_id, time) in &workload.kills {
            dispatcher.request_kill(job_id, time)?;
        }
        Ok(dispatcher)
    }

    /// Wait this long in wall-clock time between events.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = (!pacing.is_zero()).then_some(pacing);
        self
    }

    pub fn with_progress(mut self, tx: watch::Sender<DispatchProgress>) -> Self {
        self.progress = Some(tx);
        self.publish();
        self
    }

    /// Schedule the submission of a job at its submission time.
    pub fn submit(&mut self, mut job: Job) -> Result<()> {
        if job.submission_time < self.clock {
            return Err(SimlabError::InvalidConfiguration(format!(
                "job {} submitted at {} which is before the clock ({})",
                job.id, job.submission_time, self.clock
            )));
        }
        job.status = JobStatus::Pending;
        self.total_jobs += 1;
        self.events.push(job.submission_time, EventPayload::Submit(job));
        Ok(())
    }

    /// Schedule an external kill request.
    pub fn request_kill(&mut self, job_id: JobId, time: SimTime) -> Result<()> {
        if time < self.clock {
            return Err(SimlabError::InvalidConfiguration(format!(
                "kill for job {job_id} at {time} is before the clock ({})",
                self.clock
            )));
        }
        self.events.push(
            time,
            EventPayload::Kill {
                job_id,
                walltime: false,
            },
        );
        Ok(())
    }

    pub fn clock(&self) -> SimTime {
        self.clock
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn running(&self) -> impl Iterator<Item = &RunningJob> {
        self.running.values()
    }

    pub fn job(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    pub fn trace(&self) -> &ScheduleTrace {
        &self.trace
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn is_idle(&self) -> bool {
        self.events.is_empty()
    }

    pub fn progress(&self) -> DispatchProgress {
        let mut completed = 0;
        let mut killed = 0;
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Completed => completed += 1,
                JobStatus::Killed => killed += 1,
                _ => {}
            }
        }
        DispatchProgress {
            clock: self.clock,
            total_jobs: self.total_jobs,
            completed_jobs: completed,
            killed_jobs: killed - self.rejected_jobs,
            rejected_jobs: self.rejected_jobs,
            running_jobs: self.running.len(),
            pending_jobs: self.queue.len(),
            held_units: self.pool.held_count(),
            halted: self.halted,
        }
    }

    fn publish(&self) {
        if let Some(tx) = &self.progress {
            tx.send_replace(self.progress());
        }
    }

    fn begin(&mut self) -> Result<()> {
        if self.begun {
            return Ok(());
        }
        self.begun = true;
        tracing::info!(
            strategy = self.strategy.name(),
            capacity = self.pool.capacity(),
            jobs = self.total_jobs,
            "Simulation begins"
        );
        let mut ctx = SchedContext::new(
            self.clock,
            &mut self.pool,
            &mut self.queue,
            &mut self.running,
        );
        self.strategy.on_simulation_begins(&mut ctx)?;
        let launched = ctx.take_launched();
        self.record_launches(launched);
        self.check_consistency()
    }

    /// Apply the next event and run the strategy callback.
    ///
    /// Returns the kind of event processed, or `None` when nothing is left.
    pub fn step(&mut self) -> Result<Option<EventKind>> {
        self.begin()?;
        let event = loop {
            let Some(event) = self.events.pop() else {
                if !self.queue.is_empty() {
                    return Err(SimlabError::Stalled {
                        pending: self.queue.len(),
                    });
                }
                return Ok(None);
            };
            // Obsolete events are dropped without moving the clock.
            if !self.is_stale(&event) {
                break event;
            }
        };
        let kind = event.kind();
        self.apply(event)?;
        self.check_consistency()?;
        self.publish();
        Ok(Some(kind))
    }

    /// Run until the event stream is exhausted.
    pub fn run(&mut self) -> Result<DispatchReport> {
        self.run_until_cancelled(&CancellationToken::new())
    }

    /// Run until the event stream is exhausted or `cancel` fires.
    ///
    /// On cancellation or on any error every held unit is released before
    /// returning.
    pub fn run_until_cancelled(&mut self, cancel: &CancellationToken) -> Result<DispatchReport> {
        let result = self.drive(cancel);
        match result {
            Ok(DispatchOutcome::Exhausted) => {
                self.halted = true;
                self.publish();
                tracing::info!(
                    strategy = self.strategy.name(),
                    clock = self.clock,
                    "Simulation finished"
                );
                Ok(self.report(DispatchOutcome::Exhausted))
            }
            Ok(DispatchOutcome::Halted) => {
                self.halt();
                Ok(self.report(DispatchOutcome::Halted))
            }
            Err(e) => {
                tracing::error!(clock = self.clock, error = %e, "Simulation aborted");
                self.halt();
                Err(e)
            }
        }
    }

    fn drive(&mut self, cancel: &CancellationToken) -> Result<DispatchOutcome> {
        loop {
            if cancel.is_cancelled() {
                return Ok(DispatchOutcome::Halted);
            }
            if self.step()?.is_none() {
                return Ok(DispatchOutcome::Exhausted);
            }
            if let Some(pacing) = self.pacing {
                if Self::pace(pacing, cancel) {
                    return Ok(DispatchOutcome::Halted);
                }
            }
        }
    }

    /// Sleep for `pacing`, waking early on cancellation. Returns true if
    /// cancelled.
    fn pace(pacing: Duration, cancel: &CancellationToken) -> bool {
        const SLICE: Duration = Duration::from_millis(5);
        let deadline = Instant::now() + pacing;
        loop {
            if cancel.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }

    /// Hard stop: kill running jobs and free every held unit.
    pub fn halt(&mut self) -> u32 {
        let running: Vec<JobId> = self.running.keys().copied().collect();
        for job_id in running {
            self.running.remove(&job_id);
            if let Some(job) = self.jobs.get_mut(&job_id) {
                job.status = JobStatus::Killed;
                job.end_time = Some(self.clock);
            }
            self.trace
                .record(self.clock, job_id, TraceEvent::Killed { walltime: false });
        }
        let released = self.pool.release_all();
        self.released_on_halt += released;
        self.halted = true;
        tracing::info!(clock = self.clock, released, "Simulation halted");
        self.publish();
        released
    }

    pub fn report(&self, outcome: DispatchOutcome) -> DispatchReport {
        DispatchReport {
            outcome,
            capacity: self.pool.capacity(),
            strategy: self.strategy.name().to_string(),
            metrics: RunMetrics::compute(
                self.jobs.values(),
                self.pool.capacity(),
                self.rejected_jobs,
                self.clock,
            ),
            trace: self.trace.clone(),
            jobs: self.jobs.values().cloned().collect(),
            released_on_halt: self.released_on_halt,
        }
    }

    /// A completion or kill for a job that is no longer in the state the
    /// event was scheduled for, e.g. the planned end of a job that was
    /// killed early.
    fn is_stale(&self, event: &SimEvent) -> bool {
        let status = self.jobs.get(&event.job_id()).map(|j| j.status);
        let stale = match &event.payload {
            EventPayload::Submit(_) => false,
            EventPayload::Complete(_) | EventPayload::Kill { walltime: true, .. } => {
                status != Some(JobStatus::Running)
            }
            EventPayload::Kill {
                walltime: false, ..
            } => !matches!(status, Some(JobStatus::Pending | JobStatus::Running)),
        };
        if stale {
            tracing::debug!(
                job_id = event.job_id(),
                time = event.time,
                status = ?status,
                "Dropping obsolete event"
            );
        }
        stale
    }

    fn apply(&mut self, event: SimEvent) -> Result<()> {
        self.clock = event.time;
        let now = self.clock;

        let job = match event.payload {
            EventPayload::Submit(job) => {
                if self.jobs.contains_key(&job.id) {
                    return Err(SimlabError::Inconsistent(format!(
                        "job {} submitted twice",
                        job.id
                    )));
                }
                self.trace.record(now, job.id, TraceEvent::Submitted);
                self.jobs.insert(job.id, job.clone());
                match self.queue.push(job.clone()) {
                    Ok(()) => {}
                    Err(e @ SimlabError::UnsatisfiableJob { .. }) => {
                        tracing::warn!(job_id = job.id, error = %e, "Job rejected");
                        self.rejected_jobs += 1;
                        if let Some(rejected) = self.jobs.get_mut(&job.id) {
                            rejected.status = JobStatus::Killed;
                            rejected.end_time = Some(now);
                        }
                        self.trace.record(
                            now,
                            job.id,
                            TraceEvent::Rejected {
                                reason: e.to_string(),
                            },
                        );
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
                return self.callback(EventKind::Submission, &job);
            }
            EventPayload::Complete(job_id) => {
                if self.jobs.get(&job_id).map(|j| j.status) != Some(JobStatus::Running) {
                    tracing::debug!(job_id, "Ignoring completion of job that is not running");
                    return Ok(());
                }
                self.finish_running(job_id, JobStatus::Completed)?;
                self.trace.record(now, job_id, TraceEvent::Completed);
                self.jobs.get(&job_id).cloned()
            }
            EventPayload::Kill { job_id, walltime } => {
                let Some(status) = self.jobs.get(&job_id).map(|j| j.status) else {
                    tracing::warn!(job_id, "Ignoring kill of job that was never submitted");
                    return Ok(());
                };
                match status {
                    JobStatus::Pending => {
                        self.queue.remove(job_id);
                        if let Some(job) = self.jobs.get_mut(&job_id) {
                            job.status = JobStatus::Killed;
                            job.end_time = Some(now);
                        }
                    }
                    JobStatus::Running => self.finish_running(job_id, JobStatus::Killed)?,
                    JobStatus::Completed | JobStatus::Killed => {
                        tracing::debug!(job_id, "Ignoring kill of finished job");
                        return Ok(());
                    }
                }
                if walltime {
                    tracing::warn!(job_id, time = now, "Job killed at walltime");
                } else {
                    tracing::info!(job_id, time = now, "Job killed");
                }
                self.trace.record(now, job_id, TraceEvent::Killed { walltime });
                self.jobs.get(&job_id).cloned()
            }
        };

        let kind = if matches!(job.as_ref().map(|j| j.status), Some(JobStatus::Completed)) {
            EventKind::Completion
        } else {
            EventKind::Kill
        };
        match job {
            Some(job) => self.callback(kind, &job),
            None => Err(SimlabError::Internal("job record vanished".to_string())),
        }
    }

    /// Release a running job's units and mark it terminal.
    fn finish_running(&mut self, job_id: JobId, status: JobStatus) -> Result<()> {
        let running = self
            .running
            .remove(&job_id)
            .ok_or(SimlabError::JobNotFound(job_id))?;
        self.pool.release(&running.units)?;
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(SimlabError::JobNotFound(job_id))?;
        job.status = status;
        job.end_time = Some(self.clock);
        Ok(())
    }

    fn callback(&mut self, kind: EventKind, job: &Job) -> Result<()> {
        let mut ctx = SchedContext::new(
            self.clock,
            &mut self.pool,
            &mut self.queue,
            &mut self.running,
        );
        match kind {
            EventKind::Submission => self.strategy.on_job_submission(job, &mut ctx)?,
            EventKind::Completion => self.strategy.on_job_completion(job, &mut ctx)?,
            EventKind::Kill => self.strategy.on_job_killed(job, &mut ctx)?,
        }
        let launched = ctx.take_launched();
        self.record_launches(launched);
        Ok(())
    }

    fn record_launches(&mut self, launched: Vec<Job>) {
        for job in launched {
            let start = job.start_time.unwrap_or(self.clock);
            let (end, walltime) = job.planned_end(start);
            self.trace.record(
                start,
                job.id,
                TraceEvent::Started {
                    units: job.allocated.clone(),
                },
            );
            let payload = if walltime {
                EventPayload::Kill {
                    job_id: job.id,
                    walltime: true,
                }
            } else {
                EventPayload::Complete(job.id)
            };
            self.events.push(end, payload);
            self.jobs.insert(job.id, job);
        }
    }

    /// Every held unit belongs to a running job and every running job holds
    /// exactly its units.
    fn check_consistency(&self) -> Result<()> {
        let mut expected: u32 = 0;
        for running in self.running.values() {
            if running.units.len() as u32 != running.requested_resources {
                return Err(SimlabError::Inconsistent(format!(
                    "job {} holds {} units but requested {}",
                    running.job_id,
                    running.units.len(),
                    running.requested_resources
                )));
            }
            for &unit in &running.units {
                if self.pool.holder(unit) != Some(running.job_id) {
                    return Err(SimlabError::Inconsistent(format!(
                        "unit {unit} of running job {} is not held by it",
                        running.job_id
                    )));
                }
            }
            expected += running.requested_resources;
        }
        if expected != self.pool.held_count() {
            return Err(SimlabError::Inconsistent(format!(
                "{} units held but running jobs account for {expected}",
                self.pool.held_count()
            )));
        }
        if expected > self.pool.capacity() {
            return Err(SimlabError::Inconsistent(format!(
                "running jobs hold {expected} units, pool has {}",
                self.pool.capacity()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("clock", &self.clock)
            .field("strategy", &self.strategy.name())
            .field("pending", &self.queue.len())
            .field("running", &self.running.len())
            .field("events", &self.events.len())
            .finish()
    }
}
