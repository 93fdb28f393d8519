use crate::error::Result;
use crate::scheduler::job::{Job, JobId, SimTime};
use crate::scheduler::strategy::{fcfs_pass, SchedContext, Strategy};

/// Pending jobs behind the head, smallest request first. Ties keep queue order.
fn backfill_candidates(ctx: &SchedContext<'_>, head: JobId) -> Vec<(JobId, u32, SimTime)> {
    let mut candidates: Vec<(usize, JobId, u32, SimTime)> = ctx
        .queue()
        .iter()
        .enumerate()
        .filter(|(_, j)| j.id != head)
        .map(|(pos, j)| (pos, j.id, j.requested_resources, j.requested_time))
        .collect();
    candidates.sort_by_key(|&(pos, _, requested, _)| (requested, pos));
    candidates
        .into_iter()
        .map(|(_, id, requested, time)| (id, requested, time))
        .collect()
}

/// Unreserved backfilling.
///
/// After the FCFS pass stops at the head job, any later job that fits in
/// the currently free units is started, smallest first. Nothing protects the
/// head job: a steady stream of small jobs can delay it indefinitely.
#[derive(Debug, Default)]
pub struct Backfill;

impl Backfill {
    pub fn new() -> Self {
        Self
    }

    fn schedule(&mut self, ctx: &mut SchedContext<'_>) -> Result<()> {
        let Some(head) = fcfs_pass(ctx)? else {
            return Ok(());
        };

        // Free units only shrink during the pass, so one sweep in ascending
        // size order starts everything that can fit.
        for (job_id, requested, _) in backfill_candidates(ctx, head) {
            if requested > ctx.free_count() {
                break;
            }
            ctx.launch(job_id)?;
            tracing::debug!(job_id, head, time = ctx.now(), "Job backfilled");
        }
        Ok(())
    }
}

impl Strategy for Backfill {
    fn name(&self) -> &str {
        "backfill"
    }

    fn on_simulation_begins(&mut self, ctx: &mut SchedContext<'_>) -> Result<()> {
        tracing::debug!(capacity = ctx.capacity(), "Backfill scheduler: simulation begins");
        Ok(())
    }

    fn on_job_submission(&mut self, _job: &Job, ctx: &mut SchedContext<'_>) -> Result<()> {
        self.schedule(ctx)
    }

    fn on_job_completion(&mut self, _job: &Job, ctx: &mut SchedContext<'_>) -> Result<()> {
        self.schedule(ctx)
    }

    fn on_job_killed(&mut self, _job: &Job, ctx: &mut SchedContext<'_>) -> Result<()> {
        self.schedule(ctx)
    }
}

/// Backfilling with a reservation for the head job.
///
/// The head job's earliest feasible start (the shadow time) is computed from
/// the expected ends of running jobs. A later job is only backfilled if it
/// fits now and its expected completion does not pass the shadow time.
#[derive(Debug, Default)]
pub struct ConservativeBackfill;

impl ConservativeBackfill {
    pub fn new() -> Self {
        Self
    }

    /// Earliest time at which `needed` units are free, assuming running
    /// jobs end at their expected end.
    pub fn shadow_time(ctx: &SchedContext<'_>, needed: u32) -> SimTime {
        let mut free = ctx.free_count();
        if needed <= free {
            return ctx.now();
        }
        let mut ends: Vec<(SimTime, JobId, u32)> = ctx
            .running()
            .map(|r| (r.expected_end, r.job_id, r.requested_resources))
            .collect();
        ends.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        for (end, _, released) in ends {
            free += released;
            if free >= needed {
                return end.max(ctx.now());
            }
        }
        // The queue refuses jobs larger than the pool, so this is only
        // reachable while units are held by reservations.
        SimTime::INFINITY
    }

    fn schedule(&mut self, ctx: &mut SchedContext<'_>) -> Result<()> {
        let Some(head) = fcfs_pass(ctx)? else {
            return Ok(());
        };
        let needed = ctx
            .queue()
            .get(head)
            .map(|j| j.requested_resources)
            .unwrap_or_default();
        let shadow = Self::shadow_time(ctx, needed);

        for (job_id, requested, requested_time) in backfill_candidates(ctx, head) {
            if requested > ctx.free_count() {
                break;
            }
            if ctx.now() + requested_time > shadow {
                continue;
            }
            ctx.launch(job_id)?;
            tracing::debug!(job_id, head, shadow, time = ctx.now(), "Job backfilled");
        }
        Ok(())
    }
}

impl Strategy for ConservativeBackfill {
    fn name(&self) -> &str {
        "conservative-backfill"
    }

    fn on_simulation_begins(&mut self, ctx: &mut SchedContext<'_>) -> Result<()> {
        tracing::debug!(
            capacity = ctx.capacity(),
            "Conservative backfill scheduler: simulation begins"
        );
        Ok(())
    }

    fn on_job_submission(&mut self, _job: &Job, ctx: &mut SchedContext<'_>) -> Result<()> {
        self.schedule(ctx)
    }

    fn on_job_completion(&mut self, _job: &Job, ctx: &mut SchedContext<'_>) -> Result<()> {
        self.schedule(ctx)
    }

    fn on_job_killed(&mut self, _job: &Job, ctx: &mut SchedContext<'_>) -> Result<()> {
        self.schedule(ctx)
    }
}
