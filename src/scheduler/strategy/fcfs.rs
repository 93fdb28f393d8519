use crate::error::Result;
use crate::scheduler::job::Job;
use crate::scheduler::strategy::{fcfs_pass, SchedContext, Strategy};

/// First-come-first-served.
///
/// Starts jobs strictly in queue order and stops at the first one that does
/// not fit, even if a later job would. Head-of-line blocking is expected.
#[derive(Debug, Default)]
pub struct Fcfs;

impl Fcfs {
    pub fn new() -> Self {
        Self
    }

    fn schedule(&mut self, ctx: &mut SchedContext<'_>) -> Result<()> {
        if let Some(head) = fcfs_pass(ctx)? {
            tracing::trace!(job_id = head, time = ctx.now(), "Queue blocked on head job");
        }
        Ok(())
    }
}

impl Strategy for Fcfs {
    fn name(&self) -> &str {
        "fcfs"
    }

    fn on_simulation_begins(&mut self, ctx: &mut SchedContext<'_>) -> Result<()> {
        tracing::debug!(capacity = ctx.capacity(), "FCFS scheduler: simulation begins");
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
