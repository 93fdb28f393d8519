use simlab::error::{Result, SimlabError};
use simlab::scheduler::{
    Fcfs, Job, JobQueue, JobStatus, PriorityPolicy, ResourcePool, SchedContext, Strategy,
    StrategyKind, StrategyRegistry,
};
use simlab::sim::{DispatchOutcome, EventDispatcher, EventKind, TraceEvent};
use simlab::workload::Workload;
use tokio_util::sync::CancellationToken;

fn dispatcher(capacity: u32, workload: &Workload) -> EventDispatcher {
    EventDispatcher::from_workload(
        ResourcePool::new(capacity),
        JobQueue::new(PriorityPolicy::Fifo, capacity),
        Box::new(Fcfs::new()),
        workload,
    )
    .unwrap()
}

/// Accepts jobs and never starts any of them.
struct Idle;

impl Strategy for Idle {
    fn name(&self) -> &str {
        "idle"
    }

    fn on_simulation_begins(&mut self, _ctx: &mut SchedContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_job_submission(&mut self, _job: &Job, _ctx: &mut SchedContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_job_completion(&mut self, _job: &Job, _ctx: &mut SchedContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_job_killed(&mut self, _job: &Job, _ctx: &mut SchedContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Starts each job on the highest-numbered free units, via explicit
/// reservations.
struct TopDown;

impl TopDown {
    fn schedule(&mut self, ctx: &mut SchedContext<'_>) -> Result<()> {
        let pending: Vec<(u64, u32)> = ctx
            .queue()
            .iter()
            .map(|j| (j.id, j.requested_resources))
            .collect();
        for (job_id, requested) in pending {
            if requested > ctx.free_count() {
                break;
            }
            let units: Vec<u32> = ctx
                .available()
                .into_iter()
                .rev()
                .take(requested as usize)
                .collect();
            ctx.reserve(job_id, &units)?;
            ctx.launch(job_id)?;
        }
        Ok(())
    }
}

impl Strategy for TopDown {
    fn name(&self) -> &str {
        "top-down"
    }

    fn on_simulation_begins(&mut self, _ctx: &mut SchedContext<'_>) -> Result<()> {
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

#[test]
fn test_kill_request_frees_units() {
    let workload = Workload::new(vec![
        Job::new(1, 0.0, 3, 100.0),
        Job::new(2, 1.0, 2, 10.0),
    ])
    .with_kill(1, 50.0);
    let report = dispatcher(4, &workload).run().unwrap();

    let j1 = report.jobs.iter().find(|j| j.id == 1).unwrap();
    assert_eq!(j1.status, JobStatus::Killed);
    assert_eq!(j1.end_time, Some(50.0));
    // J2 was blocked until the kill released J1's units.
    assert_eq!(report.trace.start_time(2), Some(50.0));
    assert_eq!(report.metrics.killed_jobs, 1);
    assert_eq!(report.metrics.completed_jobs, 1);
    assert!(report.trace.entries().iter().any(|e| e.job_id == 1
        && e.time == 50.0
        && e.event == TraceEvent::Killed { walltime: false }));
}

#[test]
fn test_kill_of_pending_job_removes_it_from_queue() {
    let workload = Workload::new(vec![
        Job::new(1, 0.0, 4, 100.0),
        Job::new(2, 1.0, 1, 10.0),
    ])
    .with_kill(2, 5.0);
    let report = dispatcher(4, &workload).run().unwrap();

    let j2 = report.jobs.iter().find(|j| j.id == 2).unwrap();
    assert_eq!(j2.status, JobStatus::Killed);
    assert!(j2.start_time.is_none());
    assert_eq!(report.trace.completion_order(), vec![1]);
}

#[test]
fn test_kill_after_completion_is_ignored() {
    let workload = Workload::new(vec![Job::new(1, 0.0, 1, 10.0)]).with_kill(1, 20.0);
    let report = dispatcher(2, &workload).run().unwrap();
    assert_eq!(report.metrics.completed_jobs, 1);
    assert_eq!(report.metrics.killed_jobs, 0);
}

#[test]
fn test_walltime_kill() {
    let workload = Workload::new(vec![
        Job::new(1, 0.0, 1, 10.0).with_run_time(25.0),
        Job::new(2, 0.0, 1, 10.0).with_run_time(4.0),
    ]);
    let report = dispatcher(2, &workload).run().unwrap();

    let j1 = report.jobs.iter().find(|j| j.id == 1).unwrap();
    assert_eq!(j1.status, JobStatus::Killed);
    assert_eq!(j1.end_time, Some(10.0));
    let j2 = report.jobs.iter().find(|j| j.id == 2).unwrap();
    assert_eq!(j2.status, JobStatus::Completed);
    assert_eq!(j2.end_time, Some(4.0));
    assert!(report
        .trace
        .entries()
        .iter()
        .any(|e| e.job_id == 1 && e.event == TraceEvent::Killed { walltime: true }));
}

#[test]
fn test_oversized_job_is_rejected_and_run_continues() {
    let workload = Workload::new(vec![
        Job::new(1, 0.0, 2, 10.0),
        Job::new(2, 0.0, 9, 10.0),
        Job::new(3, 1.0, 2, 10.0),
    ]);
    let report = dispatcher(4, &workload).run().unwrap();

    assert_eq!(report.outcome, DispatchOutcome::Exhausted);
    assert_eq!(report.metrics.rejected_jobs, 1);
    assert_eq!(report.metrics.killed_jobs, 0);
    assert_eq!(report.metrics.completed_jobs, 2);
    assert!(report
        .trace
        .entries()
        .iter()
        .any(|e| e.job_id == 2 && matches!(e.event, TraceEvent::Rejected { .. })));
}

#[test]
fn test_simultaneous_events_apply_submissions_first() {
    // J1 completes at t=10 exactly when J2 arrives. J2 is queued before the
    // completion frees the pool, so it starts at t=10.
    let workload = Workload::new(vec![Job::new(1, 0.0, 4, 10.0), Job::new(2, 10.0, 4, 5.0)]);
    let mut dispatcher = dispatcher(4, &workload);

    assert_eq!(dispatcher.step().unwrap(), Some(EventKind::Submission));
    assert_eq!(dispatcher.step().unwrap(), Some(EventKind::Submission));
    assert_eq!(dispatcher.queue().ids(), vec![2]);
    assert_eq!(dispatcher.step().unwrap(), Some(EventKind::Completion));
    assert_eq!(dispatcher.clock(), 10.0);
    assert_eq!(dispatcher.job(2).map(|j| j.status), Some(JobStatus::Running));
}

#[test]
fn test_stalled_when_strategy_never_starts_jobs() {
    let workload = Workload::new(vec![Job::new(1, 0.0, 1, 10.0)]);
    let mut dispatcher = EventDispatcher::from_workload(
        ResourcePool::new(2),
        JobQueue::new(PriorityPolicy::Fifo, 2),
        Box::new(Idle),
        &workload,
    )
    .unwrap();

    let err = dispatcher.run().unwrap_err();
    assert!(matches!(err, SimlabError::Stalled { pending: 1 }));
    assert!(err.is_fatal());
    assert_eq!(dispatcher.pool().held_count(), 0);
    assert!(dispatcher.progress().halted);
}

#[test]
fn test_custom_strategy_reservations_are_used() {
    let workload = Workload::new(vec![Job::new(1, 0.0, 2, 10.0), Job::new(2, 0.0, 1, 10.0)]);
    let mut registry = StrategyRegistry::new();
    registry.register("top-down", || Box::new(TopDown));
    let strategy = registry
        .build(&StrategyKind::Custom("top-down".into()))
        .unwrap();
    let mut dispatcher = EventDispatcher::from_workload(
        ResourcePool::new(4),
        JobQueue::new(PriorityPolicy::Fifo, 4),
        strategy,
        &workload,
    )
    .unwrap();

    let report = dispatcher.run().unwrap();
    assert_eq!(report.strategy, "top-down");
    let allocations = report.trace.allocations();
    assert_eq!(allocations[0], (0.0, 1, vec![2, 3]));
    assert_eq!(allocations[1], (0.0, 2, vec![1]));
    assert_eq!(report.metrics.completed_jobs, 2);
}

#[test]
fn test_cancel_releases_every_unit() {
    let workload = Workload::new(vec![
        Job::new(1, 0.0, 2, 100.0),
        Job::new(2, 0.0, 1, 100.0),
        Job::new(3, 50.0, 1, 100.0),
    ]);
    let mut dispatcher = dispatcher(4, &workload);
    dispatcher.step().unwrap();
    dispatcher.step().unwrap();
    assert_eq!(dispatcher.pool().held_count(), 3);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = dispatcher.run_until_cancelled(&cancel).unwrap();

    assert_eq!(report.outcome, DispatchOutcome::Halted);
    assert_eq!(report.released_on_halt, 3);
    assert_eq!(dispatcher.pool().held_count(), 0);
    assert_eq!(dispatcher.running().count(), 0);
    assert!(report
        .jobs
        .iter()
        .filter(|j| j.id != 3)
        .all(|j| j.status == JobStatus::Killed));
}

#[test]
fn test_submission_in_the_past_is_refused() {
    let workload = Workload::new(vec![Job::new(1, 5.0, 1, 1.0)]);
    let mut dispatcher = dispatcher(1, &workload);
    dispatcher.step().unwrap();
    assert_eq!(dispatcher.clock(), 5.0);
    assert!(matches!(
        dispatcher.submit(Job::new(2, 1.0, 1, 1.0)),
        Err(SimlabError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_invalid_workload_is_refused_before_dispatch() {
    let workload = Workload::new(vec![Job::new(1, 0.0, 0, 10.0)]);
    let result = EventDispatcher::from_workload(
        ResourcePool::new(2),
        JobQueue::new(PriorityPolicy::Fifo, 2),
        Box::new(Fcfs::new()),
        &workload,
    );
    assert!(matches!(
        result,
        Err(SimlabError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_planned_end_of_killed_job_does_not_move_clock() {
    // J1 would end at t=100 but is killed at t=50; J2 then runs until t=60.
    let workload = Workload::new(vec![
        Job::new(1, 0.0, 3, 100.0),
        Job::new(2, 1.0, 2, 10.0),
    ])
    .with_kill(1, 50.0);
    let mut dispatcher = dispatcher(4, &workload);
    let report = dispatcher.run().unwrap();

    assert_eq!(report.metrics.simulation_time, 60.0);
    assert_eq!(dispatcher.clock(), 60.0);
    let last = report.trace.entries().last().unwrap();
    assert_eq!(last.time, 60.0);
}

#[test]
fn test_duplicate_submission_is_not_traced() {
    let mut dispatcher = EventDispatcher::new(
        ResourcePool::new(2),
        JobQueue::new(PriorityPolicy::Fifo, 2),
        Box::new(Fcfs::new()),
    );
    dispatcher.submit(Job::new(7, 0.0, 1, 10.0)).unwrap();
    dispatcher.submit(Job::new(7, 0.0, 1, 10.0)).unwrap();

    let err = dispatcher.run().unwrap_err();
    assert!(matches!(err, SimlabError::Inconsistent(_)));
    let submitted = dispatcher
        .trace()
        .entries()
        .iter()
        .filter(|e| e.job_id == 7 && e.event == TraceEvent::Submitted)
        .count();
    assert_eq!(submitted, 1);
}
