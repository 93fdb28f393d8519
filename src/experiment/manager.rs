//! Lifecycle manager: the state machine around one scheduling run.
//!
//! ```text
//! Pending ──start──▶ Running ──backend done──▶ Completed
//!    │                  │    ──backend error─▶ Failed
//!    │                  └────stop───────────▶ Cancelled
//!    └──invalid scenario──────────────────────▶ Failed
//! ```
//!
//! Each run sits behind its own mutex and every transition holds it across
//! the whole check-and-set, so two concurrent `start` calls for the same run
//! cannot both succeed and a `stop` cannot interleave with a `start`.
//!
//! The built-in backend is the in-process [`EventDispatcher`], run on the
//! blocking pool. When it returns, its report is delivered back through the
//! same mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::LabConfig;
use crate::error::{Result, SimlabError};
use crate::experiment::catalog::{Catalog, ScenarioSpec};
use crate::experiment::reporter::RunReporter;
use crate::experiment::run::{ExperimentRun, ExperimentSpec, RunId, RunSnapshot, RunStatus};
use crate::scheduler::{JobQueue, ResourcePool, Strategy, StrategyKind, StrategyRegistry};
use crate::sim::{DispatchOutcome, DispatchProgress, DispatchReport, EventDispatcher};

const MAX_DIR_ATTEMPTS: u32 = 1000;

/// Terminal signal from a simulation backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSignal {
    /// All jobs were worked off.
    Completed {
        completed_jobs: usize,
        failed_jobs: usize,
    },
    /// The backend itself failed.
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Phase {
    status: RunStatus,
    /// True once nothing more will be attached to the run.
    settled: bool,
}

struct RunSlot {
    run: ExperimentRun,
    cancel: Option<CancellationToken>,
    progress: Option<watch::Receiver<DispatchProgress>>,
    report: Option<DispatchReport>,
    phase: watch::Sender<Phase>,
}

impl RunSlot {
    fn set_phase(&self, settled: bool) {
        self.phase.send_replace(Phase {
            status: self.run.status,
            settled,
        });
    }

    /// Halt the backend and wait until it has released every unit.
    async fn halt_backend(&mut self) -> Option<DispatchProgress> {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        let mut rx = self.progress.clone()?;
        // An error means the dispatcher thread is gone, which also releases
        // everything it held.
        let halted = rx.wait_for(|p| p.halted).await.map(|p| p.clone()).ok();
        halted.or_else(|| Some(rx.borrow().clone()))
    }
}

/// Everything `start` builds before it commits to `Running`.
struct Prepared {
    dispatcher: EventDispatcher,
    strategy: StrategyKind,
    total_jobs: usize,
    work_dir: Option<PathBuf>,
}

#[derive(Clone)]
pub struct LifecycleManager {
    config: LabConfig,
    catalog: Arc<dyn Catalog>,
    reporter: Arc<dyn RunReporter>,
    strategies: Arc<RwLock<StrategyRegistry>>,
    runs: Arc<RwLock<HashMap<RunId, Arc<Mutex<RunSlot>>>>>,
    next_id: Arc<AtomicU64>,
}

impl LifecycleManager {
    pub fn new(config: LabConfig, catalog: Arc<dyn Catalog>, reporter: Arc<dyn RunReporter>) -> Self {
        Self {
            config,
            catalog,
            reporter,
            strategies: Arc::new(RwLock::new(StrategyRegistry::new())),
            runs: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    /// Make a custom strategy available under `name`. The catalog must map
    /// some strategy id to `StrategyKind::Custom(name)` for runs to use it.
    pub async fn register_strategy<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::info!(strategy = %name, "Custom strategy registered");
        self.strategies.write().await.register(name, factory);
    }

    /// Record a new run in `Pending`.
    pub async fn create_run(&self, spec: ExperimentSpec) -> RunId {
        let run_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let run = ExperimentRun::new(run_id, spec);
        let (phase, _) = watch::channel(Phase {
            status: run.status,
            settled: false,
        });
        self.reporter.persist_status(&run.snapshot());
        tracing::info!(run_id, name = %run.spec.name, "Run created");

        let slot = RunSlot {
            run,
            cancel: None,
            progress: None,
            report: None,
            phase,
        };
        self.runs
            .write()
            .await
            .insert(run_id, Arc::new(Mutex::new(slot)));
        run_id
    }

    async fn slot(&self, run_id: RunId) -> Result<Arc<Mutex<RunSlot>>> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or_else(|| SimlabError::NotFound(format!("run {run_id}")))
    }

    /// Provision the run and hand it to the dispatcher.
    ///
    /// Only legal from `Pending`. An unknown scenario or strategy id leaves
    /// the run `Pending`; a scenario that resolves but is unusable moves it
    /// to `Failed`. Nothing is left allocated either way.
    pub async fn start(&self, run_id: RunId) -> Result<RunSnapshot> {
        let slot = self.slot(run_id).await?;
        let mut guard = slot.lock().await;
        guard.run.ensure(RunStatus::Pending, "start")?;

        let scenario = self.catalog.scenario(guard.run.spec.scenario_id)?;
        let strategy = match &guard.run.spec.strategy_id {
            Some(id) => Some(self.catalog.strategy(id)?),
            None => None,
        };

        let prepared = match self.prepare(&guard.run, scenario, strategy).await {
            Ok(prepared) => prepared,
            Err(e @ SimlabError::UnknownStrategy(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(run_id, error = %e, "Run failed to start");
                guard.run.fail(&e);
                guard.set_phase(true);
                self.reporter.persist_status(&guard.run.snapshot());
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(DispatchProgress::default());
        let mut dispatcher = prepared
            .dispatcher
            .with_pacing(self.config.event_pacing())
            .with_progress(progress_tx);

        guard.run.status = RunStatus::Running;
        guard.run.start_time = Some(Utc::now());
        guard.run.total_jobs = prepared.total_jobs;
        guard.run.set_progress(0, 0);
        guard.run.strategy = Some(prepared.strategy.clone());
        guard.run.work_dir = prepared.work_dir;
        guard.cancel = Some(cancel.clone());
        guard.progress = Some(progress_rx);
        guard.set_phase(false);
        let snapshot = guard.run.snapshot();
        self.reporter.persist_status(&snapshot);
        tracing::info!(
            run_id,
            strategy = %prepared.strategy,
            total_jobs = prepared.total_jobs,
            "Run started"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            let joined =
                tokio::task::spawn_blocking(move || dispatcher.run_until_cancelled(&cancel)).await;
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(SimlabError::Internal(format!("dispatcher task failed: {e}"))),
            };
            manager.deliver(run_id, result).await;
        });

        Ok(snapshot)
    }

    async fn prepare(
        &self,
        run: &ExperimentRun,
        scenario: ScenarioSpec,
        strategy: Option<StrategyKind>,
    ) -> Result<Prepared> {
        let topology = scenario.topology.ok_or_else(|| {
            SimlabError::InvalidConfiguration("scenario has no topology".to_string())
        })?;
        if topology.resources == 0 {
            return Err(SimlabError::InvalidConfiguration(
                "topology has no resources".to_string(),
            ));
        }
        let workload = scenario.workload.ok_or_else(|| {
            SimlabError::InvalidConfiguration("scenario has no workload".to_string())
        })?;
        let strategy = strategy.ok_or_else(|| {
            SimlabError::InvalidConfiguration("run has no strategy".to_string())
        })?;
        let instance = self.strategies.read().await.build(&strategy)?;

        let priority = run.spec.priority.unwrap_or(self.config.default_priority);
        let pool = ResourcePool::new(topology.resources);
        let queue =
            JobQueue::with_capacity(priority, topology.resources, self.config.max_queued_jobs);
        let dispatcher = EventDispatcher::from_workload(pool, queue, instance, &workload)?;

        // Last step, so a failure above leaves nothing on disk.
        let work_dir = match &self.config.work_root {
            Some(root) => Some(create_work_dir(root, run.id).await?),
            None => None,
        };

        Ok(Prepared {
            dispatcher,
            strategy,
            total_jobs: workload.len(),
            work_dir,
        })
    }

    /// Hard-stop a running run. Waits until the dispatcher has released
    /// every held unit before reporting `Cancelled`.
    pub async fn stop(&self, run_id: RunId) -> Result<RunSnapshot> {
        let slot = self.slot(run_id).await?;
        let mut guard = slot.lock().await;
        guard.run.ensure(RunStatus::Running, "stop")?;

        let progress = guard.halt_backend().await;
        if let Some(p) = &progress {
            if p.held_units != 0 {
                let err = SimlabError::Inconsistent(format!(
                    "{} units still held after halt",
                    p.held_units
                ));
                guard.run.fail(&err);
                guard.set_phase(false);
                self.reporter.persist_status(&guard.run.snapshot());
                return Err(err);
            }
            guard
                .run
                .set_progress(p.completed_jobs, p.killed_jobs + p.rejected_jobs);
        }
        guard.run.finish(RunStatus::Cancelled, None);
        let settled = guard.report.is_some();
        guard.set_phase(settled);
        let snapshot = guard.run.snapshot();
        self.reporter.persist_status(&snapshot);
        tracing::info!(run_id, "Run cancelled");
        Ok(snapshot)
    }

    /// Terminal signal from an external simulation backend.
    ///
    /// Only legal from `Running`. The in-process dispatcher, if still
    /// running, is halted first.
    pub async fn complete(&self, run_id: RunId, signal: BackendSignal) -> Result<RunSnapshot> {
        let slot = self.slot(run_id).await?;
        let mut guard = slot.lock().await;
        guard.run.ensure(RunStatus::Running, "complete")?;
        let progress = guard.halt_backend().await;

        match signal {
            BackendSignal::Completed {
                completed_jobs,
                failed_jobs,
            } => {
                guard.run.set_progress(completed_jobs, failed_jobs);
                guard.run.finish(RunStatus::Completed, None);
            }
            BackendSignal::Failed { reason } => {
                tracing::error!(run_id, reason = %reason, "Backend reported failure");
                if let Some(p) = &progress {
                    guard
                        .run
                        .set_progress(p.completed_jobs, p.killed_jobs + p.rejected_jobs);
                }
                guard.run.finish(RunStatus::Failed, Some(reason));
            }
        }
        let settled = guard.report.is_some();
        guard.set_phase(settled);
        let snapshot = guard.run.snapshot();
        self.reporter.persist_status(&snapshot);
        tracing::info!(run_id, status = %snapshot.status, "Run finished by backend signal");
        Ok(snapshot)
    }

    /// Result of the in-process dispatcher. Moves a still-running run to its
    /// terminal status; for a run that already left `Running` only the
    /// report is attached.
    async fn deliver(&self, run_id: RunId, result: Result<DispatchReport>) {
        let Ok(slot) = self.slot(run_id).await else {
            tracing::warn!(run_id, "Dispatcher finished for unknown run");
            return;
        };
        let mut guard = slot.lock().await;
        let was_running = guard.run.status == RunStatus::Running;

        match result {
            Ok(report) => {
                if was_running {
                    let metrics = &report.metrics;
                    guard
                        .run
                        .set_progress(metrics.completed_jobs, metrics.failed_jobs());
                    let status = match report.outcome {
                        DispatchOutcome::Exhausted => RunStatus::Completed,
                        DispatchOutcome::Halted => RunStatus::Cancelled,
                    };
                    guard.run.finish(status, None);
                }
                self.reporter.emit_metrics(run_id, &report.metrics);
                if let Some(dir) = guard.run.work_dir.clone() {
                    if self.config.write_artifacts {
                        if let Err(e) = write_artifacts(&dir, &report).await {
                            tracing::warn!(run_id, error = %e, "Failed to write run artifacts");
                        }
                    }
                }
                guard.report = Some(report);
            }
            Err(e) => {
                if was_running {
                    tracing::error!(run_id, error = %e, code = e.code(), "Run aborted");
                    guard.run.fail(&e);
                } else {
                    tracing::debug!(run_id, error = %e, "Dispatcher error after run left Running");
                }
            }
        }

        guard.set_phase(true);
        if was_running {
            self.reporter.persist_status(&guard.run.snapshot());
            tracing::info!(run_id, status = %guard.run.status, "Run finished");
        }
    }

    /// Current status. Read-only, legal in every state.
    pub async fn status(&self, run_id: RunId) -> Result<RunSnapshot> {
        let slot = self.slot(run_id).await?;
        let guard = slot.lock().await;
        let mut snapshot = guard.run.snapshot();
        if guard.run.status == RunStatus::Running {
            if let Some(rx) = &guard.progress {
                let p = rx.borrow();
                snapshot.completed_jobs = p.completed_jobs;
                snapshot.failed_jobs = p.killed_jobs + p.rejected_jobs;
                snapshot.progress_percentage = p.percentage();
            }
        }
        Ok(snapshot)
    }

    /// Wait until the run is terminal and its dispatcher report, if any,
    /// has been attached.
    pub async fn wait(&self, run_id: RunId) -> Result<RunSnapshot> {
        let mut rx = {
            let slot = self.slot(run_id).await?;
            let guard = slot.lock().await;
            guard.phase.subscribe()
        };
        rx.wait_for(|phase| phase.status.is_terminal() && phase.settled)
            .await
            .map_err(|_| SimlabError::Internal(format!("run {run_id} state channel closed")))?;
        self.status(run_id).await
    }

    /// Dispatcher report, once the run has one.
    pub async fn report(&self, run_id: RunId) -> Result<Option<DispatchReport>> {
        let slot = self.slot(run_id).await?;
        let guard = slot.lock().await;
        Ok(guard.report.clone())
    }

    /// Ids of runs still in `Running`.
    pub async fn running_runs(&self) -> Vec<RunId> {
        let slots: Vec<(RunId, Arc<Mutex<RunSlot>>)> = self
            .runs
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();
        let mut running = Vec::new();
        for (id, slot) in slots {
            if slot.lock().await.run.status == RunStatus::Running {
                running.push(id);
            }
        }
        running.sort_unstable();
        running
    }

    pub async fn list(&self) -> Vec<RunSnapshot> {
        let slots: Vec<Arc<Mutex<RunSlot>>> = self.runs.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(slots.len());
        for slot in slots {
            snapshots.push(slot.lock().await.run.snapshot());
        }
        snapshots.sort_by_key(|s| s.run_id);
        snapshots
    }
}

/// Create a fresh `run-<id>` directory under `root`. Run ids restart with
/// every process, so an existing directory of that name belongs to someone
/// else: it is left alone and a numbered sibling is used instead.
async fn create_work_dir(root: &Path, run_id: RunId) -> Result<PathBuf> {
    tokio::fs::create_dir_all(root).await?;
    let base = format!("run-{run_id}");
    let mut dir = root.join(&base);
    let mut attempt = 0u32;
    loop {
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => return Ok(dir),
            Err(e)
                if e.kind() == std::io::ErrorKind::AlreadyExists
                    && attempt < MAX_DIR_ATTEMPTS =>
            {
                attempt += 1;
                tracing::debug!(run_id, dir = %dir.display(), "Work dir already exists");
                dir = root.join(format!("{base}.{attempt}"));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn write_artifacts(dir: &Path, report: &DispatchReport) -> Result<()> {
    tokio::fs::write(dir.join("trace.jsonl"), report.trace.to_json_lines()?).await?;
    tokio::fs::write(
        dir.join("metrics.json"),
        serde_json::to_string_pretty(&report.metrics)?,
    )
    .await?;
    Ok(())
}
