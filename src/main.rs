use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use simlab::config::LabConfig;
use simlab::error::{Result, SimlabError};
use simlab::experiment::{
    ExperimentSpec, LifecycleManager, LogReporter, MemoryCatalog, RunId, RunSnapshot, ScenarioSpec,
};
use simlab::scheduler::{PriorityPolicy, StrategyKind};
use simlab::shutdown::install_interrupt_handler;
use simlab::sim::{DispatchReport, RunMetrics};
use simlab::workload::{Topology, Workload};

const SCENARIO_ID: u64 = 1;

#[derive(Parser, Debug)]
#[command(name = "simlab")]
#[command(version)]
#[command(about = "Discrete-event scheduling simulator for batch workloads")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Simulate one workload under one strategy
    Run(RunArgs),

    /// Simulate one workload under every built-in strategy
    Compare(CompareArgs),

    /// Check a workload file without running it
    Validate(ValidateArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(clap::Args, Debug)]
struct WorkloadArgs {
    /// Path to a Batsim JSON workload
    #[arg(long, short = 'w')]
    workload: PathBuf,

    /// Resource units in the cluster (defaults to the workload's nb_res)
    #[arg(long, short = 'r')]
    resources: Option<u32>,

    /// Queue order: fifo, size or duration
    #[arg(long, default_value = "fifo")]
    priority: PriorityPolicy,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    workload: WorkloadArgs,

    /// Scheduling strategy: fcfs, backfill or conservative-backfill
    #[arg(long, short = 's', default_value = "fcfs")]
    strategy: String,

    /// Directory for run artifacts (trace.jsonl, metrics.json)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Wall-clock delay between events, in milliseconds
    #[arg(long, default_value = "0")]
    pace_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(clap::Args, Debug)]
struct CompareArgs {
    #[command(flatten)]
    workload: WorkloadArgs,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(clap::Args, Debug)]
struct ValidateArgs {
    /// Path to a Batsim JSON workload
    #[arg(long, short = 'w')]
    workload: PathBuf,

    /// Resource units to check job sizes against
    #[arg(long, short = 'r')]
    resources: Option<u32>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RunOutput {
    run: RunSnapshot,
    metrics: Option<RunMetrics>,
}

#[derive(Serialize)]
struct CompareRow {
    strategy: String,
    status: String,
    metrics: Option<RunMetrics>,
}

#[derive(Serialize)]
struct ValidateOutput {
    jobs: usize,
    kills: usize,
    resources: Option<u32>,
    oversized_jobs: Vec<u64>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn load_scenario(args: &WorkloadArgs) -> Result<(Topology, Workload)> {
    let workload = Workload::from_path(&args.workload)?;
    let topology = args
        .resources
        .map(Topology::new)
        .or_else(|| workload.topology())
        .ok_or_else(|| {
            SimlabError::InvalidConfiguration(
                "workload has no nb_res, pass --resources".to_string(),
            )
        })?;
    Ok((topology, workload))
}

fn manager_for(config: LabConfig, topology: Topology, workload: Workload) -> LifecycleManager {
    let catalog =
        MemoryCatalog::new().with_scenario(SCENARIO_ID, ScenarioSpec::new(topology, workload));
    LifecycleManager::new(config, Arc::new(catalog), Arc::new(LogReporter))
}

/// Wait for `run_ids` to finish, stopping all of them on Ctrl-C.
async fn wait_all(manager: &LifecycleManager, run_ids: &[RunId]) -> Result<Vec<RunSnapshot>> {
    let interrupt = install_interrupt_handler()?;
    let watcher = {
        let manager = manager.clone();
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            interrupt.cancelled().await;
            for run_id in manager.running_runs().await {
                // The run may finish on its own between listing and stopping.
                if let Err(e) = manager.stop(run_id).await {
                    tracing::debug!(run_id, error = %e, "Stop skipped");
                }
            }
        })
    };

    let mut snapshots = Vec::with_capacity(run_ids.len());
    for &run_id in run_ids {
        snapshots.push(manager.wait(run_id).await?);
    }
    watcher.abort();
    Ok(snapshots)
}

fn print_metrics(metrics: &RunMetrics) {
    println!("  Jobs:            {}", metrics.total_jobs);
    println!("  Completed:       {}", metrics.completed_jobs);
    println!("  Killed:          {}", metrics.killed_jobs);
    println!("  Rejected:        {}", metrics.rejected_jobs);
    println!("  Simulated time:  {:.2}", metrics.simulation_time);
    println!("  Makespan:        {:.2}", metrics.makespan);
    println!("  Avg waiting:     {:.2}", metrics.average_waiting_time);
    println!("  Avg turnaround:  {:.2}", metrics.average_turnaround_time);
    println!("  Utilization:     {:.1}%", metrics.resource_utilization * 100.0);
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_run(args: RunArgs) -> Result<ExitCode> {
    let (topology, workload) = load_scenario(&args.workload)?;
    let mut config = LabConfig::new()
        .with_priority(args.workload.priority)
        .with_event_pacing_ms(args.pace_ms);
    if let Some(dir) = args.work_dir {
        config = config.with_work_root(dir);
    }

    let manager = manager_for(config, topology, workload);
    let name = args
        .workload
        .workload
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workload".to_string());
    let run_id = manager
        .create_run(ExperimentSpec::new(name, SCENARIO_ID, args.strategy))
        .await;
    manager.start(run_id).await?;

    let snapshot = wait_all(&manager, &[run_id])
        .await?
        .pop()
        .ok_or_else(|| SimlabError::Internal("run vanished".to_string()))?;
    let report: Option<DispatchReport> = manager.report(run_id).await?;
    let metrics = report.map(|r| r.metrics);
    let exit_code = snapshot.exit_code();
    if let Some(err) = &snapshot.error {
        tracing::error!(
            run_id = snapshot.run_id,
            error_code = snapshot.error_code.as_deref().unwrap_or("INTERNAL"),
            error = %err,
            "Run failed"
        );
    }

    match args.output {
        OutputFormat::Json => {
            let output = RunOutput {
                run: snapshot,
                metrics,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!(
                "Run {} ({}) {}",
                snapshot.run_id,
                snapshot.strategy.as_deref().unwrap_or("-"),
                snapshot.status
            );
            if let Some(dir) = &snapshot.work_dir {
                println!("  Work dir:        {}", dir.display());
            }
            if let Some(err) = &snapshot.error {
                println!("  Error:           {err}");
            }
            if let Some(metrics) = &metrics {
                print_metrics(metrics);
            }
        }
    }

    Ok(match exit_code {
        Some(code) => ExitCode::from(code as u8),
        None => ExitCode::SUCCESS,
    })
}

async fn handle_compare(args: CompareArgs) -> Result<()> {
    let (topology, workload) = load_scenario(&args.workload)?;
    let config = LabConfig::new().with_priority(args.workload.priority);
    let manager = manager_for(config, topology, workload);

    let mut runs = Vec::new();
    for kind in StrategyKind::BUILTIN {
        let run_id = manager
            .create_run(ExperimentSpec::new(
                format!("compare-{kind}"),
                SCENARIO_ID,
                kind.to_string(),
            ))
            .await;
        manager.start(run_id).await?;
        runs.push((kind, run_id));
    }

    let ids: Vec<RunId> = runs.iter().map(|(_, id)| *id).collect();
    let snapshots = wait_all(&manager, &ids).await?;

    let mut rows = Vec::with_capacity(runs.len());
    for ((kind, run_id), snapshot) in runs.into_iter().zip(snapshots) {
        let metrics = manager.report(run_id).await?.map(|r| r.metrics);
        rows.push(CompareRow {
            strategy: kind.to_string(),
            status: snapshot.status.to_string(),
            metrics,
        });
    }

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Table => {
            println!(
                "{:<24} {:<10} {:>10} {:>12} {:>12} {:>8}",
                "STRATEGY", "STATUS", "MAKESPAN", "AVG WAIT", "AVG TURN", "UTIL"
            );
            for row in &rows {
                match &row.metrics {
                    Some(m) => println!(
                        "{:<24} {:<10} {:>10.2} {:>12.2} {:>12.2} {:>7.1}%",
                        row.strategy,
                        row.status,
                        m.makespan,
                        m.average_waiting_time,
                        m.average_turnaround_time,
                        m.resource_utilization * 100.0
                    ),
                    None => println!("{:<24} {:<10}", row.strategy, row.status),
                }
            }
        }
    }
    Ok(())
}

fn handle_validate(args: ValidateArgs) -> Result<()> {
    let workload = Workload::from_path(&args.workload)?;
    workload.validate()?;

    let resources = args.resources.or(workload.nb_res);
    let oversized_jobs: Vec<u64> = match resources {
        Some(capacity) => workload
            .jobs
            .iter()
            .filter(|j| j.requested_resources > capacity)
            .map(|j| j.id)
            .collect(),
        None => Vec::new(),
    };
    for job_id in &oversized_jobs {
        tracing::warn!(job_id, "Job can never fit and will be rejected");
    }

    let output = ValidateOutput {
        jobs: workload.len(),
        kills: workload.kills.len(),
        resources,
        oversized_jobs,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let result = match args.command {
        Commands::Run(run_args) => handle_run(run_args).await,
        Commands::Compare(compare_args) => {
            handle_compare(compare_args).await.map(|()| ExitCode::SUCCESS)
        }
        Commands::Validate(validate_args) => {
            handle_validate(validate_args).map(|()| ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error [{}]: {e}", e.code());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
