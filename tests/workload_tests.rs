use std::io::Write;

use simlab::error::SimlabError;
use simlab::scheduler::{JobQueue, PriorityPolicy, ResourcePool, StrategyKind, StrategyRegistry};
use simlab::sim::EventDispatcher;
use simlab::workload::{Topology, Workload};
use tempfile::NamedTempFile;

const BATSIM_DOC: &str = r#"{
    "nb_res": 4,
    "jobs": [
        {"id": "w0!1", "subtime": 0, "res": 2, "walltime": 100, "profile": "full"},
        {"id": "w0!4", "subtime": 1, "res": 3, "walltime": 100, "profile": "full"},
        {"id": "w0!5", "subtime": 2, "res": 2, "walltime": 100, "profile": "overrun"}
    ],
    "profiles": {
        "full": {"type": "delay", "delay": 100},
        "overrun": {"type": "delay", "delay": 250}
    }
}"#;

fn write_doc(doc: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(doc.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_workload_from_file() {
    let file = write_doc(BATSIM_DOC);
    let workload = Workload::from_path(file.path()).unwrap();

    assert_eq!(workload.len(), 3);
    assert_eq!(workload.topology(), Some(Topology::new(4)));
    let ids: Vec<u64> = workload.jobs.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![1, 4, 5]);
    assert_eq!(workload.jobs[2].run_time, 250.0);
    assert_eq!(workload.jobs[2].requested_time, 100.0);
}

#[test]
fn test_workload_runs_with_walltime_enforced() {
    let workload = Workload::from_json(BATSIM_DOC).unwrap();
    let capacity = workload.topology().unwrap().resources;
    let strategy = StrategyRegistry::new()
        .build(&StrategyKind::Backfill)
        .unwrap();
    let mut dispatcher = EventDispatcher::from_workload(
        ResourcePool::new(capacity),
        JobQueue::new(PriorityPolicy::Fifo, capacity),
        strategy,
        &workload,
    )
    .unwrap();
    let report = dispatcher.run().unwrap();

    // J5 is backfilled at t=2 and killed at its 100s walltime.
    assert_eq!(report.trace.start_time(5), Some(2.0));
    let j5 = report.jobs.iter().find(|j| j.id == 5).unwrap();
    assert_eq!(j5.end_time, Some(102.0));
    assert_eq!(report.metrics.killed_jobs, 1);
    assert_eq!(report.trace.completion_order(), vec![1, 4]);
}

#[test]
fn test_missing_file_is_io_error() {
    let err = Workload::from_path("/nonexistent/simlab/workload.json").unwrap_err();
    assert!(matches!(err, SimlabError::Io(_)));
    assert_eq!(err.code(), "IO");
}

#[test]
fn test_malformed_document_is_decode_error() {
    let file = write_doc(r#"{"nb_res": 4, "jobs": [{"id": 1}]}"#);
    let err = Workload::from_path(file.path()).unwrap_err();
    assert!(matches!(err, SimlabError::Workload(_)));
}

#[test]
fn test_kill_for_unknown_job_is_invalid() {
    let doc = r#"{
        "jobs": [{"id": 1, "subtime": 0, "res": 1, "walltime": 5}],
        "kills": [{"job_id": 2, "time": 1}]
    }"#;
    assert!(matches!(
        Workload::from_json(doc),
        Err(SimlabError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_negative_submission_time_is_invalid() {
    let doc = r#"{"jobs": [{"id": 1, "subtime": -3, "res": 1, "walltime": 5}]}"#;
    let err = Workload::from_json(doc).unwrap_err();
    assert!(matches!(err, SimlabError::InvalidConfiguration(_)));
    assert!(!err.is_fatal());
}
