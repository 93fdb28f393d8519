//! Experiment runs and their lifecycle.

pub mod catalog;
pub mod manager;
pub mod reporter;
pub mod run;

pub use catalog::{Catalog, MemoryCatalog, ScenarioSpec};
pub use manager::{BackendSignal, LifecycleManager};
pub use reporter::{LogReporter, MemoryReporter, RunReporter};
pub use run::{ExperimentRun, ExperimentSpec, RunId, RunSnapshot, RunStatus};
