//! Discrete-event simulation of one scheduling run.
//!
//! - [`event`]: event model and delivery order
//! - [`dispatcher`]: the event loop driving a [`Strategy`](crate::scheduler::Strategy)
//! - [`trace`]: per-job scheduling trace
//! - [`metrics`]: aggregate metrics computed from finished jobs

pub mod dispatcher;
pub mod event;
pub mod metrics;
pub mod trace;

pub use dispatcher::{DispatchOutcome, DispatchProgress, DispatchReport, EventDispatcher};
pub use event::{EventKind, EventPayload, SimEvent};
pub use metrics::RunMetrics;
pub use trace::{ScheduleTrace, TraceEntry, TraceEvent};
