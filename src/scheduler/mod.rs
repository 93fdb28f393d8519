pub mod job;
pub mod pool;
pub mod queue;
pub mod strategy;

pub use job::{Job, JobId, JobStatus, SimTime, UnitId};
pub use pool::ResourcePool;
pub use queue::{JobQueue, PriorityPolicy};
pub use strategy::{
    Backfill, ConservativeBackfill, Fcfs, SchedContext, Strategy, StrategyKind, StrategyRegistry,
};
