pub mod config;
pub mod error;
pub mod experiment;
pub mod scheduler;
pub mod shutdown;
pub mod sim;
pub mod workload;
