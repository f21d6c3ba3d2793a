//! Off-thread batch execution

pub mod jobs;
pub mod pool;
pub mod protocol;

pub use jobs::run_job;
pub use pool::{Executor, WorkerPool};
pub use protocol::{BatchFeature, BatchResult, Operation, OperationOptions, WorkerRequest, WorkerResponse};
