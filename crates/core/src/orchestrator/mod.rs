//! Job orchestration.
//!
//! - **Executor**: runs one job's rows sequentially through the record pipeline
//! - **Runner**: bounded pool of executions, fed by an in-process queue and a
//!   poll for unclaimed RUNNING jobs
//! - **Service**: create/start/pause/cancel/delete and listing for the API

mod config;
mod executor;
mod runner;
mod service;
mod types;

pub use config::OrchestratorConfig;
pub use executor::JobOrchestrator;
pub use runner::JobRunner;
pub use service::JobService;
pub use types::{JobServiceError, OrchestratorError, RunnerStatus};
