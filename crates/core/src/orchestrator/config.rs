//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the job runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Run jobs in this process.
    /// When disabled, started jobs wait for a worker process to claim them.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum jobs executing at once in this process.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,

    /// Wall-clock ceiling per job, checked between records (seconds).
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// How often to look for RUNNING jobs nobody has claimed (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Prefix of the execution handles this process writes.
    /// Must be unique among processes sharing a database.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    3
}

fn default_job_timeout() -> u64 {
    7200 // 2 hours
}

fn default_poll_interval() -> u64 {
    2000 // 2 seconds
}

fn default_worker_id() -> String {
    "local".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_concurrent_jobs: default_max_concurrent(),
            job_timeout_secs: default_job_timeout(),
            poll_interval_ms: default_poll_interval(),
            worker_id: default_worker_id(),
        }
    }
}
