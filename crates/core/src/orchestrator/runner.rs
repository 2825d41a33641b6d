//! Job runner: schedules executions on a bounded pool.
//!
//! Jobs reach the runner two ways:
//! - Enqueued in-process when a job enters RUNNING through this process
//! - Discovered by polling for RUNNING jobs that no worker has claimed

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::job::JobStore;
use crate::metrics::{JOBS_ACTIVE, JOBS_STARTED};

use super::config::OrchestratorConfig;
use super::executor::JobOrchestrator;
use super::types::RunnerStatus;

/// How long `stop` waits for in-flight executions to reach a record boundary.
const STOP_GRACE: Duration = Duration::from_secs(30);

/// The job runner - executes RUNNING jobs, at most `max_concurrent_jobs` at once.
pub struct JobRunner {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    orchestrator: Arc<JobOrchestrator>,
    semaphore: Arc<Semaphore>,

    // Runtime state
    running: Arc<AtomicBool>,
    active: Arc<RwLock<HashSet<String>>>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl JobRunner {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        orchestrator: Arc<JobOrchestrator>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));

        Self {
            config,
            store,
            orchestrator,
            semaphore,
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(RwLock::new(HashSet::new())),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            shutdown_tx,
        }
    }

    /// Ask for `job_id` to be executed. The job must already be RUNNING.
    pub fn enqueue(&self, job_id: &str) {
        if self.queue_tx.send(job_id.to_string()).is_err() {
            warn!(job_id = %job_id, "Runner queue closed, job left for the poller");
        }
    }

    /// Start the runner (spawns the dispatch loop).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Job runner already running");
            return;
        }

        let Some(queue_rx) = self.queue_rx.lock().await.take() else {
            error!("Job runner cannot be restarted after stop");
            self.running.store(false, Ordering::SeqCst);
            return;
        };

        info!(worker_id = %self.config.worker_id, "Starting job runner");
        self.orchestrator.clear_shutdown();

        // Claims written by a previous run of this worker are dead.
        match self.store.release_stale_claims(&self.claim_prefix()) {
            Ok(0) => {}
            Ok(n) => info!(released = n, "Released stale job claims"),
            Err(e) => warn!(error = %e, "Failed to release stale job claims"),
        }

        self.spawn_dispatch_loop(queue_rx);
        info!("Job runner started");
    }

    /// Stop the runner gracefully.
    ///
    /// Executions return at their next record boundary, leaving their jobs
    /// RUNNING and unclaimed for the next start.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Job runner not running");
            return;
        }

        info!("Stopping job runner");
        self.orchestrator.request_shutdown();
        let _ = self.shutdown_tx.send(());

        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        while !self.active.read().await.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!("Job runner stopped with executions still in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        info!("Job runner stopped");
    }

    /// Get current runner status.
    pub async fn status(&self) -> RunnerStatus {
        let mut active_jobs: Vec<String> = self.active.read().await.iter().cloned().collect();
        active_jobs.sort();

        RunnerStatus {
            running: self.running.load(Ordering::Relaxed),
            worker_id: self.config.worker_id.clone(),
            max_concurrent_jobs: self.config.max_concurrent_jobs,
            active_jobs,
        }
    }

    fn claim_prefix(&self) -> String {
        format!("{}:", self.config.worker_id)
    }

    /// Spawn the dispatch loop task.
    fn spawn_dispatch_loop(&self, mut queue_rx: mpsc::UnboundedReceiver<String>) {
        let running = Arc::clone(&self.running);
        let store = Arc::clone(&self.store);
        let orchestrator = Arc::clone(&self.orchestrator);
        let semaphore = Arc::clone(&self.semaphore);
        let active = Arc::clone(&self.active);
        let prefix = self.claim_prefix();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(10));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Dispatch loop started");
            let ctx = DispatchContext {
                store,
                orchestrator,
                semaphore,
                active,
                prefix,
            };

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Dispatch loop received shutdown signal");
                        break;
                    }
                    Some(job_id) = queue_rx.recv() => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        ctx.dispatch(job_id).await;
                    }
                    _ = tokio::time::sleep(poll_interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        ctx.poll_unclaimed().await;
                    }
                }
            }
            info!("Dispatch loop stopped");
        });
    }
}

/// Everything a dispatched execution needs, shared by the loop.
struct DispatchContext {
    store: Arc<dyn JobStore>,
    orchestrator: Arc<JobOrchestrator>,
    semaphore: Arc<Semaphore>,
    active: Arc<RwLock<HashSet<String>>>,
    prefix: String,
}

impl DispatchContext {
    /// Pick up RUNNING jobs nobody executes, up to the free slots.
    async fn poll_unclaimed(&self) {
        let free = self.semaphore.available_permits();
        if free == 0 {
            return;
        }

        match self.store.list_unclaimed_running(free as i64) {
            Ok(jobs) => {
                for job in jobs {
                    self.dispatch(job.id).await;
                }
            }
            Err(e) => warn!(error = %e, "Failed to list unclaimed jobs"),
        }
    }

    /// Spawn an execution for `job_id` unless one is already in flight here.
    async fn dispatch(&self, job_id: String) {
        if !self.active.write().await.insert(job_id.clone()) {
            debug!(job_id = %job_id, "Job already active, skipping");
            return;
        }

        let store = Arc::clone(&self.store);
        let orchestrator = Arc::clone(&self.orchestrator);
        let semaphore = Arc::clone(&self.semaphore);
        let active = Arc::clone(&self.active);
        let handle = format!("{}{}", self.prefix, uuid::Uuid::new_v4());

        tokio::spawn(async move {
            if let Ok(_permit) = semaphore.acquire_owned().await {
                Self::run_claimed(&store, &orchestrator, &job_id, &handle).await;
            }
            active.write().await.remove(&job_id);
        });
    }

    async fn run_claimed(
        store: &Arc<dyn JobStore>,
        orchestrator: &Arc<JobOrchestrator>,
        job_id: &str,
        handle: &str,
    ) {
        match store.claim_execution(job_id, handle) {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job_id, "Job claimed elsewhere or no longer running");
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to claim job");
                return;
            }
        }

        JOBS_STARTED.inc();
        JOBS_ACTIVE.inc();
        info!(job_id = %job_id, handle = %handle, "Job claimed");

        if let Err(e) = orchestrator.execute(job_id).await {
            error!(job_id = %job_id, error = %e, "Job execution error");
        }

        JOBS_ACTIVE.dec();
        if let Err(e) = store.release_execution(job_id) {
            warn!(job_id = %job_id, error = %e, "Failed to release job claim");
        }
    }
}
