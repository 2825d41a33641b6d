//! Job management surface used by the HTTP layer.

use std::sync::Arc;

use tracing::{info, warn};

use crate::job::{
    CreateJobRequest, Job, JobFilter, JobStatus, JobStore, JobStoreError, LogEntry, LogFilter,
    Record, RecordFilter,
};
use crate::progress::{ProgressEvent, ProgressPublisher};

use super::runner::JobRunner;
use super::types::JobServiceError;

/// Create, start, pause, cancel and inspect jobs.
///
/// Status changes go through the store's external-edge check; entering
/// RUNNING hands the job to the local runner when there is one, otherwise a
/// worker process picks it up by polling.
pub struct JobService {
    store: Arc<dyn JobStore>,
    publisher: Arc<dyn ProgressPublisher>,
    runner: Option<Arc<JobRunner>>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        publisher: Arc<dyn ProgressPublisher>,
        runner: Option<Arc<JobRunner>>,
    ) -> Self {
        Self {
            store,
            publisher,
            runner,
        }
    }

    fn announce(&self, job: &Job) {
        if let Err(e) = self
            .publisher
            .publish(&job.id, ProgressEvent::status_update(job))
        {
            warn!(job_id = %job.id, error = %e, "Failed to publish status update");
        }
    }

    /// Validate the configuration and persist a new PENDING job, starting it
    /// right away when `auto_start` is set.
    pub fn create(&self, mut request: CreateJobRequest) -> Result<Job, JobServiceError> {
        request.config = request.config.validated()?;
        let auto_start = request.config.auto_start;

        let job = self.store.create_job(request)?;
        info!(job_id = %job.id, created_by = %job.created_by, "Job created");

        if auto_start {
            return self.start(&job.id);
        }
        Ok(job)
    }

    /// PENDING → RUNNING.
    pub fn start(&self, job_id: &str) -> Result<Job, JobServiceError> {
        self.update_status(job_id, JobStatus::Running)
    }

    /// Apply an externally requested status edge.
    pub fn update_status(&self, job_id: &str, to: JobStatus) -> Result<Job, JobServiceError> {
        let job = self.store.request_status(job_id, to)?;
        info!(job_id = %job_id, status = %job.status, "Job status changed");

        if job.status == JobStatus::Running {
            match &self.runner {
                Some(runner) => runner.enqueue(job_id),
                None => info!(job_id = %job_id, "No local runner, job left for a worker"),
            }
        }

        self.announce(&job);
        Ok(job)
    }

    pub fn delete(&self, job_id: &str) -> Result<Job, JobServiceError> {
        let job = self.store.delete_job(job_id)?;
        info!(job_id = %job_id, "Job deleted");
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Result<Job, JobServiceError> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()).into())
    }

    /// A page of jobs plus the total matching the filter.
    pub fn list(&self, filter: &JobFilter) -> Result<(Vec<Job>, i64), JobServiceError> {
        let jobs = self.store.list_jobs(filter)?;
        let total = self.store.count_jobs(filter)?;
        Ok((jobs, total))
    }

    pub fn list_records(
        &self,
        job_id: &str,
        filter: &RecordFilter,
    ) -> Result<(Vec<Record>, i64), JobServiceError> {
        self.get(job_id)?;
        let records = self.store.list_records(job_id, filter)?;
        let total = self.store.count_records(job_id, filter)?;
        Ok((records, total))
    }

    pub fn list_logs(
        &self,
        job_id: &str,
        filter: &LogFilter,
    ) -> Result<(Vec<LogEntry>, i64), JobServiceError> {
        self.get(job_id)?;
        let logs = self.store.list_logs(job_id, filter)?;
        let total = self.store.count_logs(job_id, filter)?;
        Ok((logs, total))
    }

    pub fn runner(&self) -> Option<&Arc<JobRunner>> {
        self.runner.as_ref()
    }
}
