use std::path::{Path, PathBuf};
use std::sync::Arc;

use docfetch_core::{
    config::DocumentServiceConfig, Config, DocumentService, JobRunner, JobService, ProgressBus,
    SanitizedConfig, SpreadsheetSource,
};

/// Shared application state
pub struct AppState {
    config: Config,
    jobs: JobService,
    bus: Arc<ProgressBus>,
    sheets: Arc<dyn SpreadsheetSource>,
    documents: Option<Arc<dyn DocumentService>>,
    runner: Option<Arc<JobRunner>>,
}

impl AppState {
    pub fn new(
        config: Config,
        jobs: JobService,
        bus: Arc<ProgressBus>,
        sheets: Arc<dyn SpreadsheetSource>,
        documents: Option<Arc<dyn DocumentService>>,
        runner: Option<Arc<JobRunner>>,
    ) -> Self {
        Self {
            config,
            jobs,
            bus,
            sheets,
            documents,
            runner,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn jobs(&self) -> &JobService {
        &self.jobs
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    pub fn sheets(&self) -> Arc<dyn SpreadsheetSource> {
        Arc::clone(&self.sheets)
    }

    /// Document service client, if one is configured.
    pub fn documents(&self) -> Option<Arc<dyn DocumentService>> {
        self.documents.clone()
    }

    pub fn document_service_config(&self) -> Option<&DocumentServiceConfig> {
        self.config.document_service.as_ref()
    }

    /// Local job runner, if this process executes jobs.
    pub fn runner(&self) -> Option<&Arc<JobRunner>> {
        self.runner.as_ref()
    }

    pub fn upload_dir(&self) -> &Path {
        &self.config.storage.upload_dir
    }

    /// Output root for jobs created without an explicit directory.
    pub fn default_output_dir(&self) -> PathBuf {
        self.config.storage.output_dir.clone()
    }
}
