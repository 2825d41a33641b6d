pub mod config;
pub mod convert;
pub mod docservice;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod spreadsheet;
pub mod testing;

pub use config::{
    config_path, load_config, load_config_from_str, validate_config, Config, ConfigError, LogFormat,
    SanitizedConfig,
};
pub use convert::{CommandConverter, ConvertError, ConverterConfig, DocumentConverter};
pub use docservice::{
    Cabinet, CabinetField, DocServiceError, DocumentDetails, DocumentService, DocumentSummary,
    HttpDocumentService, IndexValue, SearchCriterion, SearchDialog,
};
pub use job::{
    CreateJobRequest, Job, JobConfig, JobFilter, JobStatus, JobStore, JobStoreError, LogEntry,
    LogFilter, LogLevel, Record, RecordFilter, RecordStatus, SqliteJobStore,
};
pub use orchestrator::{
    JobOrchestrator, JobRunner, JobService, JobServiceError, OrchestratorConfig,
    OrchestratorError, RunnerStatus,
};
pub use pipeline::{PipelineError, RecordPipeline, StageOutcome};
pub use progress::{
    ClientMessage, OutboxPublisher, OutboxRelay, ProgressBus, ProgressConfig, ProgressError,
    ProgressEvent, ProgressPublisher, ProgressTransport, Subscription,
};
pub use spreadsheet::{
    is_spreadsheet, validate_sheet, DelimitedSheetReader, ExcelSheetReader, ParsedSheet,
    SheetReader, SheetValidation, SpreadsheetError, SpreadsheetSource,
};
