//! Jobs, records and logs: entities, state machines and persistence.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{
    CreateJobRequest, JobFilter, JobStore, JobStoreError, LogFilter, NewLogEntry, RecordFilter,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use types::{
    DownloadedFile, Job, JobConfig, JobConfigError, JobStatus, LogEntry, LogLevel, Record,
    RecordOutcome, RecordStatus, RowData, SearchFieldMapping, TransformRules,
};
