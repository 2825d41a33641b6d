//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    CreateJobRequest, Job, JobFilter, JobStatus, JobStore, JobStoreError, LogEntry, LogFilter,
    LogLevel, NewLogEntry, Record, RecordFilter, RecordOutcome, RecordStatus, RowData,
};

const JOB_COLUMNS: &str = "id, created_by, status, spreadsheet_path, spreadsheet_name, sheet_name, \
     output_directory, config, total_records, processed_records, successful_records, \
     failed_records, files_downloaded, error_message, execution_handle, created_at, \
     started_at, completed_at";

const RECORD_COLUMNS: &str = "id, job_id, row_number, row_data, status, document_id, artifacts, \
     output_folder, error_message, error_stage, started_at, completed_at";

const LOG_COLUMNS: &str =
    "id, job_id, timestamp, level, message, record_id, row_number, details";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, JobStoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, JobStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                created_by TEXT NOT NULL,
                status TEXT NOT NULL,
                spreadsheet_path TEXT NOT NULL,
                spreadsheet_name TEXT NOT NULL,
                sheet_name TEXT,
                output_directory TEXT NOT NULL,
                config TEXT NOT NULL,
                total_records INTEGER NOT NULL DEFAULT 0,
                processed_records INTEGER NOT NULL DEFAULT 0,
                successful_records INTEGER NOT NULL DEFAULT 0,
                failed_records INTEGER NOT NULL DEFAULT 0,
                files_downloaded INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                execution_handle TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_by ON jobs(created_by);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                row_number INTEGER NOT NULL,
                row_data TEXT NOT NULL,
                status TEXT NOT NULL,
                document_id TEXT,
                artifacts TEXT NOT NULL DEFAULT '[]',
                output_folder TEXT,
                error_message TEXT,
                error_stage TEXT,
                started_at TEXT,
                completed_at TEXT,
                UNIQUE (job_id, row_number)
            );

            CREATE INDEX IF NOT EXISTS idx_records_job_status ON records(job_id, status);

            CREATE TABLE IF NOT EXISTS job_logs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                timestamp TEXT NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                record_id TEXT,
                row_number INTEGER,
                details TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_job_logs_job ON job_logs(job_id, seq);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, JobStoreError> {
        self.conn
            .lock()
            .map_err(|_| JobStoreError::Database("connection mutex poisoned".to_string()))
    }

    fn build_job_where(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref created_by) = filter.created_by {
            conditions.push("created_by = ?");
            params.push(Box::new(created_by.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
        value.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
    }

    fn text_err(idx: usize, message: String) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            message.into(),
        )
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let status_str: String = row.get(2)?;
        let status = status_str
            .parse::<JobStatus>()
            .map_err(|e| Self::text_err(2, e))?;
        let config_json: String = row.get(7)?;
        let config =
            serde_json::from_str(&config_json).map_err(|e| Self::text_err(7, e.to_string()))?;

        Ok(Job {
            id: row.get(0)?,
            created_by: row.get(1)?,
            status,
            spreadsheet_path: row.get(3)?,
            spreadsheet_name: row.get(4)?,
            sheet_name: row.get(5)?,
            output_directory: row.get(6)?,
            config,
            total_records: row.get(8)?,
            processed_records: row.get(9)?,
            successful_records: row.get(10)?,
            failed_records: row.get(11)?,
            files_downloaded: row.get(12)?,
            error_message: row.get(13)?,
            execution_handle: row.get(14)?,
            created_at: Self::parse_ts(row.get(15)?).unwrap_or_else(Utc::now),
            started_at: Self::parse_ts(row.get(16)?),
            completed_at: Self::parse_ts(row.get(17)?),
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Record> {
        let row_data_json: String = row.get(3)?;
        let row_data: RowData =
            serde_json::from_str(&row_data_json).map_err(|e| Self::text_err(3, e.to_string()))?;
        let status_str: String = row.get(4)?;
        let status = status_str
            .parse::<RecordStatus>()
            .map_err(|e| Self::text_err(4, e))?;
        let artifacts_json: String = row.get(6)?;
        let artifacts = serde_json::from_str(&artifacts_json)
            .map_err(|e| Self::text_err(6, e.to_string()))?;

        Ok(Record {
            id: row.get(0)?,
            job_id: row.get(1)?,
            row_number: row.get(2)?,
            row_data,
            status,
            document_id: row.get(5)?,
            artifacts,
            output_folder: row.get(7)?,
            error_message: row.get(8)?,
            error_stage: row.get(9)?,
            started_at: Self::parse_ts(row.get(10)?),
            completed_at: Self::parse_ts(row.get(11)?),
        })
    }

    fn row_to_log(row: &rusqlite::Row) -> rusqlite::Result<LogEntry> {
        let level_str: String = row.get(3)?;
        let level = level_str
            .parse::<LogLevel>()
            .map_err(|e| Self::text_err(3, e))?;

        Ok(LogEntry {
            id: row.get(0)?,
            job_id: row.get(1)?,
            timestamp: Self::parse_ts(row.get(2)?).unwrap_or_else(Utc::now),
            level,
            message: row.get(4)?,
            record_id: row.get(5)?,
            row_number: row.get(6)?,
            details: row.get(7)?,
        })
    }

    fn fetch_job(conn: &Connection, id: &str) -> Result<Option<Job>, JobStoreError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_job)
            .optional()?)
    }

    fn require_job(conn: &Connection, id: &str) -> Result<Job, JobStoreError> {
        Self::fetch_job(conn, id)?.ok_or_else(|| JobStoreError::NotFound(id.to_string()))
    }

    fn insert_log(
        conn: &Connection,
        job_id: &str,
        entry: NewLogEntry,
    ) -> Result<LogEntry, JobStoreError> {
        let log = LogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
            level: entry.level,
            message: entry.message,
            record_id: entry.record_id,
            row_number: entry.row_number,
            details: entry.details,
        };

        conn.execute(
            "INSERT INTO job_logs (id, job_id, timestamp, level, message, record_id, row_number, details) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                log.id,
                log.job_id,
                log.timestamp.to_rfc3339(),
                log.level.as_str(),
                log.message,
                log.record_id,
                log.row_number,
                log.details,
            ],
        )?;

        Ok(log)
    }

    /// Summary line appended when a job enters a terminal state.
    fn terminal_summary(job: &Job, error_message: Option<&str>) -> NewLogEntry {
        match job.status {
            JobStatus::Failed => NewLogEntry::error(format!(
                "Job failed: {}",
                error_message
                    .or(job.error_message.as_deref())
                    .unwrap_or("unknown error")
            )),
            JobStatus::Cancelled => NewLogEntry::warning(format!(
                "Job cancelled after {} of {} records",
                job.processed_records, job.total_records
            )),
            status => {
                let entry = NewLogEntry::info(format!(
                    "Job finished ({}): {} processed, {} successful, {} failed, {} not found, {} files downloaded",
                    status,
                    job.processed_records,
                    job.successful_records,
                    job.failed_records,
                    job.not_found_records(),
                    job.files_downloaded
                ));
                if status == JobStatus::CompletedWithErrors {
                    NewLogEntry {
                        level: LogLevel::Warning,
                        ..entry
                    }
                } else {
                    entry
                }
            }
        }
    }

    fn write_record(conn: &Connection, record: &Record) -> Result<(), JobStoreError> {
        let changed = conn.execute(
            "UPDATE records SET status = ?, document_id = ?, artifacts = ?, output_folder = ?, \
             error_message = ?, error_stage = ?, started_at = ?, completed_at = ? WHERE id = ?",
            params![
                record.status.as_str(),
                record.document_id,
                serde_json::to_string(&record.artifacts)?,
                record.output_folder,
                record.error_message,
                record.error_stage,
                record.started_at.map(|t| t.to_rfc3339()),
                record.completed_at.map(|t| t.to_rfc3339()),
                record.id,
            ],
        )?;
        if changed == 0 {
            return Err(JobStoreError::RecordNotFound(record.id.clone()));
        }
        Ok(())
    }

    /// Write a status edge already checked by the caller.
    fn apply_status(
        conn: &mut Connection,
        current: Job,
        to: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job, JobStoreError> {
        let now = Utc::now();
        let tx = conn.transaction()?;

        let started_at = if to == JobStatus::Running && current.started_at.is_none() {
            Some(now)
        } else {
            current.started_at
        };
        let completed_at = if to.is_terminal() {
            Some(now)
        } else {
            current.completed_at
        };
        let error = error_message
            .map(str::to_string)
            .or(current.error_message.clone());

        tx.execute(
            "UPDATE jobs SET status = ?, started_at = ?, completed_at = ?, error_message = ? WHERE id = ?",
            params![
                to.as_str(),
                started_at.map(|t| t.to_rfc3339()),
                completed_at.map(|t| t.to_rfc3339()),
                error,
                current.id,
            ],
        )?;

        let job = Job {
            status: to,
            started_at,
            completed_at,
            error_message: error,
            ..current
        };

        if to.is_terminal() {
            Self::insert_log(&tx, &job.id, Self::terminal_summary(&job, error_message))?;
        }

        tx.commit()?;
        Ok(job)
    }
}

impl JobStore for SqliteJobStore {
    fn create_job(&self, request: CreateJobRequest) -> Result<Job, JobStoreError> {
        let conn = self.conn()?;

        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            created_by: request.created_by,
            status: JobStatus::Pending,
            spreadsheet_path: request.spreadsheet_path,
            spreadsheet_name: request.spreadsheet_name,
            sheet_name: request.sheet_name,
            output_directory: request.output_directory,
            config: request.config,
            total_records: 0,
            processed_records: 0,
            successful_records: 0,
            failed_records: 0,
            files_downloaded: 0,
            error_message: None,
            execution_handle: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let config_json = serde_json::to_string(&job.config)?;

        conn.execute(
            "INSERT INTO jobs (id, created_by, status, spreadsheet_path, spreadsheet_name, sheet_name, output_directory, config, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                job.id,
                job.created_by,
                job.status.as_str(),
                job.spreadsheet_path,
                job.spreadsheet_name,
                job.sheet_name,
                job.output_directory,
                config_json,
                job.created_at.to_rfc3339(),
            ],
        )?;

        Ok(job)
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        let conn = self.conn()?;
        Self::fetch_job(&conn, id)
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_job_where(filter);
        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn count_jobs(&self, filter: &JobFilter) -> Result<i64, JobStoreError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_job_where(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }

    fn request_status(&self, id: &str, to: JobStatus) -> Result<Job, JobStoreError> {
        let mut conn = self.conn()?;
        let current = Self::require_job(&conn, id)?;

        if !current.status.can_request(to) {
            return Err(JobStoreError::InvalidTransition {
                job_id: id.to_string(),
                from: current.status,
                to,
            });
        }

        Self::apply_status(&mut conn, current, to, None)
    }

    fn set_status(
        &self,
        id: &str,
        to: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job, JobStoreError> {
        let mut conn = self.conn()?;
        let current = Self::require_job(&conn, id)?;

        if !current.status.can_enter_internally(to) {
            return Err(JobStoreError::InvalidTransition {
                job_id: id.to_string(),
                from: current.status,
                to,
            });
        }

        Self::apply_status(&mut conn, current, to, error_message)
    }

    fn set_total_records(&self, id: &str, total: u32) -> Result<(), JobStoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET total_records = ? WHERE id = ?",
            params![total, id],
        )?;
        if changed == 0 {
            return Err(JobStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn reconcile_counters(&self, id: &str) -> Result<Job, JobStoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET \
             processed_records = (SELECT COUNT(*) FROM records r WHERE r.job_id = jobs.id \
                 AND r.status IN ('completed', 'not_found', 'failed')), \
             successful_records = (SELECT COUNT(*) FROM records r WHERE r.job_id = jobs.id \
                 AND r.status = 'completed'), \
             failed_records = (SELECT COUNT(*) FROM records r WHERE r.job_id = jobs.id \
                 AND r.status = 'failed'), \
             files_downloaded = (SELECT COALESCE(SUM(json_array_length(r.artifacts)), 0) \
                 FROM records r WHERE r.job_id = jobs.id AND r.status = 'completed') \
             WHERE id = ?",
            params![id],
        )?;
        if changed == 0 {
            return Err(JobStoreError::NotFound(id.to_string()));
        }
        Self::require_job(&conn, id)
    }

    fn claim_execution(&self, id: &str, handle: &str) -> Result<bool, JobStoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET execution_handle = ? WHERE id = ? AND status = 'running' AND execution_handle IS NULL",
            params![handle, id],
        )?;
        Ok(changed == 1)
    }

    fn release_execution(&self, id: &str) -> Result<(), JobStoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE jobs SET execution_handle = NULL WHERE id = ?",
            params![id],
        )?;
        Ok(())
    }

    fn release_stale_claims(&self, prefix: &str) -> Result<usize, JobStoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET execution_handle = NULL WHERE substr(execution_handle, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        Ok(changed)
    }

    fn list_unclaimed_running(&self, limit: i64) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM jobs WHERE status = 'running' AND execution_handle IS NULL ORDER BY started_at ASC LIMIT ?",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![limit], Self::row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn delete_job(&self, id: &str) -> Result<Job, JobStoreError> {
        let conn = self.conn()?;
        let job = Self::require_job(&conn, id)?;

        if matches!(job.status, JobStatus::Running | JobStatus::Validating) {
            return Err(JobStoreError::Conflict {
                job_id: id.to_string(),
                status: job.status,
                operation: "delete".to_string(),
            });
        }

        conn.execute("DELETE FROM jobs WHERE id = ?", params![id])?;
        Ok(job)
    }

    fn create_record(
        &self,
        job_id: &str,
        row_number: u32,
        row_data: RowData,
    ) -> Result<Record, JobStoreError> {
        let conn = self.conn()?;
        Self::require_job(&conn, job_id)?;

        let record = Record {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            row_number,
            row_data,
            status: RecordStatus::Pending,
            document_id: None,
            artifacts: Vec::new(),
            output_folder: None,
            error_message: None,
            error_stage: None,
            started_at: None,
            completed_at: None,
        };

        conn.execute(
            "INSERT INTO records (id, job_id, row_number, row_data, status) VALUES (?, ?, ?, ?, ?)",
            params![
                record.id,
                record.job_id,
                record.row_number,
                serde_json::to_string(&record.row_data)?,
                record.status.as_str(),
            ],
        )?;

        Ok(record)
    }

    fn update_record(&self, record: &Record) -> Result<(), JobStoreError> {
        let conn = self.conn()?;
        Self::write_record(&conn, record)
    }

    fn finish_record(&self, record: &Record) -> Result<Job, JobStoreError> {
        let outcome = RecordOutcome::from_status(record.status, record.artifacts.len() as u32)
            .ok_or_else(|| JobStoreError::RecordNotTerminal {
                record_id: record.id.clone(),
                status: record.status,
            })?;
        let (successful, failed, files) = match outcome {
            RecordOutcome::Completed { files } => (1u32, 0u32, files),
            RecordOutcome::NotFound => (0, 0, 0),
            RecordOutcome::Failed => (0, 1, 0),
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::write_record(&tx, record)?;

        let changed = tx.execute(
            "UPDATE jobs SET processed_records = processed_records + 1, \
             successful_records = successful_records + ?, \
             failed_records = failed_records + ?, \
             files_downloaded = files_downloaded + ? \
             WHERE id = ?",
            params![successful, failed, files, record.job_id],
        )?;
        if changed == 0 {
            return Err(JobStoreError::NotFound(record.job_id.clone()));
        }

        let job = Self::require_job(&tx, &record.job_id)?;
        tx.commit()?;
        Ok(job)
    }

    fn list_records(
        &self,
        job_id: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<Record>, JobStoreError> {
        let conn = self.conn()?;
        let status = filter.status.map(|s| s.as_str());
        let sql = format!(
            "SELECT {} FROM records WHERE job_id = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY row_number ASC LIMIT ?3 OFFSET ?4",
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                params![job_id, status, filter.limit, filter.offset],
                Self::row_to_record,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn count_records(&self, job_id: &str, filter: &RecordFilter) -> Result<i64, JobStoreError> {
        let conn = self.conn()?;
        let status = filter.status.map(|s| s.as_str());
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM records WHERE job_id = ?1 AND (?2 IS NULL OR status = ?2)",
            params![job_id, status],
            |row| row.get(0),
        )?)
    }

    fn append_log(&self, job_id: &str, entry: NewLogEntry) -> Result<LogEntry, JobStoreError> {
        let conn = self.conn()?;
        Self::require_job(&conn, job_id)?;
        Self::insert_log(&conn, job_id, entry)
    }

    fn list_logs(&self, job_id: &str, filter: &LogFilter) -> Result<Vec<LogEntry>, JobStoreError> {
        let conn = self.conn()?;
        let level = filter.level.map(|l| l.as_str());
        let sql = format!(
            "SELECT {} FROM job_logs WHERE job_id = ?1 AND (?2 IS NULL OR level = ?2) ORDER BY seq ASC LIMIT ?3 OFFSET ?4",
            LOG_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(
                params![job_id, level, filter.limit, filter.offset],
                Self::row_to_log,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    fn count_logs(&self, job_id: &str, filter: &LogFilter) -> Result<i64, JobStoreError> {
        let conn = self.conn()?;
        let level = filter.level.map(|l| l.as_str());
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM job_logs WHERE job_id = ?1 AND (?2 IS NULL OR level = ?2)",
            params![job_id, level],
            |row| row.get(0),
        )?)
    }
}
