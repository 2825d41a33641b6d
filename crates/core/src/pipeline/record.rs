//! The stage chain for one record.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::convert::DocumentConverter;
use crate::docservice::{DocumentService, DocumentSummary, SearchCriterion};
use crate::job::{
    DownloadedFile, Job, JobConfig, JobStore, NewLogEntry, Record, RecordStatus, RowData,
};

use super::organize::{file_name_for, folder_for, move_file, reserve_unique, sanitize_name};
use super::{PipelineError, StageOutcome};

/// Map configured columns to search criteria, skipping blank cells.
pub fn build_criteria(config: &JobConfig, row: &RowData) -> Vec<SearchCriterion> {
    config
        .search_fields
        .iter()
        .filter_map(|mapping| {
            let value = row.get(&mapping.source_column)?.trim();
            (!value.is_empty()).then(|| SearchCriterion::new(&mapping.target_field, value))
        })
        .collect()
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Move `source` into `folder` under a collision-free variant of `name`.
async fn place(folder: &Path, source: &Path, name: &str) -> Result<PathBuf, PipelineError> {
    let destination = reserve_unique(folder, name)
        .await
        .map_err(|e| PipelineError::Organize(format!("{}: {}", name, e)))?;

    if let Err(e) = move_file(source, &destination).await {
        let _ = fs::remove_file(&destination).await;
        return Err(PipelineError::Organize(format!(
            "cannot move {} to {}: {}",
            source.display(),
            destination.display(),
            e
        )));
    }

    debug!(dest = %destination.display(), "Placed artifact");
    Ok(destination)
}

/// Return already placed artifacts to their scratch paths.
///
/// A file that cannot be moved back is deleted so the output tree holds no
/// file of a failed record.
async fn unplace(placed: &[(PathBuf, PathBuf)]) {
    for (source, destination) in placed.iter().rev() {
        if let Err(e) = move_file(destination, source).await {
            warn!(dest = %destination.display(), error = %e, "Cannot restore placed artifact, removing it");
            let _ = fs::remove_file(destination).await;
        }
    }
}

/// Runs search → download → transform → organize for a record.
///
/// Status changes are persisted as each stage begins so observers re-reading
/// the store see where a record is.
pub struct RecordPipeline {
    documents: Arc<dyn DocumentService>,
    converter: Arc<dyn DocumentConverter>,
    store: Arc<dyn JobStore>,
    temp_root: PathBuf,
}

impl RecordPipeline {
    pub fn new(
        documents: Arc<dyn DocumentService>,
        converter: Arc<dyn DocumentConverter>,
        store: Arc<dyn JobStore>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            documents,
            converter,
            store,
            temp_root: temp_root.into(),
        }
    }

    /// Scratch directory owned by one job.
    pub fn job_temp_dir(&self, job_id: &str) -> PathBuf {
        self.temp_root.join(job_id)
    }

    fn advance(&self, record: &mut Record, to: RecordStatus) -> Result<(), PipelineError> {
        if !record.advance(to) {
            warn!(record_id = %record.id, from = %record.status, to = %to, "Ignored illegal record transition");
        } else if !to.is_terminal() {
            // Terminal statuses are committed together with the job counters.
            self.store.update_record(record)?;
        }
        Ok(())
    }

    fn warn_log(&self, record: &Record, message: String) -> Result<(), PipelineError> {
        self.store
            .append_log(&record.job_id, NewLogEntry::warning(message).for_record(record))?;
        Ok(())
    }

    /// Process one record.
    ///
    /// On `Ok` the record holds its terminal status in memory only; the caller
    /// persists it with [`JobStore::finish_record`]. On `Err` the record is
    /// left in the stage where it failed and marking it failed is also the
    /// caller's job.
    pub async fn run(&self, job: &Job, record: &mut Record) -> Result<StageOutcome, PipelineError> {
        let Some(canonical) = self.search(job, record).await? else {
            return Ok(StageOutcome::NotFound);
        };

        self.download(job, record, canonical).await?;
        self.transform(job, record).await?;
        let files = self.organize(job, record).await?;

        Ok(StageOutcome::Completed { files })
    }

    async fn search(
        &self,
        job: &Job,
        record: &mut Record,
    ) -> Result<Option<DocumentSummary>, PipelineError> {
        let criteria = build_criteria(&job.config, &record.row_data);
        if criteria.is_empty() {
            let columns: Vec<&str> = job
                .config
                .search_fields
                .iter()
                .map(|m| m.source_column.as_str())
                .collect();
            return Err(PipelineError::InvalidRow(format!(
                "all search columns are blank ({})",
                columns.join(", ")
            )));
        }

        self.advance(record, RecordStatus::Searching)?;

        let matches = self
            .documents
            .search(&job.config.cabinet_id, &job.config.dialog_id, &criteria)
            .await
            .map_err(|e| PipelineError::Connectivity(e.to_string()))?;

        let Some(canonical) = matches.into_iter().next() else {
            debug!(job_id = %job.id, row = record.row_number, "No document matched");
            self.advance(record, RecordStatus::NotFound)?;
            return Ok(None);
        };

        record.document_id = Some(canonical.id.clone());
        self.advance(record, RecordStatus::Found)?;
        Ok(Some(canonical))
    }

    async fn download(
        &self,
        job: &Job,
        record: &mut Record,
        canonical: DocumentSummary,
    ) -> Result<(), PipelineError> {
        self.advance(record, RecordStatus::Downloading)?;
        let cabinet = &job.config.cabinet_id;

        let mut targets = vec![canonical];
        if job.config.include_associated_docs {
            match self.documents.linked_documents(&targets[0].id, cabinet).await {
                Ok(linked) => {
                    for doc in linked {
                        if !targets.iter().any(|t| t.id == doc.id) {
                            targets.push(doc);
                        }
                    }
                }
                Err(e) => self.warn_log(
                    record,
                    format!("Could not list linked documents of {}: {}", targets[0].id, e),
                )?,
            }
        }

        let dir = self
            .job_temp_dir(&job.id)
            .join(record.row_number.to_string());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::Download(format!("cannot create {}: {}", dir.display(), e)))?;

        let mut artifacts = Vec::new();
        let mut skipped = 0usize;
        let mut failed = 0usize;

        for doc in &targets {
            let ext = doc.extension();
            if !job.config.accepts_extension(&ext) {
                debug!(document_id = %doc.id, ext = %ext, "Skipped by file filters");
                skipped += 1;
                continue;
            }

            let bytes = match self.documents.download(&doc.id, cabinet).await {
                Ok(bytes) if !bytes.is_empty() => bytes,
                Ok(_) => {
                    failed += 1;
                    self.warn_log(record, format!("Document {} downloaded empty", doc.id))?;
                    continue;
                }
                Err(e) => {
                    failed += 1;
                    self.warn_log(record, format!("Download of document {} failed: {}", doc.id, e))?;
                    continue;
                }
            };

            let name = sanitize_name(&format!("{}_document.{}", doc.id, ext));
            let path = dir.join(&name);
            if let Err(e) = fs::write(&path, &bytes).await {
                failed += 1;
                self.warn_log(record, format!("Cannot save document {}: {}", doc.id, e))?;
                continue;
            }

            artifacts.push(DownloadedFile {
                document_id: doc.id.clone(),
                source_name: name,
                saved_path: path.to_string_lossy().into_owned(),
                size_bytes: bytes.len() as u64,
                transformed: false,
                sha256: Some(sha256_hex(&bytes)),
            });
        }

        if artifacts.is_empty() {
            let reason = if failed == 0 && skipped > 0 {
                format!("all {} document(s) excluded by file filters", skipped)
            } else {
                format!(
                    "no document retrieved ({} failed, {} filtered)",
                    failed, skipped
                )
            };
            return Err(PipelineError::Download(reason));
        }

        record.artifacts = artifacts;
        self.store.update_record(record)?;
        Ok(())
    }

    async fn transform(&self, job: &Job, record: &mut Record) -> Result<(), PipelineError> {
        self.advance(record, RecordStatus::Processing)?;

        if !job.config.transform_rules.convert_images {
            return Ok(());
        }

        for artifact in record.artifacts.iter_mut() {
            let path = PathBuf::from(&artifact.saved_path);
            if !self.converter.can_convert(&extension(&path)) {
                continue;
            }

            let output = self
                .converter
                .convert(&path)
                .await
                .map_err(|e| PipelineError::Transform(format!("{}: {}", artifact.source_name, e)))?;

            let bytes = fs::read(&output)
                .await
                .map_err(|e| PipelineError::Transform(format!("{}: {}", output.display(), e)))?;

            artifact.saved_path = output.to_string_lossy().into_owned();
            artifact.size_bytes = bytes.len() as u64;
            artifact.sha256 = Some(sha256_hex(&bytes));
            artifact.transformed = true;
        }

        self.store.update_record(record)?;
        Ok(())
    }

    async fn organize(&self, job: &Job, record: &mut Record) -> Result<u32, PipelineError> {
        let folder = folder_for(Path::new(&job.output_directory), &job.config, &record.row_data);
        fs::create_dir_all(&folder).await.map_err(|e| {
            PipelineError::Organize(format!("cannot create {}: {}", folder.display(), e))
        })?;

        let count = record.artifacts.len();
        let mut placed: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(count);
        for index in 0..count {
            let source = PathBuf::from(&record.artifacts[index].saved_path);
            let name = file_name_for(&job.config, &record.row_data, &file_name(&source), index, count);

            match place(&folder, &source, &name).await {
                Ok(destination) => placed.push((source, destination)),
                Err(e) => {
                    unplace(&placed).await;
                    return Err(e);
                }
            }
        }

        for (artifact, (_, destination)) in record.artifacts.iter_mut().zip(&placed) {
            artifact.saved_path = destination.to_string_lossy().into_owned();
        }

        record.output_folder = Some(folder.to_string_lossy().into_owned());
        self.advance(record, RecordStatus::Completed)?;
        Ok(count as u32)
    }
}
