//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the external service traits,
//! allowing end-to-end job runs without a document platform, a converter
//! binary or a real spreadsheet.
//!
//! # Example
//!
//! ```rust,ignore
//! use docfetch_core::testing::{MockConverter, MockDocumentService, StaticSpreadsheet};
//!
//! let documents = MockDocumentService::new();
//! let converter = MockConverter::new();
//! let sheet = StaticSpreadsheet::new(&["Invoice", "Supplier"], &[&["A-1", "Acme"]]);
//!
//! // Configure mock responses
//! documents.add_document("A-1", "doc-1", b"%PDF-1.4").await;
//!
//! // Hand them to JobOrchestrator::new...
//! ```

mod mock_converter;
mod mock_document_service;
mod recording_publisher;
mod static_spreadsheet;

pub use mock_converter::{MockConverter, RecordedConversion};
pub use mock_document_service::{MockDocumentService, SearchHook};
pub use recording_publisher::RecordingPublisher;
pub use static_spreadsheet::StaticSpreadsheet;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use chrono::Utc;

    use crate::job::{
        CreateJobRequest, Job, JobConfig, JobStatus, RowData, SearchFieldMapping, TransformRules,
    };

    /// A valid configuration: `Invoice` searched as `INVOICE_NO`, files
    /// grouped by `Supplier`, PDF and TIFF accepted.
    pub fn job_config() -> JobConfig {
        JobConfig {
            cabinet_id: "cabinet-1".to_string(),
            dialog_id: "dialog-1".to_string(),
            search_fields: vec![SearchFieldMapping::new("Invoice", "INVOICE_NO")],
            file_filters: vec!["pdf".to_string(), "tif".to_string()],
            transform_rules: TransformRules::default(),
            folder_structure: vec!["Supplier".to_string()],
            include_associated_docs: false,
            test_mode: false,
            test_mode_limit: 10,
            auto_start: false,
        }
    }

    /// A creation request for [`job_config`] reading `spreadsheet_path`.
    pub fn create_request(
        spreadsheet_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> CreateJobRequest {
        let spreadsheet_path = spreadsheet_path.as_ref();
        CreateJobRequest {
            created_by: "tester".to_string(),
            spreadsheet_path: spreadsheet_path.display().to_string(),
            spreadsheet_name: spreadsheet_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "index.csv".to_string()),
            sheet_name: None,
            output_directory: output_dir.as_ref().display().to_string(),
            config: job_config(),
        }
    }

    /// A row from `(column, value)` pairs, in the given order.
    pub fn row(cells: &[(&str, &str)]) -> RowData {
        cells.iter().map(|(c, v)| (*c, *v)).collect()
    }

    /// A PENDING job that has not been persisted.
    pub fn job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            created_by: "tester".to_string(),
            status: JobStatus::Pending,
            spreadsheet_path: "/data/index.csv".to_string(),
            spreadsheet_name: "index.csv".to_string(),
            sheet_name: None,
            output_directory: "/out".to_string(),
            config: job_config(),
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
        }
    }
}
