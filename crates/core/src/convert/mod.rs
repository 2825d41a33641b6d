//! Format conversion of downloaded artifacts.

mod command;
mod config;

pub use command::CommandConverter;
pub use config::ConverterConfig;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Converter program not found: {program}")]
    ProgramNotFound { program: String },

    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    #[error("Conversion failed: {reason}")]
    Failed {
        reason: String,
        stderr: Option<String>,
    },

    #[error("Conversion timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Converts artifacts (images) into PDF.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    fn name(&self) -> &str;

    /// Whether files with this extension are converted.
    fn can_convert(&self, extension: &str) -> bool;

    /// Convert `input`, returning the path of the produced PDF.
    async fn convert(&self, input: &Path) -> Result<PathBuf, ConvertError>;

    /// Check the converter is usable.
    async fn validate(&self) -> Result<(), ConvertError>;
}
