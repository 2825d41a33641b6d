//! Mock converter for testing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::convert::{ConvertError, DocumentConverter};

/// Extensions the mock treats as images.
const IMAGE_EXTENSIONS: &[&str] = &["tif", "tiff", "png", "jpg", "jpeg", "bmp"];

/// A recorded conversion for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedConversion {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub success: bool,
}

/// Mock implementation of the DocumentConverter trait.
///
/// Writes `<input>.pdf` containing a marker plus the input bytes and removes
/// the input, like the real converter does.
#[derive(Debug, Default)]
pub struct MockConverter {
    conversions: Arc<RwLock<Vec<RecordedConversion>>>,
    /// When set, every conversion fails.
    fail: Arc<RwLock<bool>>,
}

impl MockConverter {
    /// Create a new mock converter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make conversions fail (or succeed again).
    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    /// Get all recorded conversions.
    pub async fn recorded_conversions(&self) -> Vec<RecordedConversion> {
        self.conversions.read().await.clone()
    }

    /// Get the number of successful conversions.
    pub async fn conversion_count(&self) -> usize {
        self.conversions
            .read()
            .await
            .iter()
            .filter(|c| c.success)
            .count()
    }
}

#[async_trait]
impl DocumentConverter for MockConverter {
    fn name(&self) -> &str {
        "mock"
    }

    fn can_convert(&self, extension: &str) -> bool {
        IMAGE_EXTENSIONS
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }

    async fn convert(&self, input: &Path) -> Result<PathBuf, ConvertError> {
        if *self.fail.read().await {
            self.conversions.write().await.push(RecordedConversion {
                input: input.to_path_buf(),
                output: None,
                success: false,
            });
            return Err(ConvertError::Failed {
                reason: "mock conversion failure".to_string(),
                stderr: None,
            });
        }

        let content = tokio::fs::read(input).await.map_err(|_| ConvertError::InputNotFound {
            path: input.to_path_buf(),
        })?;

        let output = input.with_extension("pdf");
        let mut pdf = b"%PDF-mock\n".to_vec();
        pdf.extend_from_slice(&content);
        tokio::fs::write(&output, pdf).await?;
        tokio::fs::remove_file(input).await?;

        self.conversions.write().await.push(RecordedConversion {
            input: input.to_path_buf(),
            output: Some(output.clone()),
            success: true,
        });
        Ok(output)
    }

    async fn validate(&self) -> Result<(), ConvertError> {
        Ok(())
    }
}
