//! Converter that shells out to an external image-to-PDF tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::{ConvertError, ConverterConfig, DocumentConverter};

/// Runs `config.program` with `{input}` / `{output}` substituted into its args.
pub struct CommandConverter {
    config: ConverterConfig,
}

impl CommandConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ConverterConfig::default())
    }

    fn build_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }

    fn output_path(input: &Path) -> PathBuf {
        input.with_extension("pdf")
    }
}

#[async_trait]
impl DocumentConverter for CommandConverter {
    fn name(&self) -> &str {
        &self.config.program
    }

    fn can_convert(&self, extension: &str) -> bool {
        self.config
            .image_extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }

    async fn convert(&self, input: &Path) -> Result<PathBuf, ConvertError> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(ConvertError::InputNotFound {
                path: input.to_path_buf(),
            });
        }

        let output = Self::output_path(input);
        let args = self.build_args(input, &output);
        debug!(program = %self.config.program, ?args, "Running converter");

        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConvertError::ProgramNotFound {
                        program: self.config.program.clone(),
                    }
                } else {
                    ConvertError::Io(e)
                }
            })?;

        let result = timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await;

        let output_status = match result {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(ConvertError::Io(e)),
            // The child is killed when its handle is dropped with the future.
            Err(_) => {
                return Err(ConvertError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                })
            }
        };

        if !output_status.status.success() {
            let stderr = String::from_utf8_lossy(&output_status.stderr)
                .trim()
                .chars()
                .take(500)
                .collect::<String>();
            return Err(ConvertError::Failed {
                reason: format!("{} exited with code {:?}", self.config.program, output_status.status.code()),
                stderr: (!stderr.is_empty()).then_some(stderr),
            });
        }

        let meta = tokio::fs::metadata(&output).await.map_err(|_| ConvertError::Failed {
            reason: "output file not created".to_string(),
            stderr: None,
        })?;
        if meta.len() == 0 {
            return Err(ConvertError::Failed {
                reason: "output file is empty".to_string(),
                stderr: None,
            });
        }

        if self.config.delete_source && output != input {
            if let Err(e) = tokio::fs::remove_file(input).await {
                warn!(path = %input.display(), error = %e, "Failed to remove converted source");
            }
        }

        Ok(output)
    }

    async fn validate(&self) -> Result<(), ConvertError> {
        match Command::new(&self.config.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ConvertError::ProgramNotFound {
                    program: self.config.program.clone(),
                })
            }
            Err(e) => Err(ConvertError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn copy_converter() -> CommandConverter {
        CommandConverter::new(ConverterConfig {
            program: "cp".to_string(),
            args: vec!["{input}".to_string(), "{output}".to_string()],
            ..ConverterConfig::default()
        })
    }

    #[test]
    fn test_build_args_substitutes_paths() {
        let converter = CommandConverter::with_defaults();
        let args = converter.build_args(Path::new("/tmp/a.tif"), Path::new("/tmp/a.pdf"));
        assert_eq!(args, vec!["/tmp/a.tif", "-o", "/tmp/a.pdf"]);
    }

    #[test]
    fn test_can_convert_image_extensions() {
        let converter = CommandConverter::with_defaults();
        assert!(converter.can_convert("TIF"));
        assert!(converter.can_convert("jpeg"));
        assert!(!converter.can_convert("pdf"));
        assert!(!converter.can_convert("docx"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convert_runs_program_and_removes_source() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("scan.tif");
        tokio::fs::write(&input, b"not really a tiff").await.unwrap();

        let output = copy_converter().convert(&input).await.unwrap();
        assert_eq!(output, dir.path().join("scan.pdf"));
        assert!(output.exists());
        assert!(!input.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convert_nonzero_exit_fails() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("scan.png");
        tokio::fs::write(&input, b"x").await.unwrap();

        let converter = CommandConverter::new(ConverterConfig {
            program: "false".to_string(),
            args: vec![],
            ..ConverterConfig::default()
        });
        let err = converter.convert(&input).await.unwrap_err();
        assert!(matches!(err, ConvertError::Failed { .. }));
        assert!(input.exists());
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("scan.png");
        tokio::fs::write(&input, b"x").await.unwrap();

        let converter = CommandConverter::new(ConverterConfig {
            program: "definitely-not-a-real-converter-binary".to_string(),
            ..ConverterConfig::default()
        });
        assert!(matches!(
            converter.convert(&input).await.unwrap_err(),
            ConvertError::ProgramNotFound { .. }
        ));
        assert!(matches!(
            converter.validate().await.unwrap_err(),
            ConvertError::ProgramNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_input() {
        let err = copy_converter()
            .convert(Path::new("/nonexistent/scan.tif"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::InputNotFound { .. }));
    }
}
