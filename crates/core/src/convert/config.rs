//! Configuration for the document converter.

use serde::{Deserialize, Serialize};

/// External image-to-PDF converter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Program to run.
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments; `{input}` and `{output}` are replaced with the paths.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Timeout for a single conversion in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Extensions treated as images, lowercase without dot.
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Delete the source image after a successful conversion.
    #[serde(default = "default_delete_source")]
    pub delete_source: bool,
}

fn default_program() -> String {
    "img2pdf".to_string()
}

fn default_args() -> Vec<String> {
    vec![
        "{input}".to_string(),
        "-o".to_string(),
        "{output}".to_string(),
    ]
}

fn default_timeout() -> u64 {
    120
}

fn default_image_extensions() -> Vec<String> {
    ["tif", "tiff", "png", "jpg", "jpeg", "bmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_delete_source() -> bool {
    true
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            timeout_secs: default_timeout(),
            image_extensions: default_image_extensions(),
            delete_source: default_delete_source(),
        }
    }
}
