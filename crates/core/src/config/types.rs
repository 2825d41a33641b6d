use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::convert::ConverterConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::progress::ProgressConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub document_service: Option<DocumentServiceConfig>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("docfetch.db")
}

/// Directories used for uploads, final output and per-job scratch space.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Where uploaded spreadsheets are stored.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Default root for organized output when a job does not name one.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Root for job-scoped temporary directories.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

/// Document-management service connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentServiceConfig {
    /// Service base URL (e.g., "https://company.example.cloud/DocuWare/Platform")
    pub url: String,
    pub username: String,
    pub password: String,
    /// Organization name, empty when the service has a single one
    #[serde(default)]
    pub organization: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_timeout() -> u32 {
    30
}

/// Log output format for the process-level subscriber
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_service: Option<SanitizedDocumentServiceConfig>,
    pub orchestrator: OrchestratorConfig,
    pub progress: ProgressConfig,
}

/// Document service config with the password hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedDocumentServiceConfig {
    pub url: String,
    pub username: String,
    pub password_configured: bool,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            storage: config.storage.clone(),
            document_service: config
                .document_service
                .as_ref()
                .map(|ds| SanitizedDocumentServiceConfig {
                    url: ds.url.clone(),
                    username: ds.username.clone(),
                    password_configured: !ds.password.is_empty(),
                    timeout_secs: ds.timeout_secs,
                }),
            orchestrator: config.orchestrator.clone(),
            progress: config.progress.clone(),
        }
    }
}
