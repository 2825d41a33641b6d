use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Orchestrator limits are positive
/// - Heartbeat interval is positive
/// - Converter program is set
/// - Document service URL is http(s)
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.orchestrator.max_concurrent_jobs == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_concurrent_jobs must be at least 1".to_string(),
        ));
    }

    if config.orchestrator.job_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.job_timeout_secs must be at least 1".to_string(),
        ));
    }

    if config.progress.heartbeat_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "progress.heartbeat_interval_secs must be at least 1".to_string(),
        ));
    }

    if config.converter.program.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "converter.program cannot be empty".to_string(),
        ));
    }

    if let Some(ref ds) = config.document_service {
        if !(ds.url.starts_with("http://") || ds.url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "document_service.url must be an http(s) URL, got '{}'",
                ds.url
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DocumentServiceConfig, ServerConfig};
    use std::net::IpAddr;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse::<IpAddr>().unwrap(),
                port: 0,
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = Config::default();
        config.orchestrator.max_concurrent_jobs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_heartbeat_fails() {
        let mut config = Config::default();
        config.progress.heartbeat_interval_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_document_service_url_scheme() {
        let mut config = Config {
            document_service: Some(DocumentServiceConfig {
                url: "dms.example.com".to_string(),
                username: "svc".to_string(),
                password: "pw".to_string(),
                organization: String::new(),
                timeout_secs: 30,
            }),
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("document_service.url"));

        if let Some(ref mut ds) = config.document_service {
            ds.url = "https://dms.example.com".to_string();
        }
        assert!(validate_config(&config).is_ok());
    }
}
