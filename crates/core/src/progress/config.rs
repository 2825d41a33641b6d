//! Progress delivery configuration.

use serde::{Deserialize, Serialize};

/// How the orchestrator's events reach subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressTransport {
    /// Orchestrator and subscribers share the process; events go straight
    /// into the bus.
    #[default]
    InProcess,
    /// Events are appended to the `progress_outbox` table and relayed into
    /// the bus of whichever process serves the subscribers.
    Outbox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default)]
    pub transport: ProgressTransport,

    /// Idle window after which a subscriber receives a heartbeat.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_secs: u64,

    /// Per-subscriber queue length. A subscriber whose queue is full is dropped.
    #[serde(default = "default_buffer")]
    pub subscriber_buffer: usize,

    /// How often the relay tails the outbox (milliseconds).
    #[serde(default = "default_poll")]
    pub outbox_poll_interval_ms: u64,

    /// Outbox rows older than this are pruned.
    #[serde(default = "default_retention")]
    pub outbox_retention_secs: u64,
}

fn default_heartbeat() -> u64 {
    25
}

fn default_buffer() -> usize {
    256
}

fn default_poll() -> u64 {
    250
}

fn default_retention() -> u64 {
    3600 // 1 hour
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            transport: ProgressTransport::default(),
            heartbeat_interval_secs: default_heartbeat(),
            subscriber_buffer: default_buffer(),
            outbox_poll_interval_ms: default_poll(),
            outbox_retention_secs: default_retention(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProgressConfig::default();
        assert_eq!(config.transport, ProgressTransport::InProcess);
        assert_eq!(config.heartbeat_interval_secs, 25);
        assert_eq!(config.subscriber_buffer, 256);
    }

    #[test]
    fn test_deserialize_outbox() {
        let toml = r#"
            transport = "outbox"
            outbox_poll_interval_ms = 100
        "#;
        let config: ProgressConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.transport, ProgressTransport::Outbox);
        assert_eq!(config.outbox_poll_interval_ms, 100);
        assert_eq!(config.outbox_retention_secs, 3600);
    }
}
