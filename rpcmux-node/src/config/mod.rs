// Configuration Module
//
// Typed configuration for a mux instance. Loading from a file is the
// caller's concern; everything here is plain data with builder-style
// overrides, so tests and embedders can construct configs directly.

use serde::Deserialize;
use std::time::Duration;

use rpcmux_common::LoggingConfig;

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_keepalive_interval_ms() -> u64 {
    30_000
}

fn default_status_interval_ms() -> u64 {
    15_000
}

fn default_status_stale_after_ms() -> u64 {
    120_000
}

/// Transport-facing settings. The bind address is consumed by the external
/// transport layer; the advertise URL is what peers dial back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub bind: String,
    #[serde(default)]
    pub advertise_url: String,
}

/// Message bus settings. An empty URL disables federation and the mq.*
/// facade.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MqConfig {
    #[serde(default)]
    pub url: String,
}

impl MqConfig {
    pub fn is_empty(&self) -> bool {
        self.url.is_empty()
    }
}

/// Per-router tunables. Defaults are the protocol constants; tests shrink
/// them to keep suites fast.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterOptions {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    #[serde(default = "default_status_stale_after_ms")]
    pub status_stale_after_ms: u64,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            status_interval_ms: default_status_interval_ms(),
            status_stale_after_ms: default_status_stale_after_ms(),
        }
    }
}

impl RouterOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn status_stale_after(&self) -> Duration {
        Duration::from_millis(self.status_stale_after_ms)
    }
}

/// Top-level configuration for one mux instance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub mq: MqConfig,
    #[serde(default)]
    pub router: RouterOptions,
    #[serde(skip)]
    pub logging: Option<LoggingConfig>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.server.bind = bind.into();
        self
    }

    pub fn with_advertise_url(mut self, url: impl Into<String>) -> Self {
        self.server.advertise_url = url.into();
        self
    }

    pub fn with_mq_url(mut self, url: impl Into<String>) -> Self {
        self.mq.url = url.into();
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.router.request_timeout_ms = ms;
        self
    }

    pub fn with_keepalive_interval_ms(mut self, ms: u64) -> Self {
        self.router.keepalive_interval_ms = ms;
        self
    }

    pub fn with_status_interval_ms(mut self, ms: u64) -> Self {
        self.router.status_interval_ms = ms;
        self
    }

    pub fn with_status_stale_after_ms(mut self, ms: u64) -> Self {
        self.router.status_stale_after_ms = ms;
        self
    }

    pub fn with_logging_config(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = AppConfig::default();
        assert_eq!(config.router.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.router.keepalive_interval(), Duration::from_secs(30));
        assert_eq!(config.router.status_interval(), Duration::from_secs(15));
        assert_eq!(config.router.status_stale_after(), Duration::from_secs(120));
        assert!(config.mq.is_empty());
    }

    #[test]
    fn deserializes_partial_config() {
        let config: AppConfig = serde_json::from_str(
            r#"{"server": {"advertise_url": "http://127.0.0.1:16011"},
                "mq": {"url": "memory://"},
                "router": {"request_timeout_ms": 500}}"#,
        )
        .unwrap();
        assert_eq!(config.server.advertise_url, "http://127.0.0.1:16011");
        assert_eq!(config.mq.url, "memory://");
        assert_eq!(config.router.request_timeout(), Duration::from_millis(500));
        // untouched fields keep their defaults
        assert_eq!(config.router.status_interval_ms, 15_000);
    }

    #[test]
    fn builders_override_fields() {
        let config = AppConfig::new()
            .with_advertise_url("http://127.0.0.1:16012")
            .with_mq_url("memory://")
            .with_request_timeout_ms(250);
        assert_eq!(config.server.advertise_url, "http://127.0.0.1:16012");
        assert_eq!(config.router.request_timeout_ms, 250);
    }
}
