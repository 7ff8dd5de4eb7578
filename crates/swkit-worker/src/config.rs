//! Worker configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swkit_common::{CommonError, RetryConfig};
use swkit_net::Destination;

use crate::{Result, ServiceWorkerError};

/// Configuration of one worker version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cache generation name. Bumping it invalidates every older generation.
    pub cache_name: String,

    /// Root-relative URLs pre-cached at install.
    pub static_assets: Vec<String>,

    /// Root-relative URL served to navigations when everything else fails.
    pub offline_page: String,

    /// Hosts (and their subdomains) answered network-first.
    pub api_hosts: Vec<String>,

    /// Path fragment marking API calls, answered network-first.
    pub api_path_marker: String,

    /// Destinations answered cache-first.
    pub cache_first_destinations: Vec<Destination>,

    /// Path suffixes answered cache-first.
    pub cache_first_extensions: Vec<String>,

    /// Background sync tag that triggers the sync handler.
    pub sync_tag: String,

    /// Network budget for network-first requests before falling back to the cache.
    pub network_timeout_ms: Option<u64>,

    /// Activate as soon as install succeeds instead of waiting.
    pub skip_waiting: bool,

    pub install: InstallConfig,
}

/// Install-step settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Attempts per static asset (1 = no retry).
    pub max_attempts: u32,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: "planner-app-cache-v1".to_string(),
            static_assets: [
                "/",
                "/index.html",
                "/main.dart.js",
                "/flutter_service_worker.js",
                "/favicon.png",
                "/manifest.json",
                "/icons/Icon-192.png",
                "/icons/Icon-512.png",
                "/icons/Icon-maskable-192.png",
                "/icons/Icon-maskable-512.png",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            offline_page: "/offline.html".to_string(),
            api_hosts: vec![
                "firestore.googleapis.com".to_string(),
                "www.googleapis.com".to_string(),
            ],
            api_path_marker: "/api/".to_string(),
            cache_first_destinations: vec![
                Destination::Style,
                Destination::Script,
                Destination::Font,
                Destination::Image,
            ],
            cache_first_extensions: [".js", ".css", ".png", ".jpg", ".svg", ".json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sync_tag: "sync-data".to_string(),
            network_timeout_ms: None,
            skip_waiting: true,
            install: InstallConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CommonError::config_with_source("parsing worker config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            CommonError::config_with_source(format!("reading {}", path.display()), e)
        })?;
        Self::from_json_str(&json)
    }

    /// Same config under a different cache generation name.
    pub fn with_cache_name(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = cache_name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache_name must not be empty".to_string(),
            ));
        }
        if let Some(asset) = self.static_assets.iter().find(|a| !a.starts_with('/')) {
            return Err(ServiceWorkerError::Config(format!(
                "static asset '{asset}' must be root-relative"
            )));
        }
        if !self.offline_page.starts_with('/') {
            return Err(ServiceWorkerError::Config(format!(
                "offline_page '{}' must be root-relative",
                self.offline_page
            )));
        }
        if self.install.max_attempts == 0 {
            return Err(ServiceWorkerError::Config(
                "install.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout_ms.map(Duration::from_millis)
    }

    /// Retry policy for static asset seeding.
    pub fn install_retry(&self) -> RetryConfig {
        RetryConfig::with_attempts(self.install.max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.static_assets.len(), 10);
        assert_eq!(config.sync_tag, "sync-data");
        assert!(config.skip_waiting);
        assert_eq!(config.install_retry().max_attempts, 1);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = WorkerConfig::from_json_str(
            r#"{
                "cache_name": "planner-app-cache-v2",
                "network_timeout_ms": 2500,
                "install": { "max_attempts": 3 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.cache_name, "planner-app-cache-v2");
        assert_eq!(config.network_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.install.max_attempts, 3);
        assert_eq!(config.offline_page, "/offline.html");
    }

    #[test]
    fn test_rejects_relative_asset() {
        let err = WorkerConfig::from_json_str(r#"{ "static_assets": ["index.html"] }"#)
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::Config(msg) if msg.contains("index.html")));
    }

    #[test]
    fn test_rejects_empty_cache_name_and_zero_attempts() {
        assert!(WorkerConfig::from_json_str(r#"{ "cache_name": " " }"#).is_err());
        assert!(WorkerConfig::from_json_str(r#"{ "install": { "max_attempts": 0 } }"#).is_err());
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = WorkerConfig::from_json_str("{ cache_name: ").unwrap_err();
        assert!(matches!(err, ServiceWorkerError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "sync_tag": "sync-outbox", "skip_waiting": false }}"#).unwrap();

        let config = WorkerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sync_tag, "sync-outbox");
        assert!(!config.skip_waiting);

        assert!(WorkerConfig::from_file("/nonexistent/sw.json").is_err());
    }
}
