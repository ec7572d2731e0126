//! Daemon configuration, loaded from one JSON file.
//!
//! ```json
//! {
//!   "node":    { "url": "http://127.0.0.1:8332", "user": "rpc", "password": "secret",
//!                "network": "mainnet" },
//!   "indexer": { "window_size": 100, "start_height": 0, "poll_interval_ms": 1000 },
//!   "storage": { "path": "./utxoindex.db" },
//!   "logger":  { "level": "info", "json": false, "filename": "./utxoindex.log" }
//! }
//! ```
//!
//! Every section and field is optional.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use utxoindex_bitcoin::NodeConfig;
use utxoindex_core::IndexerConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub indexer: IndexerConfig,
    pub storage: StorageConfig,
    pub logger: LoggerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file or URL. Without one the index lives in memory.
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Also append plain-text log lines to this file.
    pub filename: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            filename: None,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.indexer.window_size > 0, "indexer.window_size must be at least 1");
        anyhow::ensure!(
            self.indexer.mempool_fetch_concurrency > 0,
            "indexer.mempool_fetch_concurrency must be at least 1"
        );
        anyhow::ensure!(!self.node.url.is_empty(), "node.url must not be empty");
        if let Some(network) = &self.node.network {
            anyhow::ensure!(!network.trim().is_empty(), "node.network must not be empty when set");
        }
        if let Some(filename) = &self.logger.filename {
            anyhow::ensure!(!filename.is_empty(), "logger.filename must not be empty when set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let cfg = AppConfig::from_json("{}").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.logger.level, "info");
        assert_eq!(cfg.indexer.window_size, 100);
        assert!(cfg.storage.path.is_none());
        assert!(cfg.node.network.is_none());
        assert!(cfg.logger.filename.is_none());
    }

    #[test]
    fn network_and_log_file_are_read() {
        let cfg = AppConfig::from_json(
            r#"{
                "node": { "network": "testnet" },
                "logger": { "filename": "/var/log/utxoindex.log" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.node.network.as_deref(), Some("testnet"));
        assert_eq!(cfg.logger.filename.as_deref(), Some("/var/log/utxoindex.log"));

        let err = AppConfig::from_json(r#"{ "node": { "network": " " } }"#).unwrap_err();
        assert!(err.to_string().contains("node.network"));
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg = AppConfig::from_json(
            r#"{
                "node": { "url": "http://node:18332", "user": "u", "password": "p" },
                "indexer": { "window_size": 12 },
                "storage": { "path": "/var/lib/utxoindex/index.db" },
                "logger": { "json": true }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.node.url, "http://node:18332");
        assert_eq!(cfg.node.request_timeout_ms, 30_000);
        assert_eq!(cfg.indexer.window_size, 12);
        assert_eq!(cfg.indexer.poll_interval_ms, 1000);
        assert_eq!(cfg.storage.path.as_deref(), Some("/var/lib/utxoindex/index.db"));
        assert!(cfg.logger.json);
        assert_eq!(cfg.logger.level, "info");
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = AppConfig::from_json(r#"{ "indexer": { "window_size": 0 } }"#).unwrap_err();
        assert!(err.to_string().contains("window_size"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = AppConfig::load(Path::new("/nonexistent/utxoindex.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/utxoindex.json"));
    }
}
