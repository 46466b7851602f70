//! Configuration types and loading
//!
//! Runtime configuration comes from three layers: built-in defaults, an
//! optional TOML file, and CLI flags. Later layers win. The TOML file mostly
//! carries the tuning knobs that rarely change between runs; the CLI carries
//! the per-run inputs (dictionary, workers, ciphertext).

pub mod cli;

pub use cli::{Cli, ExecutionMode};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Dictionary file path.
    #[serde(default)]
    pub dictionary: PathBuf,

    /// Cipher backend name.
    #[serde(default = "default_cipher")]
    pub cipher: String,

    /// Partitions per attack. `None` means workers × CPU count.
    #[serde(default)]
    pub partitions: Option<usize>,

    /// Timing and retry knobs.
    #[serde(default)]
    pub tuning: TuningConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dictionary: PathBuf::new(),
            cipher: default_cipher(),
            partitions: None,
            tuning: TuningConfig::default(),
        }
    }
}

fn default_cipher() -> String {
    "block64".to_string()
}

/// Timing and retry knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// How often a scanning worker publishes a checkpoint.
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,

    /// How long the coordinator tolerates silence from a worker holding a
    /// sub-job before treating it as dead. Must comfortably exceed the
    /// checkpoint interval.
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    /// How many times a partition may be reassigned after its first
    /// dispatch before it is written off as failed.
    #[serde(default = "default_max_reassignments")]
    pub max_reassignments: u32,

    /// Backoff between guess delivery retries on the worker side.
    #[serde(default = "default_delivery_retry_backoff_ms")]
    pub delivery_retry_backoff_ms: u64,

    /// Delivery attempts per guess before the worker gives up the session.
    #[serde(default = "default_delivery_retry_max")]
    pub delivery_retry_max: u32,

    /// Backoff between coordinator reconnection attempts to a worker.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            max_reassignments: default_max_reassignments(),
            delivery_retry_backoff_ms: default_delivery_retry_backoff_ms(),
            delivery_retry_max: default_delivery_retry_max(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

fn default_checkpoint_interval_ms() -> u64 {
    500
}

fn default_liveness_timeout_ms() -> u64 {
    5000
}

fn default_max_reassignments() -> u32 {
    3
}

fn default_delivery_retry_backoff_ms() -> u64 {
    100
}

fn default_delivery_retry_max() -> u32 {
    5
}

fn default_reconnect_backoff_ms() -> u64 {
    1000
}

/// Parse a TOML configuration file.
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from a string.
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config =
        ::toml::from_str(contents).context("Failed to parse TOML configuration")?;
    Ok(config)
}

/// Build the effective configuration from CLI flags and the optional TOML
/// file (CLI takes precedence).
pub fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => Config::default(),
    };

    if let Some(ref dictionary) = cli.dictionary {
        config.dictionary = dictionary.clone();
    }
    if cli.cipher != default_cipher() {
        config.cipher = cli.cipher.clone();
    }
    if cli.partitions.is_some() {
        config.partitions = cli.partitions;
    }

    Ok(config)
}

impl Config {
    /// Partition count for an attack dispatched to `worker_count` workers.
    ///
    /// Defaults to workers × CPU count: more partitions than workers keeps
    /// every worker busy and limits the amount of rescanning a single dead
    /// worker can cause.
    pub fn effective_partitions(&self, worker_count: usize) -> usize {
        self.partitions
            .unwrap_or_else(|| (worker_count * num_cpus::get()).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cipher, "block64");
        assert_eq!(config.tuning.checkpoint_interval_ms, 500);
        assert_eq!(config.tuning.liveness_timeout_ms, 5000);
        assert_eq!(config.tuning.max_reassignments, 3);
    }

    #[test]
    fn test_parse_partial_toml_fills_defaults() {
        let config = parse_toml_string(
            r#"
            dictionary = "/srv/words.txt"

            [tuning]
            liveness_timeout_ms = 12000
            "#,
        )
        .unwrap();

        assert_eq!(config.dictionary, PathBuf::from("/srv/words.txt"));
        assert_eq!(config.tuning.liveness_timeout_ms, 12000);
        assert_eq!(config.tuning.checkpoint_interval_ms, 500);
        assert_eq!(config.cipher, "block64");
    }

    #[test]
    fn test_parse_invalid_toml_is_error() {
        assert!(parse_toml_string("dictionary = [broken").is_err());
    }

    #[test]
    fn test_cli_overrides_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keysweep.toml");
        std::fs::write(
            &path,
            r#"
            dictionary = "/srv/words.txt"
            partitions = 8
            "#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "keysweep",
            "--mode",
            "coordinator",
            "--host-list",
            "a:9901",
            "--config",
            path.to_str().unwrap(),
            "--dictionary",
            "/tmp/other.txt",
        ]);

        let config = build_config(&cli).unwrap();
        assert_eq!(config.dictionary, PathBuf::from("/tmp/other.txt"));
        assert_eq!(config.partitions, Some(8));
    }

    #[test]
    fn test_effective_partitions_prefers_explicit_value() {
        let config = Config {
            partitions: Some(5),
            ..Config::default()
        };
        assert_eq!(config.effective_partitions(3), 5);

        let config = Config::default();
        assert!(config.effective_partitions(2) >= 2);
        assert!(config.effective_partitions(0) >= 1);
    }
}
