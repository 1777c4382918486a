//! Configuration management for Verbose
//!
//! Loads settings from TOML file at ~/.verbose/config.toml

use crate::error::{CoreError, Result};
use crate::parser::Pricing;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base directory holding one subdirectory per project
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,

    /// Parser type (claude_code)
    #[serde(default = "default_parser")]
    pub parser: String,

    /// Whether `agent-*` sidecar transcripts are indexed
    #[serde(default = "default_true")]
    pub include_agents: bool,

    /// File watcher configuration
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Parser safety limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Per-million-token rates used for cost estimates
    #[serde(default)]
    pub pricing: Pricing,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_projects_dir() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".claude").join("projects"))
        .unwrap_or_else(|| PathBuf::from(".claude/projects"))
}

fn default_parser() -> String {
    "claude_code".to_string()
}

fn default_true() -> bool {
    true
}

/// File watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Whether live re-parsing is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Quiet period after the last write before a file is re-parsed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    500
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            enabled: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Parser safety limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Lines longer than this are skipped without being buffered
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

fn default_max_line_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file; logs go to stderr when unset
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            projects_dir: default_projects_dir(),
            parser: default_parser(),
            include_agents: true,
            watcher: WatcherConfig::default(),
            limits: LimitsConfig::default(),
            pricing: Pricing::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_path(path.as_ref());

        if !expanded_path.exists() {
            return Err(CoreError::Config(format!(
                "Configuration file not found: {}",
                expanded_path.display()
            )));
        }

        let content = std::fs::read_to_string(&expanded_path)?;
        let config: Config = toml::from_str(&content)?;

        Ok(config)
    }

    /// Default configuration file path, `~/.verbose/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|p| p.join(".verbose").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".verbose/config.toml"))
    }

    /// Get the projects directory, expanding ~ if present
    pub fn projects_dir(&self) -> PathBuf {
        expand_path(&self.projects_dir)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("VERBOSE_PROJECTS_DIR") {
            self.projects_dir = PathBuf::from(dir);
        }
        if let Ok(ms) = std::env::var("VERBOSE_DEBOUNCE_MS") {
            if let Ok(ms) = ms.parse() {
                self.watcher.debounce_ms = ms;
            }
        }
        if let Ok(level) = std::env::var("VERBOSE_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Create a default configuration file at the given path
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let content = r#"# Verbose Configuration

# Directory containing one subdirectory per project, each holding
# line-delimited session transcripts (*.jsonl)
projects_dir = "~/.claude/projects"

# Transcript format
parser = "claude_code"

# Index agent-* sidecar transcripts alongside main sessions
include_agents = true

[watcher]
# Re-parse transcripts as they change
enabled = true
# Quiet period (ms) after the last write before a file is re-parsed
debounce_ms = 500

[limits]
# Lines longer than this many bytes are skipped
max_line_bytes = 10485760

[pricing]
# USD per million tokens, used for cost estimates only
input_per_mtok = 15.0
output_per_mtok = 75.0
cache_read_per_mtok = 1.5
cache_write_per_mtok = 18.75

[logging]
level = "info"
# file = "~/.verbose/verbose.log"
"#;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;

        Ok(())
    }
}

/// Expand ~ to home directory in paths
pub fn expand_path(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
