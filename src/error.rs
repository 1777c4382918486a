//! Error types for Verbose

use std::path::PathBuf;
use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Parser error
    #[error("Parser error: {0}")]
    Parser(String),

    /// Watcher error
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// The projects base directory is missing or not a directory
    #[error("Projects directory not found: {}", .0.display())]
    BaseDirMissing(PathBuf),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Not found error
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),
}

/// Result type alias for Core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<notify::Error> for CoreError {
    fn from(e: notify::Error) -> Self {
        CoreError::Watcher(e.to_string())
    }
}
