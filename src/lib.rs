//! Verbose - live index of AI coding agent transcripts
//!
//! This crate provides the core functionality for Verbose:
//! - Decoding append-only JSONL transcripts into ordered event timelines
//! - Collapsing incrementally rewritten assistant messages to their final form
//! - Per-session token, cost and activity summaries
//! - A concurrent in-memory session index kept fresh by a file watcher
//!
//! # Usage
//!
//! ```ignore
//! use verbose::{Config, Core};
//!
//! let core = Core::new(Config::default())?;
//! core.scan()?;
//! core.start_watching().await?;
//! let mut updates = core.subscribe();
//! while updates.next().await.is_some() {
//!     for summary in core.list_filtered(Some("my-project")) { /* ... */ }
//! }
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod parser;
pub mod watcher;

// Re-export main types for convenience
pub use config::Config;
pub use error::{CoreError, Result};
pub use index::SessionIndex;
pub use parser::{Event, EventKind, Session, SessionSummary};

use futures::Stream;
use parser::{get_parser, is_session_file, parse_session_file, SessionParser};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use tokio::sync::RwLock;
use watcher::{Notifier, SessionReparser, WatcherHandle};

/// Outcome of an initial directory scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Project directories found (and later watched)
    pub directories: usize,
    /// Transcript files parsed
    pub files: usize,
    /// Sessions added to the index
    pub sessions: usize,
    /// Files that could not be read or held no events
    pub skipped: usize,
}

/// Core service that coordinates scanning, watching and the session index
pub struct Core {
    /// Configuration
    pub config: Config,

    /// Session index shared with the watcher
    index: Arc<SessionIndex>,

    parser: Arc<dyn SessionParser>,

    /// Change signal for subscribers
    notifier: Notifier,

    /// Project directories discovered by the last scan
    project_dirs: std::sync::RwLock<Vec<PathBuf>>,

    /// File watcher state (optional, only when watching is active)
    watcher_handle: RwLock<Option<WatcherHandle>>,
}

impl Core {
    /// Create a new Core instance with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        let parser = get_parser(&config.parser, config.pricing).ok_or_else(|| {
            CoreError::Config(format!("Unknown parser type: {}", config.parser))
        })?;

        Ok(Core {
            config,
            index: Arc::new(SessionIndex::new()),
            parser: Arc::from(parser),
            notifier: Notifier::new(),
            project_dirs: std::sync::RwLock::new(Vec::new()),
            watcher_handle: RwLock::new(None),
        })
    }

    /// Walk the projects directory and index every transcript found.
    ///
    /// Only a missing or unreadable base directory is an error; unreadable
    /// project directories and files are skipped.
    pub fn scan(&self) -> Result<ScanReport> {
        let base = self.config.projects_dir();
        if !base.is_dir() {
            return Err(CoreError::BaseDirMissing(base));
        }

        let mut report = ScanReport::default();
        let mut discovered = Vec::new();

        for project_dir in sorted_entries(&base)?.into_iter().filter(|p| p.is_dir()) {
            let files = match sorted_entries(&project_dir) {
                Ok(files) => files,
                Err(e) => {
                    tracing::debug!("Skipping project {}: {}", project_dir.display(), e);
                    continue;
                }
            };
            discovered.push(project_dir);

            for path in files {
                if !path.is_file() || !is_session_file(&path, self.config.include_agents) {
                    continue;
                }
                report.files += 1;
                if self.index_file(&path) {
                    report.sessions += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }

        report.directories = discovered.len();
        *self
            .project_dirs
            .write()
            .unwrap_or_else(PoisonError::into_inner) = discovered;

        tracing::info!(
            "Scanned {}: {} sessions from {} files in {} projects ({} skipped)",
            base.display(),
            report.sessions,
            report.files,
            report.directories,
            report.skipped
        );

        if report.sessions > 0 {
            self.notifier.notify();
        }
        Ok(report)
    }

    fn index_file(&self, path: &Path) -> bool {
        match parse_session_file(path, self.parser.as_ref(), self.config.limits.max_line_bytes) {
            Ok(session) => self.index.put(session),
            Err(e) => {
                tracing::debug!("Skipping {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Start the file watcher for the project directories found by `scan`
    pub async fn start_watching(&self) -> Result<()> {
        if !self.config.watcher.enabled {
            tracing::info!("File watching disabled by configuration");
            return Ok(());
        }

        let dirs = self
            .project_dirs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if dirs.is_empty() {
            tracing::warn!("No project directories to watch; run a scan first");
        }

        let reparser = Arc::new(SessionReparser::new(
            Arc::clone(&self.index),
            Arc::clone(&self.parser),
            self.config.limits.max_line_bytes,
        ));
        let handle = watcher::start_watcher(
            &dirs,
            reparser,
            self.config.watcher.debounce(),
            self.config.include_agents,
            self.notifier.clone(),
        )
        .await?;

        if let Some(previous) = self.watcher_handle.write().await.replace(handle) {
            previous.stop().await?;
        }
        Ok(())
    }

    /// Stop the file watcher
    pub async fn stop_watching(&self) -> Result<()> {
        if let Some(handle) = self.watcher_handle.write().await.take() {
            handle.stop().await?;
        }
        Ok(())
    }

    /// Stream yielding once per index change (coalesced)
    pub fn subscribe(&self) -> impl Stream<Item = ()> + Send + Unpin + 'static {
        self.notifier.subscribe()
    }

    /// All session summaries, most recently active first
    pub fn list(&self) -> Vec<SessionSummary> {
        self.index.list()
    }

    /// `list()` optionally restricted to one project name or path
    pub fn list_filtered(&self, project: Option<&str>) -> Vec<SessionSummary> {
        match project {
            Some(project) => self.index.list_for_project(project),
            None => self.index.list(),
        }
    }

    /// Get one full session by id
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.index.get(session_id)
    }

    /// Get one full session by id, or a not-found error
    pub fn session(&self, session_id: &str) -> Result<Arc<Session>> {
        self.get(session_id)
            .ok_or_else(|| CoreError::NotFound("Session", session_id.to_string()))
    }

    /// Get a reference to the session index
    pub fn index(&self) -> &Arc<SessionIndex> {
        &self.index
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    paths.sort();
    Ok(paths)
}
