//! In-memory session index.
//!
//! Maps session id to the latest fully parsed `Session`. Sessions are
//! immutable and shared via `Arc`: a re-parse builds a new value and swaps it
//! in under the write lock, so readers holding the old one keep a frozen
//! snapshot and never observe a half-written session.

use crate::parser::{Session, SessionSummary};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Thread-safe session store with point lookup and snapshot listing
#[derive(Default)]
pub struct SessionIndex {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for this session's id.
    ///
    /// Sessions with no events are not worth showing and are rejected;
    /// any previous entry for the id is left in place. Returns whether the
    /// session was stored.
    pub fn put(&self, session: Session) -> bool {
        if session.is_empty() {
            return false;
        }
        let id = session.id().to_string();
        let session = Arc::new(session);

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, session);
        true
    }

    /// Get a single session by ID
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// All session summaries, most recently active first.
    ///
    /// Ties on last update are broken by id so the order is stable.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut result: Vec<SessionSummary> = {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            sessions.values().map(|s| s.summary.clone()).collect()
        };
        result.sort_by(|a, b| {
            b.last_update
                .cmp(&a.last_update)
                .then_with(|| a.id.cmp(&b.id))
        });
        result
    }

    /// `list()` restricted to one project, matched by name or decoded path
    pub fn list_for_project(&self, project: &str) -> Vec<SessionSummary> {
        self.list()
            .into_iter()
            .filter(|s| s.matches_project(project))
            .collect()
    }

    /// Count indexed sessions
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
