//! Per-file debounce timers keyed by path.
//!
//! A file is `Idle` until a write arrives, then `PendingDebounce` until the
//! window passes with no further writes, then `Reparsing` until the caller
//! reports it finished. Each write while pending pushes the deadline out, so
//! a burst of writes collapses into a single re-parse.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Idle,
    PendingDebounce { deadline: Instant },
    Reparsing,
}

/// Single timer wheel for all watched files
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    files: HashMap<PathBuf, FileState>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            files: HashMap::new(),
        }
    }

    pub fn state(&self, path: &Path) -> FileState {
        self.files.get(path).copied().unwrap_or(FileState::Idle)
    }

    /// Record a write notification, (re)starting the file's window
    pub fn touch(&mut self, path: PathBuf, now: Instant) {
        let deadline = now + self.window;
        self.files
            .insert(path, FileState::PendingDebounce { deadline });
    }

    /// Earliest pending deadline, if any file is waiting
    pub fn next_deadline(&self) -> Option<Instant> {
        self.files
            .values()
            .filter_map(|state| match state {
                FileState::PendingDebounce { deadline } => Some(*deadline),
                _ => None,
            })
            .min()
    }

    /// Move every file whose window has elapsed into `Reparsing`.
    ///
    /// Returned in path order so batches are processed deterministically.
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(_, state)| {
                matches!(state, FileState::PendingDebounce { deadline } if *deadline <= now)
            })
            .map(|(path, _)| path.clone())
            .collect();
        due.sort();

        for path in &due {
            self.files.insert(path.clone(), FileState::Reparsing);
        }
        due
    }

    /// Re-parse finished; back to `Idle` unless a new write arrived meanwhile
    pub fn finish(&mut self, path: &Path) {
        if self.files.get(path) == Some(&FileState::Reparsing) {
            self.files.remove(path);
        }
    }

    /// Number of files not currently idle
    pub fn active(&self) -> usize {
        self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    #[test]
    fn test_burst_collapses_into_one_reparse() {
        let mut debouncer = Debouncer::new(WINDOW);
        let path = PathBuf::from("/p/s.jsonl");
        let t0 = Instant::now();

        for i in 0..5 {
            debouncer.touch(path.clone(), t0 + Duration::from_millis(i * 20));
        }
        assert_eq!(debouncer.next_deadline(), Some(t0 + Duration::from_millis(580)));

        // Nothing is due until the last write's window elapses
        assert!(debouncer.take_due(t0 + Duration::from_millis(579)).is_empty());

        let due = debouncer.take_due(t0 + Duration::from_millis(580));
        assert_eq!(due, vec![path.clone()]);
        assert_eq!(debouncer.state(&path), FileState::Reparsing);
        assert!(debouncer.take_due(t0 + Duration::from_secs(10)).is_empty());

        debouncer.finish(&path);
        assert_eq!(debouncer.state(&path), FileState::Idle);
        assert_eq!(debouncer.active(), 0);
    }

    #[test]
    fn test_files_have_independent_timers() {
        let mut debouncer = Debouncer::new(WINDOW);
        let a = PathBuf::from("/p/a.jsonl");
        let b = PathBuf::from("/p/b.jsonl");
        let t0 = Instant::now();

        debouncer.touch(a.clone(), t0);
        debouncer.touch(b.clone(), t0 + Duration::from_millis(300));

        assert_eq!(debouncer.take_due(t0 + WINDOW), vec![a.clone()]);
        assert!(matches!(
            debouncer.state(&b),
            FileState::PendingDebounce { .. }
        ));
        assert_eq!(
            debouncer.take_due(t0 + Duration::from_millis(800)),
            vec![b]
        );
    }

    #[test]
    fn test_write_during_reparse_schedules_another() {
        let mut debouncer = Debouncer::new(WINDOW);
        let path = PathBuf::from("/p/s.jsonl");
        let t0 = Instant::now();

        debouncer.touch(path.clone(), t0);
        debouncer.take_due(t0 + WINDOW);
        debouncer.touch(path.clone(), t0 + Duration::from_millis(600));
        debouncer.finish(&path);

        assert!(matches!(
            debouncer.state(&path),
            FileState::PendingDebounce { .. }
        ));
        assert_eq!(debouncer.take_due(t0 + Duration::from_millis(1100)), vec![path]);
    }

    #[test]
    fn test_idle_has_no_deadline() {
        let debouncer = Debouncer::new(WINDOW);
        assert!(debouncer.next_deadline().is_none());
        assert_eq!(debouncer.state(Path::new("/x")), FileState::Idle);
    }
}
