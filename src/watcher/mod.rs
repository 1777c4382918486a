//! File watcher module for monitoring session file changes
//!
//! Watches the project directories found by the initial scan, debounces
//! bursts of writes per file, re-parses the file once it goes quiet and swaps
//! the new session into the index. Subscribers get a coalesced "something
//! changed" signal.

pub mod debounce;

use crate::error::Result;
use crate::index::SessionIndex;
use crate::parser::{is_session_file, parse_session_file, SessionParser};
use debounce::Debouncer;
use futures::Stream;
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

/// Coalescing change signal shared by the watcher and its subscribers.
///
/// Backed by a watch channel: any number of notifications between two reads
/// by a subscriber show up as a single pending change.
#[derive(Clone)]
pub struct Notifier {
    tx: Arc<watch::Sender<u64>>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Notifier { tx: Arc::new(tx) }
    }

    /// Publish a change; never blocks
    pub fn notify(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }

    /// Raw receiver, for callers that want `changed()`/`has_changed()`
    pub fn receiver(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Stream yielding `()` for each observed change
    pub fn subscribe(&self) -> impl Stream<Item = ()> + Send + Unpin + 'static {
        WatchStream::from_changes(self.tx.subscribe()).map(|_| ())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Work performed when a file's debounce window elapses
pub trait ReparseHandler: Send + Sync + 'static {
    /// Returns true if the index changed
    fn reparse(&self, path: &Path) -> bool;
}

/// Re-parses a transcript and swaps the result into the index
pub struct SessionReparser {
    index: Arc<SessionIndex>,
    parser: Arc<dyn SessionParser>,
    max_line_bytes: usize,
}

impl SessionReparser {
    pub fn new(index: Arc<SessionIndex>, parser: Arc<dyn SessionParser>, max_line_bytes: usize) -> Self {
        SessionReparser {
            index,
            parser,
            max_line_bytes,
        }
    }
}

impl ReparseHandler for SessionReparser {
    fn reparse(&self, path: &Path) -> bool {
        let session = match parse_session_file(path, self.parser.as_ref(), self.max_line_bytes) {
            Ok(session) => session,
            Err(e) => {
                // Retried naturally on the next write
                tracing::debug!("Re-parse of {} failed: {}", path.display(), e);
                return false;
            }
        };

        let session_id = session.id().to_string();
        let event_count = session.events.len();
        if self.index.put(session) {
            tracing::debug!("Re-parsed session {}: {} events", session_id, event_count);
            true
        } else {
            tracing::debug!("Re-parse of {} produced no events, keeping previous", session_id);
            false
        }
    }
}

/// Handle for controlling the file watcher
pub struct WatcherHandle {
    /// Shutdown signal sender
    shutdown_tx: mpsc::Sender<()>,
}

impl WatcherHandle {
    /// Stop the file watcher
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown_tx.send(()).await;
        Ok(())
    }
}

/// Start watching the given project directories for transcript writes
pub async fn start_watcher<H: ReparseHandler>(
    dirs: &[PathBuf],
    handler: Arc<H>,
    debounce: Duration,
    include_agents: bool,
    notifier: Notifier,
) -> Result<WatcherHandle> {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let (change_tx, change_rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if !is_write(&event.kind) {
                    return;
                }
                for path in event.paths {
                    if is_session_file(&path, include_agents) {
                        let _ = change_tx.send(path);
                    }
                }
            }
            Err(e) => tracing::warn!("File watcher error: {}", e),
        },
        notify::Config::default(),
    )?;

    let mut registered = 0usize;
    for dir in dirs {
        match watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => registered += 1,
            Err(e) => tracing::warn!("Failed to watch directory {}: {}", dir.display(), e),
        }
    }

    tracing::info!(
        "File watcher started: {} of {} project directories",
        registered,
        dirs.len()
    );

    tokio::spawn(run_watch_loop(change_rx, handler, debounce, notifier));

    // Spawn shutdown handler
    tokio::spawn(async move {
        let _ = shutdown_rx.recv().await;
        // Dropping the watcher closes the change channel, which ends the loop
        drop(watcher);
        tracing::info!("File watcher stopped");
    });

    Ok(WatcherHandle { shutdown_tx })
}

fn is_write(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any)
    )
}

/// Drive debounce timers from a stream of changed paths.
///
/// Re-parses run on the blocking pool, one at a time, and the loop waits for
/// each before taking the next. Returns once the change source is closed;
/// pending timers are dropped.
pub async fn run_watch_loop<H: ReparseHandler>(
    mut changes: mpsc::UnboundedReceiver<PathBuf>,
    handler: Arc<H>,
    window: Duration,
    notifier: Notifier,
) {
    let mut debouncer = Debouncer::new(window);

    loop {
        let deadline = debouncer.next_deadline();

        tokio::select! {
            change = changes.recv() => {
                match change {
                    Some(path) => debouncer.touch(path, Instant::now()),
                    None => break,
                }
            }
            _ = wait_until(deadline) => {
                for path in debouncer.take_due(Instant::now()) {
                    let changed = reparse_blocking(&handler, &path).await;
                    debouncer.finish(&path);
                    if changed {
                        notifier.notify();
                    }
                }
            }
        }
    }

    tracing::debug!(
        "Watch loop ended with {} files pending",
        debouncer.active()
    );
}

/// Run a re-parse in spawn_blocking; file reads and parsing are synchronous
async fn reparse_blocking<H: ReparseHandler>(handler: &Arc<H>, path: &Path) -> bool {
    let handler = Arc::clone(handler);
    let owned = path.to_path_buf();
    match tokio::task::spawn_blocking(move || handler.reparse(&owned)).await {
        Ok(changed) => changed,
        Err(e) => {
            tracing::warn!("Re-parse task for {} failed: {}", path.display(), e);
            false
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingHandler {
        calls: Mutex<HashMap<PathBuf, usize>>,
        succeed: bool,
    }

    impl CountingHandler {
        fn succeeding() -> Self {
            CountingHandler {
                calls: Mutex::new(HashMap::new()),
                succeed: true,
            }
        }

        fn count(&self, path: &Path) -> usize {
            self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
        }
    }

    impl ReparseHandler for CountingHandler {
        fn reparse(&self, path: &Path) -> bool {
            *self.calls.lock().unwrap().entry(path.to_path_buf()).or_default() += 1;
            self.succeed
        }
    }

    const WINDOW: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn test_burst_triggers_one_reparse_and_one_notification() {
        crate::logging::init_test();
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(CountingHandler::succeeding());
        let notifier = Notifier::new();
        let mut changes = notifier.receiver();
        let task = tokio::spawn(run_watch_loop(rx, Arc::clone(&handler), WINDOW, notifier.clone()));

        let path = PathBuf::from("/p/-a/s.jsonl");
        for _ in 0..5 {
            tx.send(path.clone()).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(handler.count(&path), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handler.count(&path), 1);
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();
        assert!(!changes.has_changed().unwrap());

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_coalesce_until_consumed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(CountingHandler::succeeding());
        let notifier = Notifier::new();
        let mut changes = notifier.receiver();
        let task = tokio::spawn(run_watch_loop(rx, Arc::clone(&handler), WINDOW, notifier.clone()));

        let a = PathBuf::from("/p/-a/a.jsonl");
        let b = PathBuf::from("/p/-a/b.jsonl");
        tx.send(a.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        tx.send(b.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(handler.count(&a), 1);
        assert_eq!(handler.count(&b), 1);
        // Two re-parses, one pending signal
        assert_eq!(*changes.borrow_and_update(), 2);
        assert!(!changes.has_changed().unwrap());

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reparse_does_not_notify() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(CountingHandler::default());
        let notifier = Notifier::new();
        let changes = notifier.receiver();
        let task = tokio::spawn(run_watch_loop(rx, Arc::clone(&handler), WINDOW, notifier.clone()));

        let path = PathBuf::from("/p/-a/s.jsonl");
        tx.send(path.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handler.count(&path), 1);
        assert!(!changes.has_changed().unwrap());

        // The next write is the retry
        tx.send(path.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handler.count(&path), 2);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_with_pending_timer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(CountingHandler::succeeding());
        let task = tokio::spawn(run_watch_loop(rx, Arc::clone(&handler), WINDOW, Notifier::new()));

        let path = PathBuf::from("/p/-a/s.jsonl");
        tx.send(path.clone()).unwrap();
        tokio::task::yield_now().await;
        drop(tx);

        task.await.unwrap();
        assert_eq!(handler.count(&path), 0);
    }

    struct GatedHandler {
        started: tokio::sync::Notify,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl ReparseHandler for GatedHandler {
        fn reparse(&self, _path: &Path) -> bool {
            self.started.notify_one();
            self.release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .is_ok()
        }
    }

    #[tokio::test]
    async fn test_reparse_runs_off_the_runtime_thread() {
        crate::logging::init_test();
        let (tx, rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let handler = Arc::new(GatedHandler {
            started: tokio::sync::Notify::new(),
            release: Mutex::new(release_rx),
        });
        let notifier = Notifier::new();
        let mut changes = notifier.receiver();
        let task = tokio::spawn(run_watch_loop(
            rx,
            Arc::clone(&handler),
            Duration::from_millis(10),
            notifier.clone(),
        ));

        tx.send(PathBuf::from("/p/-a/big.jsonl")).unwrap();

        // Single-threaded runtime: this only proceeds if the re-parse is
        // not occupying the runtime thread
        tokio::time::timeout(Duration::from_secs(5), handler.started.notified())
            .await
            .unwrap();
        assert!(!changes.has_changed().unwrap());

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), changes.changed())
            .await
            .unwrap()
            .unwrap();

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_stream_yields_on_change() {
        let notifier = Notifier::new();
        let mut updates = notifier.subscribe();

        notifier.notify();
        notifier.notify();
        let next = tokio::time::timeout(Duration::from_secs(1), updates.next()).await;
        assert_eq!(next.unwrap(), Some(()));

        let idle = tokio::time::timeout(Duration::from_millis(50), updates.next()).await;
        assert!(idle.is_err());
    }

    #[test]
    fn test_reparser_keeps_previous_on_empty_file() {
        use crate::parser::ClaudeCodeParser;

        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("-w-app");
        std::fs::create_dir(&project).unwrap();
        let path = project.join("s1.jsonl");
        std::fs::write(
            &path,
            r#"{"type":"user","uuid":"u","timestamp":"2025-03-01T10:00:00Z","message":{"content":"hello"}}"#,
        )
        .unwrap();

        let index = Arc::new(SessionIndex::new());
        let reparser = SessionReparser::new(
            Arc::clone(&index),
            Arc::new(ClaudeCodeParser::default()),
            1 << 20,
        );
        assert!(reparser.reparse(&path));
        assert_eq!(index.get("s1").unwrap().events.len(), 1);

        // Mid-write truncation: file momentarily holds nothing usable
        std::fs::write(&path, "{\"type\":\"us").unwrap();
        assert!(!reparser.reparse(&path));
        assert_eq!(index.get("s1").unwrap().events.len(), 1);

        std::fs::remove_file(&path).unwrap();
        assert!(!reparser.reparse(&path));
        assert!(index.get("s1").is_some());
    }

    #[test]
    fn test_is_write() {
        use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
        assert!(is_write(&EventKind::Create(CreateKind::File)));
        assert!(is_write(&EventKind::Modify(ModifyKind::Data(DataChange::Any))));
        assert!(!is_write(&EventKind::Access(AccessKind::Any)));
        assert!(!is_write(&EventKind::Remove(RemoveKind::File)));
    }
}
