//! Persistence manager
//!
//! Owns the [`BundleStore`], enforces the on-disk file cap and decides which
//! bundle the sender sees next.
//!
//! ## Writes
//!
//! `persist_bundle` never touches the disk on the caller's thread. Requests
//! are queued to a [`PersistenceWriter`] task which handles them one at a
//! time on the blocking pool:
//!
//! ```text
//! ┌──────────┐  WriteRequest  ┌───────────────────┐  spawn_blocking  ┌─────────────┐
//! │ Channel  │ ─────────────► │ PersistenceWriter │ ───────────────► │ BundleStore │
//! └──────────┘                └───────────────────┘                  └─────────────┘
//!                                      │
//!                                      ├─► on_complete(bool)
//!                                      └─► PersistenceEvent::BundleSaved
//! ```
//!
//! The count check and the file creation happen under one lock, shared with
//! `persist_bundle_blocking`, so two writers can never both see the last
//! free slot.
//!
//! ## Reads
//!
//! `next_path`, `bundle_at_path`, `delete_bundle_at_path` and
//! `fake_report_bundle` do blocking I/O and belong on a background thread.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use appinsights_core::config::PersistenceConfig;
use appinsights_core::domain::{PersistenceType, TelemetryItem};
use appinsights_core::ports::{BundlePersistence, CompletionCallback};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::error::{PersistenceError, Result};
use crate::metrics::PersistenceMetrics;
use crate::store::BundleStore;

const EVENT_CAPACITY: usize = 64;

// ============================================================================
// Events
// ============================================================================

/// Delivery-readiness notifications published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceEvent {
    /// A sendable bundle is on disk.
    BundleSaved {
        path: PathBuf,
        persistence_type: PersistenceType,
    },
}

// ============================================================================
// Shared state
// ============================================================================

struct WriteRequest {
    items: Vec<TelemetryItem>,
    persistence_type: PersistenceType,
    on_complete: Option<CompletionCallback>,
}

struct Inner {
    store: BundleStore,
    max_file_count: AtomicUsize,
    write_lock: Mutex<()>,
    requested: Mutex<HashSet<PathBuf>>,
    events: broadcast::Sender<PersistenceEvent>,
    dropped: AtomicU64,
    metrics: Option<Arc<PersistenceMetrics>>,
}

impl Inner {
    fn requested(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.requested.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encodes and writes one bundle, honouring the file cap.
    fn write_bundle(
        &self,
        items: &[TelemetryItem],
        persistence_type: PersistenceType,
    ) -> Result<PathBuf> {
        let bytes = codec::encode(items)?;

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = self.store.count_all()?;
        let max = self.max_file_count.load(Ordering::SeqCst);
        if count >= max {
            return Err(PersistenceError::CapacityExceeded { count, max });
        }
        Ok(self.store.write(persistence_type, &bytes)?)
    }

    /// Writes a bundle and does the bookkeeping for the outcome.
    fn save(&self, items: &[TelemetryItem], persistence_type: PersistenceType) -> bool {
        match self.write_bundle(items, persistence_type) {
            Ok(path) => {
                debug!(
                    path = %path.display(),
                    persistence_type = %persistence_type,
                    items = items.len(),
                    "Bundle persisted"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_persisted(persistence_type.as_str(), items.len());
                }
                if persistence_type.notifies_sender() {
                    // No subscribers is fine; the sender can still poll next_path.
                    let _ = self.events.send(PersistenceEvent::BundleSaved {
                        path,
                        persistence_type,
                    });
                }
                true
            }
            Err(PersistenceError::CapacityExceeded { count, max }) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_dropped("capacity");
                }
                warn!(
                    count,
                    max,
                    persistence_type = %persistence_type,
                    items = items.len(),
                    "Bundle cap reached, dropping bundle"
                );
                false
            }
            Err(e @ PersistenceError::Encode(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_dropped("invalid");
                }
                warn!(
                    error = %e,
                    persistence_type = %persistence_type,
                    items = items.len(),
                    "Bundle cannot be encoded, dropping bundle"
                );
                false
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_dropped("io");
                }
                error!(
                    error = %e,
                    persistence_type = %persistence_type,
                    "Failed to persist bundle"
                );
                false
            }
        }
    }

    /// Removes a corrupt bundle so it cannot block the queue.
    fn discard_corrupt(&self, path: &Path, err: &PersistenceError) {
        warn!(path = %path.display(), error = %err, "Discarding corrupt bundle");
        if let Some(metrics) = &self.metrics {
            metrics.record_corrupt();
        }
        if let Err(e) = self.store.delete(path) {
            warn!(path = %path.display(), error = %e, "Failed to delete corrupt bundle");
        }
        self.requested().remove(path);
    }

    fn ensure_in_store(&self, path: &Path) -> Result<()> {
        if self.store.contains(path) {
            Ok(())
        } else {
            Err(PersistenceError::OutsideStore(path.to_path_buf()))
        }
    }

    fn load(&self, path: &Path) -> Result<Vec<TelemetryItem>> {
        let bytes = self.store.read(path)?;
        codec::decode(&bytes)
    }
}

/// Runs a completion callback off the caller's thread.
///
/// Falls back to the caller's thread only if no thread can be spawned, so
/// the callback still runs exactly once.
fn complete_detached(on_complete: CompletionCallback, success: bool) {
    let slot = Arc::new(Mutex::new(Some(on_complete)));
    let detached = Arc::clone(&slot);
    let spawned = std::thread::Builder::new()
        .name("appinsights-complete".to_string())
        .spawn(move || {
            let callback = detached.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(callback) = callback {
                callback(success);
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Failed to spawn completion thread, completing inline");
        let callback = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(callback) = callback {
            callback(success);
        }
    }
}

#[cfg(debug_assertions)]
fn warn_if_main_thread(operation: &'static str) {
    if std::thread::current().name() == Some("main") {
        warn!(operation, "Blocking persistence call made from the main thread");
    }
}

#[cfg(not(debug_assertions))]
fn warn_if_main_thread(_operation: &'static str) {}

// ============================================================================
// Persistence
// ============================================================================

/// Durable, priority-ordered, size-bounded bundle storage.
///
/// Cheap to clone; clones share the same store, cap and writer.
#[derive(Clone)]
pub struct Persistence {
    inner: Arc<Inner>,
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl Persistence {
    /// Creates the manager and its writer.
    ///
    /// The caller must spawn the writer by calling [`PersistenceWriter::run`];
    /// until it runs, submitted bundles wait in the queue.
    pub fn new(config: &PersistenceConfig) -> (Self, PersistenceWriter) {
        let store = BundleStore::new(config.directory.clone());
        match store.remove_stale_temp_files() {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed interrupted bundle writes"),
            Err(e) => warn!(error = %e, "Failed to scan for interrupted bundle writes"),
        }

        let metrics = match PersistenceMetrics::new() {
            Ok(metrics) => Some(Arc::new(metrics)),
            Err(e) => {
                warn!(error = %e, "Persistence metrics unavailable");
                None
            }
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            store,
            max_file_count: AtomicUsize::new(config.max_file_count),
            write_lock: Mutex::new(()),
            requested: Mutex::new(HashSet::new()),
            events,
            dropped: AtomicU64::new(0),
            metrics,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = PersistenceWriter {
            rx,
            inner: Arc::clone(&inner),
        };

        (Self { inner, tx }, writer)
    }

    /// Creates the manager and spawns its writer on the current runtime.
    pub fn spawn(config: &PersistenceConfig) -> Self {
        let (persistence, writer) = Self::new(config);
        tokio::spawn(writer.run());
        persistence
    }

    /// Subscribes to delivery-readiness notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PersistenceEvent> {
        self.inner.events.subscribe()
    }

    /// Root directory of the bundle store.
    pub fn directory(&self) -> &Path {
        self.inner.store.root()
    }

    /// Queues `items` to be written as one bundle.
    ///
    /// `on_complete` is invoked exactly once with the outcome. If the writer
    /// has already shut down it is invoked with `false` from a separate thread.
    pub fn persist_bundle(
        &self,
        items: Vec<TelemetryItem>,
        persistence_type: PersistenceType,
        on_complete: Option<CompletionCallback>,
    ) {
        let request = WriteRequest {
            items,
            persistence_type,
            on_complete,
        };
        if let Err(mpsc::error::SendError(request)) = self.tx.send(request) {
            warn!(
                persistence_type = %persistence_type,
                "Persistence writer has stopped, dropping bundle"
            );
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            if let Some(on_complete) = request.on_complete {
                complete_detached(on_complete, false);
            }
        }
    }

    /// Writes a bundle on the calling thread.
    ///
    /// For contexts that cannot wait on the writer task, such as a panic
    /// hook. Shares the writer's lock, so the file cap still holds.
    pub fn persist_bundle_blocking(
        &self,
        items: Vec<TelemetryItem>,
        persistence_type: PersistenceType,
    ) -> bool {
        self.inner.save(&items, persistence_type)
    }

    /// Stages a crash-equivalent bundle. Never notifies subscribers.
    pub fn persist_fake_report_bundle(&self, items: Vec<TelemetryItem>) {
        self.persist_bundle(items, PersistenceType::FakeCrash, None);
    }

    /// Whether the number of bundles on disk is below the cap.
    pub fn is_free_space_available(&self) -> bool {
        match self.inner.store.count_all() {
            Ok(count) => count < self.max_file_count(),
            Err(e) => {
                warn!(error = %e, "Failed to count bundles");
                false
            }
        }
    }

    /// Changes the cap for subsequent writes.
    pub fn set_max_file_count(&self, max_file_count: usize) {
        self.inner
            .max_file_count
            .store(max_file_count, Ordering::SeqCst);
        debug!(max_file_count, "Bundle cap updated");
    }

    pub fn max_file_count(&self) -> usize {
        self.inner.max_file_count.load(Ordering::SeqCst)
    }

    /// Number of bundles refused or lost since startup.
    pub fn dropped_bundle_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> Option<&Arc<PersistenceMetrics>> {
        self.inner.metrics.as_ref()
    }

    /// Path of the next bundle to send, or `None` when nothing is pending.
    ///
    /// Every high-priority bundle is returned before any regular one; within
    /// a class the oldest comes first. A returned path is not returned again
    /// until it is deleted or handed back with
    /// [`give_back_requested_path`](Self::give_back_requested_path).
    pub fn next_path(&self) -> Option<PathBuf> {
        warn_if_main_thread("next_path");

        for persistence_type in PersistenceType::SENDABLE {
            let entries = match self.inner.store.list(persistence_type) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        persistence_type = %persistence_type,
                        error = %e,
                        "Failed to list bundles"
                    );
                    continue;
                }
            };

            let mut requested = self.inner.requested();
            if let Some(entry) = entries
                .into_iter()
                .find(|entry| !requested.contains(&entry.path))
            {
                requested.insert(entry.path.clone());
                return Some(entry.path);
            }
        }
        None
    }

    /// Makes a path returned by `next_path` available again, e.g. after a
    /// failed send.
    pub fn give_back_requested_path(&self, path: &Path) {
        self.inner.requested().remove(path);
    }

    /// Items stored at `path`, in their original order.
    ///
    /// Returns `None` if the file is missing or unreadable. A corrupt file
    /// is deleted.
    pub fn bundle_at_path(&self, path: &Path) -> Option<Vec<TelemetryItem>> {
        warn_if_main_thread("bundle_at_path");

        if let Err(e) = self.inner.ensure_in_store(path) {
            warn!(error = %e, "Refusing to read bundle");
            return None;
        }

        match self.inner.load(path) {
            Ok(items) => Some(items),
            Err(PersistenceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Bundle no longer exists");
                self.inner.requested().remove(path);
                None
            }
            Err(e) if e.is_corruption() => {
                self.inner.discard_corrupt(path, &e);
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read bundle");
                None
            }
        }
    }

    /// Deletes the bundle at `path`. Deleting a missing bundle does nothing.
    pub fn delete_bundle_at_path(&self, path: &Path) {
        warn_if_main_thread("delete_bundle_at_path");

        if let Err(e) = self.inner.ensure_in_store(path) {
            warn!(error = %e, "Refusing to delete bundle");
            return;
        }

        match self.inner.store.delete(path) {
            Ok(true) => {
                debug!(path = %path.display(), "Bundle deleted");
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_deleted();
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete bundle");
                return;
            }
        }
        self.inner.requested().remove(path);
    }

    /// Takes one staged fake report bundle off disk.
    ///
    /// The bundle is deleted as it is returned, so it is handed out at most
    /// once. Corrupt staged bundles are discarded along the way.
    pub fn fake_report_bundle(&self) -> Option<Vec<TelemetryItem>> {
        warn_if_main_thread("fake_report_bundle");

        let entries = match self.inner.store.list(PersistenceType::FakeCrash) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list fake report bundles");
                return None;
            }
        };

        for entry in entries {
            match self.inner.load(&entry.path) {
                Ok(items) => {
                    if let Err(e) = self.inner.store.delete(&entry.path) {
                        // Handing it out again later would duplicate the report.
                        warn!(path = %entry.path.display(), error = %e, "Failed to remove fake report bundle");
                        continue;
                    }
                    return Some(items);
                }
                Err(PersistenceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) if e.is_corruption() => self.inner.discard_corrupt(&entry.path, &e),
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Failed to read fake report bundle");
                }
            }
        }
        None
    }

    /// Turns every staged fake report into a high-priority bundle.
    ///
    /// Bundles are moved, not rewritten, so the file count is unchanged and
    /// a bundle that cannot be moved stays staged for the next attempt.
    /// Empty and corrupt staged bundles are removed. Returns the number of
    /// bundles promoted.
    pub fn promote_fake_reports(&self) -> usize {
        warn_if_main_thread("promote_fake_reports");

        let entries = match self.inner.store.list(PersistenceType::FakeCrash) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list fake report bundles");
                return 0;
            }
        };

        let mut promoted = 0;
        for entry in entries {
            let items = match self.inner.load(&entry.path) {
                Ok(items) => items.len(),
                Err(PersistenceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) if e.is_corruption() => {
                    self.inner.discard_corrupt(&entry.path, &e);
                    continue;
                }
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Failed to read fake report bundle");
                    continue;
                }
            };
            if items == 0 {
                let _ = self.inner.store.delete(&entry.path);
                continue;
            }

            let moved = {
                let _guard = self
                    .inner
                    .write_lock
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                self.inner
                    .store
                    .relocate(&entry.path, PersistenceType::HighPriority)
            };
            match moved {
                Ok(path) => {
                    debug!(path = %path.display(), items, "Fake report promoted");
                    if let Some(metrics) = &self.inner.metrics {
                        metrics.record_persisted(PersistenceType::HighPriority.as_str(), items);
                    }
                    let _ = self.inner.events.send(PersistenceEvent::BundleSaved {
                        path,
                        persistence_type: PersistenceType::HighPriority,
                    });
                    promoted += 1;
                }
                Err(e) => {
                    warn!(
                        path = %entry.path.display(),
                        error = %e,
                        "Failed to promote fake report, keeping it staged"
                    );
                }
            }
        }
        promoted
    }
}

impl BundlePersistence for Persistence {
    fn persist_bundle(
        &self,
        items: Vec<TelemetryItem>,
        persistence_type: PersistenceType,
        on_complete: Option<CompletionCallback>,
    ) {
        Persistence::persist_bundle(self, items, persistence_type, on_complete);
    }

    fn persist_fake_report_bundle(&self, items: Vec<TelemetryItem>) {
        Persistence::persist_fake_report_bundle(self, items);
    }

    fn is_free_space_available(&self) -> bool {
        Persistence::is_free_space_available(self)
    }
}

// ============================================================================
// PersistenceWriter
// ============================================================================

/// Background task that performs queued bundle writes one at a time.
///
/// Runs until every [`Persistence`] handle has been dropped, after draining
/// whatever was already queued.
pub struct PersistenceWriter {
    rx: mpsc::UnboundedReceiver<WriteRequest>,
    inner: Arc<Inner>,
}

impl PersistenceWriter {
    pub async fn run(mut self) {
        info!(directory = %self.inner.store.root().display(), "Persistence writer started");

        while let Some(request) = self.rx.recv().await {
            self.process(request).await;
        }

        info!("Persistence writer stopped (all handles dropped)");
    }

    async fn process(&self, request: WriteRequest) {
        let WriteRequest {
            items,
            persistence_type,
            on_complete,
        } = request;

        let inner = Arc::clone(&self.inner);
        let success =
            match tokio::task::spawn_blocking(move || inner.save(&items, persistence_type)).await {
                Ok(success) => success,
                Err(e) => {
                    error!(error = %e, "Bundle write task failed");
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    false
                }
            };

        if let Some(on_complete) = on_complete {
            on_complete(success);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appinsights_core::domain::TelemetryData;
    use tokio::sync::oneshot;

    fn config(dir: &Path, max_file_count: usize) -> PersistenceConfig {
        PersistenceConfig {
            directory: dir.to_path_buf(),
            max_file_count,
        }
    }

    fn bundle(name: &str) -> Vec<TelemetryItem> {
        vec![TelemetryItem::new(TelemetryData::event(name))]
    }

    async fn persist(
        persistence: &Persistence,
        items: Vec<TelemetryItem>,
        ty: PersistenceType,
    ) -> bool {
        let (tx, rx) = oneshot::channel();
        persistence.persist_bundle(
            items,
            ty,
            Some(Box::new(move |ok| {
                let _ = tx.send(ok);
            })),
        );
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_persist_publishes_event() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Persistence::spawn(&config(dir.path(), 10));
        let mut events = persistence.subscribe();

        assert!(persist(&persistence, bundle("a"), PersistenceType::Regular).await);

        let PersistenceEvent::BundleSaved {
            path,
            persistence_type,
        } = events.recv().await.unwrap();
        assert_eq!(persistence_type, PersistenceType::Regular);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_writer_stopped_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (persistence, writer) = Persistence::new(&config(dir.path(), 10));
        drop(writer);

        let caller = std::thread::current().id();
        let (tx, rx) = std::sync::mpsc::channel();
        persistence.persist_bundle(
            bundle("lost"),
            PersistenceType::Regular,
            Some(Box::new(move |ok| {
                tx.send((ok, std::thread::current().id())).unwrap();
            })),
        );
        let (ok, completed_on) = rx.recv().unwrap();
        assert!(!ok);
        assert_ne!(completed_on, caller);
        assert!(rx.recv().is_err(), "callback must run exactly once");
        assert_eq!(persistence.dropped_bundle_count(), 1);
    }

    #[test]
    fn test_blocking_persist_respects_cap() {
        let dir = tempfile::tempdir().unwrap();
        let (persistence, _writer) = Persistence::new(&config(dir.path(), 1));

        assert!(persistence.persist_bundle_blocking(bundle("a"), PersistenceType::HighPriority));
        assert!(!persistence.persist_bundle_blocking(bundle("b"), PersistenceType::HighPriority));
        assert_eq!(persistence.dropped_bundle_count(), 1);
        assert_eq!(persistence.metrics().unwrap().dropped("capacity"), 1);
    }

    #[test]
    fn test_next_path_skips_requested_until_given_back() {
        let dir = tempfile::tempdir().unwrap();
        let (persistence, _writer) = Persistence::new(&config(dir.path(), 10));
        persistence.persist_bundle_blocking(bundle("a"), PersistenceType::Regular);

        let first = persistence.next_path().unwrap();
        assert!(persistence.next_path().is_none());

        persistence.give_back_requested_path(&first);
        assert_eq!(persistence.next_path(), Some(first));
    }

    #[test]
    fn test_outside_paths_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::NamedTempFile::new().unwrap();
        let (persistence, _writer) = Persistence::new(&config(dir.path(), 10));

        assert!(matches!(
            persistence.inner.ensure_in_store(other.path()),
            Err(PersistenceError::OutsideStore(ref p)) if p == other.path()
        ));
        assert!(persistence.bundle_at_path(other.path()).is_none());
        persistence.delete_bundle_at_path(other.path());
        assert!(other.path().exists());
    }

    #[test]
    fn test_set_max_file_count() {
        let dir = tempfile::tempdir().unwrap();
        let (persistence, _writer) = Persistence::new(&config(dir.path(), 50));
        persistence.set_max_file_count(0);
        assert_eq!(persistence.max_file_count(), 0);
        assert!(!persistence.is_free_space_available());
    }
}
