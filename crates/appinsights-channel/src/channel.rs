//! In-memory telemetry queue
//!
//! Producers append items with [`Channel::enqueue`]; the queue is handed to
//! persistence as one bundle when it reaches `max_batch_count`, when the
//! flush timer fires, on a lifecycle transition, or when
//! [`Channel::persist_data_item_queue`] is called directly.
//!
//! Batches are handed to persistence while the queue lock is held, so once
//! any flush returns, every item queued before it has reached persistence.
//! A [`BundlePersistence`] implementation must therefore not call back into
//! the channel from `persist_bundle` or its completion callback.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use appinsights_core::config::ChannelConfig;
use appinsights_core::domain::{PersistenceType, TelemetryContext, TelemetryItem};
use appinsights_core::ports::{BundlePersistence, CompletionCallback};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Application lifecycle transitions that force a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The application moved to the background.
    Background,
    /// The application is about to exit.
    Terminate,
}

/// Batches telemetry items and submits them to persistence.
pub struct Channel {
    queue: Mutex<Vec<TelemetryItem>>,
    persistence: Arc<dyn BundlePersistence>,
    context: Arc<TelemetryContext>,
    config: ChannelConfig,
}

impl Channel {
    pub fn new(
        persistence: Arc<dyn BundlePersistence>,
        context: Arc<TelemetryContext>,
        config: ChannelConfig,
    ) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            persistence,
            context,
            config,
        }
    }

    fn queue(&self) -> MutexGuard<'_, Vec<TelemetryItem>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of items waiting for the next flush.
    pub fn queued_count(&self) -> usize {
        self.queue().len()
    }

    /// Appends `item` to the queue.
    ///
    /// When the queue reaches `max_batch_count` it is submitted as a regular
    /// bundle. Submission never blocks on disk.
    pub fn enqueue(&self, item: TelemetryItem) {
        let mut queue = self.queue();
        queue.push(item);
        if queue.len() >= self.config.max_batch_count {
            let items = mem::take(&mut *queue);
            debug!(items = items.len(), "Batch threshold reached");
            self.submit(items, PersistenceType::Regular, None);
        }
    }

    /// Submits everything queued so far as one regular bundle.
    ///
    /// Returns `false` without touching persistence if the queue was empty.
    pub fn persist_data_item_queue(&self) -> bool {
        self.persist_data_item_queue_with(PersistenceType::Regular, None)
    }

    /// Like [`persist_data_item_queue`](Self::persist_data_item_queue) with an
    /// explicit priority class and completion callback.
    ///
    /// The callback is not invoked when the queue was empty.
    pub fn persist_data_item_queue_with(
        &self,
        persistence_type: PersistenceType,
        on_complete: Option<CompletionCallback>,
    ) -> bool {
        let mut queue = self.queue();
        let items = mem::take(&mut *queue);
        if items.is_empty() {
            return false;
        }
        self.submit(items, persistence_type, on_complete);
        true
    }

    /// Persists a crash item as its own high-priority bundle, ahead of
    /// anything still queued.
    pub fn process_crash(&self, item: TelemetryItem, on_complete: Option<CompletionCallback>) {
        debug!(kind = %item.kind(), "Persisting crash item");
        self.submit(vec![item], PersistenceType::HighPriority, on_complete);
    }

    /// Stages a crash-equivalent item without making it sendable.
    pub fn persist_fake_report(&self, item: TelemetryItem) {
        let items = vec![self.stamp(item)];
        self.persistence.persist_fake_report_bundle(items);
    }

    /// Flushes on backgrounding and termination.
    pub fn on_lifecycle_event(&self, event: LifecycleEvent) {
        let flushed = self.persist_data_item_queue();
        debug!(?event, flushed, "Lifecycle flush");
    }

    /// Flushes the queue every `batch_interval` until `shutdown` is cancelled,
    /// then flushes one last time.
    pub async fn run_flush_timer(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.batch_interval().max(MIN_FLUSH_INTERVAL);
        info!(interval_secs = period.as_secs(), "Starting flush timer");

        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; nothing is queued yet
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.persist_data_item_queue() {
                        debug!("Timer flush");
                    }
                }
                _ = shutdown.cancelled() => {
                    self.persist_data_item_queue();
                    info!("Flush timer stopped");
                    break;
                }
            }
        }
    }

    fn submit(
        &self,
        items: Vec<TelemetryItem>,
        persistence_type: PersistenceType,
        on_complete: Option<CompletionCallback>,
    ) {
        let items: Vec<TelemetryItem> = items.into_iter().map(|item| self.stamp(item)).collect();
        debug!(
            items = items.len(),
            persistence_type = %persistence_type,
            "Submitting bundle"
        );
        self.persistence
            .persist_bundle(items, persistence_type, on_complete);
    }

    /// Attaches the shared context to an item that has none yet.
    fn stamp(&self, mut item: TelemetryItem) -> TelemetryItem {
        if !item.has_context() {
            item = item.with_tags(self.context.tags());
        }
        if item.instrumentation_key().is_none() {
            if let Some(key) = self.context.instrumentation_key() {
                item = item.with_instrumentation_key(key);
            }
        }
        item
    }
}
