//! Bundle persistence port (driven/secondary port)
//!
//! The channel hands finished bundles to an implementation of this trait
//! and never touches the disk itself.
//!
//! ## Design Notes
//!
//! - Submission is non-blocking. The outcome arrives later through the
//!   completion callback, which is invoked exactly once.
//! - I/O failures and capacity refusals are reported as `false`; nothing
//!   is propagated as an error across this boundary.

use crate::domain::{PersistenceType, TelemetryItem};

/// Callback receiving the outcome of a bundle save.
pub type CompletionCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Durable storage for bundles of telemetry items.
pub trait BundlePersistence: Send + Sync {
    /// Submits `items` as one bundle of the given priority class.
    ///
    /// `on_complete` receives `true` once the bundle is on disk.
    fn persist_bundle(
        &self,
        items: Vec<TelemetryItem>,
        persistence_type: PersistenceType,
        on_complete: Option<CompletionCallback>,
    );

    /// Stages a crash-equivalent bundle without notifying the sender.
    fn persist_fake_report_bundle(&self, items: Vec<TelemetryItem>);

    /// Whether another bundle would currently fit under the file cap.
    fn is_free_space_available(&self) -> bool;
}
