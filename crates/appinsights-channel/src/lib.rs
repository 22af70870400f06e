//! AppInsights Channel - in-memory batching
//!
//! Collects telemetry items from any thread and hands them to a
//! [`BundlePersistence`](appinsights_core::ports::BundlePersistence)
//! implementation in bundles. The channel never touches the disk.

pub mod channel;

pub use channel::{Channel, LifecycleEvent};
