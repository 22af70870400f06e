//! AppInsights Persistence - durable bundle storage
//!
//! Stores bundles of telemetry items on disk until the sender has delivered
//! them:
//! - One directory per priority class, one JSON file per bundle
//! - A hard cap on the number of files on disk
//! - High-priority bundles are handed out before regular ones
//! - Staged "fake" crash reports that never reach the sender directly
//!
//! ## Architecture
//!
//! This crate implements the `BundlePersistence` port from
//! `appinsights-core`. All writes pass through a single
//! [`PersistenceWriter`] task; reads are synchronous and meant for the
//! sender's background thread.
//!
//! ## Key Components
//!
//! - [`Persistence`] - the manager and its public surface
//! - [`PersistenceWriter`] - background writer task
//! - [`BundleStore`] - directory layout and atomic file writes
//! - [`PersistenceMetrics`] - prometheus counters for persisted and dropped bundles
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::PathBuf;
//! use appinsights_core::config::PersistenceConfig;
//! use appinsights_persistence::Persistence;
//!
//! # async fn example() {
//! let config = PersistenceConfig {
//!     directory: PathBuf::from("/home/user/.local/share/appinsights/bundles"),
//!     max_file_count: 50,
//! };
//! let persistence = Persistence::spawn(&config);
//!
//! // On the sender's thread
//! if let Some(path) = persistence.next_path() {
//!     let _items = persistence.bundle_at_path(&path);
//!     persistence.delete_bundle_at_path(&path);
//! }
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod store;

pub use error::PersistenceError;
pub use manager::{Persistence, PersistenceEvent, PersistenceWriter};
pub use metrics::PersistenceMetrics;
pub use store::{BundleEntry, BundleStore};
