//! Port definitions
//!
//! Traits at the seams between pipeline components. The channel depends
//! on [`BundlePersistence`]; the persistence crate implements it.

pub mod bundle_persistence;

pub use bundle_persistence::{BundlePersistence, CompletionCallback};
