//! AppInsights Core - Domain types, configuration and ports
//!
//! This crate contains the pieces every other pipeline crate shares:
//! - **Domain types** - `TelemetryItem`, `DataPoint`, `TelemetryContext`,
//!   `PersistenceType`, the raw `CrashReport` and converted `CrashData`
//! - **Configuration** - typed YAML configuration with validation and a builder
//! - **Ports** - `BundlePersistence`, the interface the channel persists through
//!
//! Nothing in this crate performs background work or owns a runtime.

pub mod config;
pub mod domain;
pub mod ports;
