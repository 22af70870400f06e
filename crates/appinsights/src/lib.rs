//! AppInsights - client-side telemetry and crash reporting
//!
//! Telemetry items are batched by the [`Channel`], written to disk as
//! bundles by [`Persistence`] and picked up from there by a sender.
//! Crashes and handled exceptions are converted by the
//! [`CrashDataProvider`] and stored as high-priority bundles.
//!
//! [`Pipeline`] assembles all of it from a [`Config`]:
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use appinsights::{ApplicationContext, Config, Pipeline};
//!
//! let pipeline = Pipeline::start(Config::default(), ApplicationContext::default())?;
//! pipeline.track_event("app_started");
//! pipeline.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod pipeline;

pub use appinsights_channel::{Channel, LifecycleEvent};
pub use appinsights_core::config::Config;
pub use appinsights_core::domain::{
    ApplicationContext, HandledException, PersistenceType, TelemetryContext, TelemetryData,
    TelemetryItem,
};
pub use appinsights_crash::{CrashDataProvider, CrashReporter};
pub use appinsights_persistence::{Persistence, PersistenceEvent};
pub use pipeline::Pipeline;
