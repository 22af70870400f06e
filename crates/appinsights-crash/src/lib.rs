//! AppInsights Crash - crash report conversion and capture
//!
//! - [`CrashDataProvider`] turns a raw crash report, optionally paired
//!   with a handled exception, into a sendable crash telemetry item
//! - [`image_type_for_image_path`] classifies loaded images for
//!   stack-frame attribution
//! - [`CrashReporter`] captures panics and handled exceptions for the
//!   running process

pub mod anonymizer;
pub mod arch;
pub mod capture;
pub mod image;
pub mod provider;

pub use anonymizer::{anonymize_path, Anonymizer};
pub use capture::{current_thread_frames, live_report, CrashReporter};
pub use image::image_type_for_image_path;
pub use provider::{CrashDataProvider, EXCEPTION_THREAD_ID};
