//! Telemetry items
//!
//! A `TelemetryItem` is the unit the channel queues and persistence
//! writes: an envelope carrying one typed payload plus the context tags
//! that were current when it was flushed. Items are immutable once built;
//! the `with_*` methods consume and return a new value.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::crash_data::CrashData;
use super::data_point::DataPoint;
use super::errors::DomainError;
use super::ordered_map::OrderedMap;

/// Envelope schema version written into every item.
pub const ENVELOPE_VERSION: u32 = 1;

/// Default sampling rate (percent of items kept).
pub const DEFAULT_SAMPLE_RATE: f64 = 100.0;

// ============================================================================
// Payloads
// ============================================================================

/// Kind of payload carried by an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    Event,
    Message,
    Metric,
    PageView,
    Exception,
    Crash,
}

impl TelemetryKind {
    /// Envelope name used when the producer does not supply one.
    pub fn envelope_name(&self) -> &'static str {
        match self {
            TelemetryKind::Event => "Microsoft.ApplicationInsights.Event",
            TelemetryKind::Message => "Microsoft.ApplicationInsights.Message",
            TelemetryKind::Metric => "Microsoft.ApplicationInsights.Metric",
            TelemetryKind::PageView => "Microsoft.ApplicationInsights.PageView",
            TelemetryKind::Exception => "Microsoft.ApplicationInsights.Exception",
            TelemetryKind::Crash => "Microsoft.ApplicationInsights.Crash",
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TelemetryKind::Event => "event",
            TelemetryKind::Message => "message",
            TelemetryKind::Metric => "metric",
            TelemetryKind::PageView => "page_view",
            TelemetryKind::Exception => "exception",
            TelemetryKind::Crash => "crash",
        };
        write!(f, "{}", s)
    }
}

/// Severity of a trace message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
}

/// A named custom event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub name: String,
    #[serde(default)]
    pub properties: OrderedMap,
    #[serde(default)]
    pub measurements: BTreeMap<String, f64>,
}

/// A trace message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    pub message: String,
    pub severity_level: Option<SeverityLevel>,
    #[serde(default)]
    pub properties: OrderedMap,
}

/// One or more metric data points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub metrics: Vec<DataPoint>,
    #[serde(default)]
    pub properties: OrderedMap,
}

/// A screen or page shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageViewData {
    pub name: String,
    pub url: Option<String>,
    /// Display duration in milliseconds
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub properties: OrderedMap,
}

/// A handled exception reported without a crash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionData {
    pub type_name: String,
    pub message: String,
    pub stack: Option<String>,
    pub severity_level: Option<SeverityLevel>,
    #[serde(default)]
    pub properties: OrderedMap,
}

/// Typed payload of a telemetry item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "base_type", content = "base_data", rename_all = "snake_case")]
pub enum TelemetryData {
    Event(EventData),
    Message(MessageData),
    Metric(MetricData),
    PageView(PageViewData),
    Exception(ExceptionData),
    Crash(Box<CrashData>),
}

impl TelemetryData {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            TelemetryData::Event(_) => TelemetryKind::Event,
            TelemetryData::Message(_) => TelemetryKind::Message,
            TelemetryData::Metric(_) => TelemetryKind::Metric,
            TelemetryData::PageView(_) => TelemetryKind::PageView,
            TelemetryData::Exception(_) => TelemetryKind::Exception,
            TelemetryData::Crash(_) => TelemetryKind::Crash,
        }
    }

    /// Convenience constructor for a bare event.
    pub fn event(name: impl Into<String>) -> Self {
        TelemetryData::Event(EventData {
            name: name.into(),
            properties: OrderedMap::new(),
            measurements: BTreeMap::new(),
        })
    }

    /// Convenience constructor for a trace message.
    pub fn message(message: impl Into<String>, severity_level: Option<SeverityLevel>) -> Self {
        TelemetryData::Message(MessageData {
            message: message.into(),
            severity_level,
            properties: OrderedMap::new(),
        })
    }

    /// Convenience constructor for a single-point metric.
    pub fn metric(point: DataPoint) -> Self {
        TelemetryData::Metric(MetricData {
            metrics: vec![point],
            properties: OrderedMap::new(),
        })
    }
}

// ============================================================================
// TelemetryItem
// ============================================================================

/// A single telemetry envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryItem {
    version: u32,
    name: String,
    time: DateTime<Utc>,
    sample_rate: f64,
    instrumentation_key: Option<String>,
    #[serde(default)]
    tags: Arc<OrderedMap>,
    data: TelemetryData,
}

impl TelemetryItem {
    /// Wraps `data` in an envelope timestamped now, with no context tags.
    pub fn new(data: TelemetryData) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            name: data.kind().envelope_name().to_string(),
            time: Utc::now(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            instrumentation_key: None,
            tags: Arc::new(OrderedMap::new()),
            data,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn with_instrumentation_key(mut self, key: impl Into<String>) -> Self {
        self.instrumentation_key = Some(key.into());
        self
    }

    /// Attaches a shared context tag dictionary.
    pub fn with_tags(mut self, tags: Arc<OrderedMap>) -> Self {
        self.tags = tags;
        self
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TelemetryKind {
        self.data.kind()
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn instrumentation_key(&self) -> Option<&str> {
        self.instrumentation_key.as_deref()
    }

    pub fn tags(&self) -> &Arc<OrderedMap> {
        &self.tags
    }

    /// Whether context tags have already been attached.
    pub fn has_context(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn data(&self) -> &TelemetryData {
        &self.data
    }

    /// Checks that every number in the item has a durable representation.
    ///
    /// JSON has no NaN or infinity, so such a value would be written as
    /// `null` and the bundle could not be read back.
    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.sample_rate.is_finite() {
            return Err(DomainError::NonFiniteValue(format!(
                "sample_rate = {}",
                self.sample_rate
            )));
        }
        if let TelemetryData::Event(event) = &self.data {
            if let Some((key, value)) = event.measurements.iter().find(|(_, v)| !v.is_finite()) {
                return Err(DomainError::NonFiniteValue(format!(
                    "{}.measurements.{key} = {value}",
                    event.name
                )));
            }
        }
        Ok(())
    }

    /// The crash payload, when this is a crash item.
    pub fn crash_data(&self) -> Option<&CrashData> {
        match &self.data {
            TelemetryData::Crash(crash) => Some(crash.as_ref()),
            _ => None,
        }
    }
}
