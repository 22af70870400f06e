//! Domain entities
//!
//! This module contains the core domain types for the telemetry pipeline:
//! - Telemetry items and their typed payloads
//! - Metric data points
//! - Context sections and the owning `TelemetryContext`
//! - Persistence priority classes
//! - The raw crash report model and its converted, sendable form
//! - Domain-specific error types

pub mod context;
pub mod crash_data;
pub mod crash_report;
pub mod data_point;
pub mod errors;
pub mod item;
pub mod ordered_map;
pub mod persistence_type;

// Re-export commonly used types
pub use context::{
    ApplicationContext, ContextSnapshot, DeviceContext, InternalContext, LocationContext,
    OperationContext, SessionContext, TelemetryContext, UserContext,
};
pub use crash_data::{
    BinaryImageType, CrashData, CrashDataBinary, CrashDataHeaders, CrashDataThread,
    CrashDataThreadFrame, UNKNOWN,
};
pub use crash_report::{
    ApplicationInfo, BinaryImage, CrashReport, ExceptionInfo, HandledException, MachineInfo,
    ProcessInfo, ProcessorInfo, RegisterInfo, SignalInfo, StackFrame, SymbolInfo, SystemInfo,
    ThreadInfo,
};
pub use data_point::{DataPoint, DataPointType};
pub use errors::DomainError;
pub use item::{
    EventData, ExceptionData, MessageData, MetricData, PageViewData, SeverityLevel, TelemetryData,
    TelemetryItem, TelemetryKind,
};
pub use ordered_map::OrderedMap;
pub use persistence_type::PersistenceType;
