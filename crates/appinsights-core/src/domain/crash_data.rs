//! Sendable crash payload
//!
//! `CrashData` is the portable form of a crash report carried inside a
//! telemetry item. Fields that could not be resolved from the raw report
//! hold [`UNKNOWN`] instead of being dropped.

use serde::{Deserialize, Serialize};

use super::ordered_map::OrderedMap;

/// Sentinel for values missing from a truncated or malformed report.
pub const UNKNOWN: &str = "unknown";

/// Which code an image belongs to, for stack-frame attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryImageType {
    /// The main executable
    AppBinary,
    /// A framework or library shipped inside the application bundle
    AppFramework,
    /// System or third-party code
    Other,
}

impl BinaryImageType {
    /// Whether frames in this image are owned by the application.
    pub fn is_app_owned(&self) -> bool {
        matches!(self, BinaryImageType::AppBinary | BinaryImageType::AppFramework)
    }
}

/// Converted crash report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashData {
    pub headers: CrashDataHeaders,
    pub threads: Vec<CrashDataThread>,
    pub binaries: Vec<CrashDataBinary>,
}

/// Process, application and fault metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashDataHeaders {
    pub id: String,
    pub process: String,
    pub process_id: Option<u32>,
    pub parent_process: String,
    pub parent_process_id: Option<u32>,
    pub crash_thread: Option<u32>,
    pub application_path: String,
    pub application_identifier: String,
    pub application_build: String,
    pub exception_type: String,
    pub exception_code: String,
    pub exception_address: String,
    pub exception_reason: Option<String>,
    /// Context supplied with a handled exception
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub exception_user_info: OrderedMap,
    /// Whether the fault description came from an exception the app handled.
    pub handled: bool,
}

/// One thread with its normalized frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashDataThread {
    pub id: i64,
    pub frames: Vec<CrashDataThreadFrame>,
}

/// A normalized stack frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashDataThreadFrame {
    /// Zero-padded hex instruction pointer
    pub address: String,
    pub symbol: String,
    /// Name of the image containing `address`, or [`UNKNOWN`]
    pub image: String,
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub registers: OrderedMap,
}

/// A loaded binary image with its classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashDataBinary {
    pub start_address: String,
    pub end_address: String,
    pub name: String,
    pub path: String,
    pub uuid: String,
    pub cpu_type: Option<u64>,
    pub cpu_sub_type: Option<u64>,
    pub architecture: String,
    pub image_type: BinaryImageType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_owned() {
        assert!(BinaryImageType::AppBinary.is_app_owned());
        assert!(BinaryImageType::AppFramework.is_app_owned());
        assert!(!BinaryImageType::Other.is_app_owned());
    }

    #[test]
    fn test_image_type_serialization() {
        let json = serde_json::to_string(&BinaryImageType::AppFramework).unwrap();
        assert_eq!(json, "\"app_framework\"");
    }
}
