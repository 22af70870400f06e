//! Raw crash report model
//!
//! This is the structure handed over by the crash capture collaborator:
//! process and system metadata, every thread's stack, the loaded binary
//! images, and the fault (signal and/or uncaught exception) that ended
//! the process. Any part of it may be missing when the report was
//! truncated, so nearly every field is optional.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ordered_map::OrderedMap;

/// A raw crash report as captured at the moment of the crash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrashReport {
    pub uuid: Option<Uuid>,
    pub timestamp: Option<DateTime<Utc>>,
    pub system_info: Option<SystemInfo>,
    pub machine_info: Option<MachineInfo>,
    pub application_info: Option<ApplicationInfo>,
    pub process_info: Option<ProcessInfo>,
    pub signal_info: Option<SignalInfo>,
    pub exception_info: Option<ExceptionInfo>,
    #[serde(default)]
    pub threads: Vec<ThreadInfo>,
    #[serde(default)]
    pub images: Vec<BinaryImage>,
}

impl CrashReport {
    /// The thread flagged as crashed, if any.
    pub fn crashed_thread(&self) -> Option<&ThreadInfo> {
        self.threads.iter().find(|t| t.crashed)
    }

    /// The loaded image whose address range contains `address`.
    pub fn image_for_address(&self, address: u64) -> Option<&BinaryImage> {
        self.images.iter().find(|image| image.contains(address))
    }
}

/// Operating system the crash happened on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub os_build: Option<String>,
    /// Free-form architecture name, e.g. `x86_64` or `arm64`.
    pub architecture: Option<String>,
}

/// Hardware the crash happened on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub model: Option<String>,
    pub processor: Option<ProcessorInfo>,
}

/// Mach-style CPU type and subtype pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorInfo {
    pub cpu_type: u64,
    pub cpu_subtype: u64,
}

/// The application that crashed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub identifier: Option<String>,
    pub version: Option<String>,
    pub short_version: Option<String>,
}

/// The crashed process and its parent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: Option<String>,
    pub id: Option<u32>,
    pub path: Option<String>,
    pub parent_name: Option<String>,
    pub parent_id: Option<u32>,
    pub native: bool,
}

/// The signal that terminated the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalInfo {
    pub name: String,
    pub code: String,
    pub address: u64,
}

/// An uncaught language-level exception recorded with the crash
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub name: Option<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub stack_frames: Vec<StackFrame>,
}

/// One thread's state at crash time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub number: u32,
    pub crashed: bool,
    #[serde(default)]
    pub stack_frames: Vec<StackFrame>,
    /// Register file, only captured for the crashed thread.
    #[serde(default)]
    pub registers: Vec<RegisterInfo>,
}

/// A single return address on a stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    pub instruction_pointer: u64,
    pub symbol: Option<SymbolInfo>,
}

impl StackFrame {
    pub fn new(instruction_pointer: u64) -> Self {
        Self {
            instruction_pointer,
            symbol: None,
        }
    }

    pub fn with_symbol(mut self, name: impl Into<String>, start_address: u64) -> Self {
        self.symbol = Some(SymbolInfo {
            name: Some(name.into()),
            start_address,
        });
        self
    }
}

/// Symbol resolved on the device for a stack frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: Option<String>,
    pub start_address: u64,
}

/// A named register value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInfo {
    pub name: String,
    pub value: u64,
}

/// A binary image mapped into the crashed process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryImage {
    pub base_address: u64,
    pub size: u64,
    pub path: Option<String>,
    pub uuid: Option<String>,
    pub code_type: Option<ProcessorInfo>,
}

impl BinaryImage {
    /// Whether `address` falls inside this image's mapping.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base_address && address - self.base_address < self.size
    }
}

/// An exception the application caught and reported itself.
///
/// When attached to a crash report it supplies the human-readable fault
/// description while the native fault data stays in the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandledException {
    pub name: String,
    pub reason: String,
    #[serde(default)]
    pub user_info: OrderedMap,
}

impl HandledException {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
            user_info: OrderedMap::new(),
        }
    }

    pub fn with_user_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_info.insert(key, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(base: u64, size: u64, path: &str) -> BinaryImage {
        BinaryImage {
            base_address: base,
            size,
            path: Some(path.to_string()),
            uuid: None,
            code_type: None,
        }
    }

    #[test]
    fn test_image_contains() {
        let img = image(0x1000, 0x100, "/usr/lib/libc.so");
        assert!(img.contains(0x1000));
        assert!(img.contains(0x10ff));
        assert!(!img.contains(0x1100));
        assert!(!img.contains(0x0fff));
    }

    #[test]
    fn test_image_for_address() {
        let report = CrashReport {
            images: vec![image(0x1000, 0x100, "/a"), image(0x2000, 0x100, "/b")],
            ..Default::default()
        };
        assert_eq!(
            report.image_for_address(0x2010).and_then(|i| i.path.as_deref()),
            Some("/b")
        );
        assert!(report.image_for_address(0x3000).is_none());
    }

    #[test]
    fn test_crashed_thread() {
        let report = CrashReport {
            threads: vec![
                ThreadInfo {
                    number: 0,
                    ..Default::default()
                },
                ThreadInfo {
                    number: 3,
                    crashed: true,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(report.crashed_thread().map(|t| t.number), Some(3));
    }

    #[test]
    fn test_handled_exception_builder() {
        let exc = HandledException::new("IOError", "disk gone").with_user_info("path", "/tmp/x");
        assert_eq!(exc.user_info.get("path"), Some("/tmp/x"));
    }
}
