//! Crash report conversion
//!
//! Turns a raw [`CrashReport`] into a telemetry item carrying [`CrashData`].
//! Conversion is pure and never fails: anything missing from the report is
//! written as [`UNKNOWN`].
//!
//! ## Fault description
//!
//! | field               | source, first present wins                                |
//! |---------------------|-----------------------------------------------------------|
//! | `exception_type`    | handled exception name, report exception name, signal name |
//! | `exception_reason`  | handled exception reason, report exception reason          |
//! | `exception_code`    | signal code                                                |
//! | `exception_address` | signal address                                             |
//!
//! The signal fields are always kept so the native fault can still be
//! attributed when a handled exception supplies the description.

use std::path::Path;

use appinsights_core::config::CrashConfig;
use appinsights_core::domain::{
    BinaryImage, BinaryImageType, CrashData, CrashDataBinary, CrashDataHeaders, CrashDataThread,
    CrashDataThreadFrame, CrashReport, HandledException, OrderedMap, StackFrame, TelemetryData,
    TelemetryItem, UNKNOWN,
};

use crate::anonymizer::Anonymizer;
use crate::arch;
use crate::image;

/// Thread id used for the backtrace of an uncaught language exception.
pub const EXCEPTION_THREAD_ID: i64 = -1;

/// Converts raw crash reports into sendable telemetry.
#[derive(Debug, Clone, Copy)]
pub struct CrashDataProvider {
    anonymizer: Anonymizer,
}

impl Default for CrashDataProvider {
    fn default() -> Self {
        Self::new(&CrashConfig::default())
    }
}

impl CrashDataProvider {
    pub fn new(config: &CrashConfig) -> Self {
        Self {
            anonymizer: Anonymizer::new(config.anonymize_paths),
        }
    }

    /// Converts `report` into a crash telemetry item.
    pub fn crash_data_for_crash_report(&self, report: &CrashReport) -> TelemetryItem {
        self.crash_data_for_crash_report_with_exception(report, None)
    }

    /// Converts `report`, letting `exception` supply the fault description.
    pub fn crash_data_for_crash_report_with_exception(
        &self,
        report: &CrashReport,
        exception: Option<&HandledException>,
    ) -> TelemetryItem {
        let data = self.crash_data(report, exception);
        let item = TelemetryItem::new(TelemetryData::Crash(Box::new(data)));
        match report.timestamp {
            Some(time) => item.with_time(time),
            None => item,
        }
    }

    /// Classifies an image path against the process path.
    pub fn image_type_for_image_path(image_path: &str, process_path: &str) -> BinaryImageType {
        image::image_type_for_image_path(image_path, process_path)
    }

    /// Builds the crash payload without wrapping it in an item.
    pub fn crash_data(
        &self,
        report: &CrashReport,
        exception: Option<&HandledException>,
    ) -> CrashData {
        let wide = pointer_is_64_bit(report);
        CrashData {
            headers: self.headers(report, exception, wide),
            threads: threads(report, wide),
            binaries: self.binaries(report, wide),
        }
    }

    fn headers(
        &self,
        report: &CrashReport,
        exception: Option<&HandledException>,
        wide: bool,
    ) -> CrashDataHeaders {
        let process = report.process_info.as_ref();
        let application = report.application_info.as_ref();
        let signal = report.signal_info.as_ref();
        let report_exception = report.exception_info.as_ref();

        let exception_type = exception
            .map(|e| e.name.clone())
            .or_else(|| report_exception.and_then(|e| e.name.clone()))
            .or_else(|| signal.map(|s| s.name.clone()))
            .unwrap_or_else(unknown);
        let exception_reason = exception
            .map(|e| e.reason.clone())
            .or_else(|| report_exception.and_then(|e| e.reason.clone()));

        CrashDataHeaders {
            id: report.uuid.map(|u| u.to_string()).unwrap_or_else(unknown),
            process: process.and_then(|p| p.name.clone()).unwrap_or_else(unknown),
            process_id: process.and_then(|p| p.id),
            parent_process: process
                .and_then(|p| p.parent_name.clone())
                .unwrap_or_else(unknown),
            parent_process_id: process.and_then(|p| p.parent_id),
            crash_thread: report.crashed_thread().map(|t| t.number),
            application_path: process
                .and_then(|p| p.path.as_deref())
                .map(|path| self.anonymizer.anonymize(path))
                .unwrap_or_else(unknown),
            application_identifier: application
                .and_then(|a| a.identifier.clone())
                .unwrap_or_else(unknown),
            application_build: application
                .and_then(|a| a.version.clone())
                .unwrap_or_else(unknown),
            exception_type,
            exception_code: signal.map(|s| s.code.clone()).unwrap_or_else(unknown),
            exception_address: signal
                .map(|s| arch::format_address(s.address, wide))
                .unwrap_or_else(unknown),
            exception_reason,
            exception_user_info: exception
                .map(|e| e.user_info.clone())
                .unwrap_or_default(),
            handled: exception.is_some(),
        }
    }

    fn binaries(&self, report: &CrashReport, wide: bool) -> Vec<CrashDataBinary> {
        let process_path = report
            .process_info
            .as_ref()
            .and_then(|p| p.path.as_deref())
            .unwrap_or_default();

        report
            .images
            .iter()
            .map(|img| {
                let raw_path = img.path.as_deref().unwrap_or_default();
                CrashDataBinary {
                    start_address: arch::format_address(img.base_address, wide),
                    end_address: arch::format_address(
                        img.base_address
                            .saturating_add(img.size.saturating_sub(1)),
                        wide,
                    ),
                    name: image_name(img),
                    path: img
                        .path
                        .as_deref()
                        .map(|p| self.anonymizer.anonymize(p))
                        .unwrap_or_else(unknown),
                    uuid: img.uuid.clone().unwrap_or_else(unknown),
                    cpu_type: img.code_type.map(|c| c.cpu_type),
                    cpu_sub_type: img.code_type.map(|c| c.cpu_subtype),
                    architecture: img
                        .code_type
                        .and_then(arch::architecture_name)
                        .map(str::to_string)
                        .unwrap_or_else(unknown),
                    image_type: image::image_type_for_image_path(raw_path, process_path),
                }
            })
            .collect()
    }
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

/// Pointer width of the crashed process. Falls back to the architecture
/// string, then to 64-bit.
fn pointer_is_64_bit(report: &CrashReport) -> bool {
    if let Some(processor) = report.machine_info.as_ref().and_then(|m| m.processor) {
        return arch::is_64_bit(processor);
    }
    match report
        .system_info
        .as_ref()
        .and_then(|s| s.architecture.as_deref())
    {
        Some(name) => name.contains("64"),
        None => true,
    }
}

fn image_name(image: &BinaryImage) -> String {
    image
        .path
        .as_deref()
        .and_then(|p| Path::new(p).file_name())
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(unknown)
}

fn threads(report: &CrashReport, wide: bool) -> Vec<CrashDataThread> {
    let mut threads = Vec::with_capacity(report.threads.len() + 1);

    if let Some(exception) = report
        .exception_info
        .as_ref()
        .filter(|e| !e.stack_frames.is_empty())
    {
        threads.push(CrashDataThread {
            id: EXCEPTION_THREAD_ID,
            frames: exception
                .stack_frames
                .iter()
                .map(|frame| convert_frame(report, frame, OrderedMap::new(), wide))
                .collect(),
        });
    }

    for thread in &report.threads {
        let frames = thread
            .stack_frames
            .iter()
            .enumerate()
            .map(|(index, frame)| {
                // Registers describe the faulting frame only.
                let registers = if thread.crashed && index == 0 {
                    thread
                        .registers
                        .iter()
                        .map(|r| (r.name.clone(), arch::format_address(r.value, wide)))
                        .collect::<OrderedMap>()
                } else {
                    OrderedMap::new()
                };
                convert_frame(report, frame, registers, wide)
            })
            .collect();

        threads.push(CrashDataThread {
            id: i64::from(thread.number),
            frames,
        });
    }

    threads
}

fn convert_frame(
    report: &CrashReport,
    frame: &StackFrame,
    registers: OrderedMap,
    wide: bool,
) -> CrashDataThreadFrame {
    let symbol = frame
        .symbol
        .as_ref()
        .and_then(|s| s.name.clone())
        .unwrap_or_else(unknown);
    let image = report
        .image_for_address(frame.instruction_pointer)
        .map(image_name)
        .unwrap_or_else(unknown);

    CrashDataThreadFrame {
        address: arch::format_address(frame.instruction_pointer, wide),
        symbol,
        image,
        registers,
    }
}
