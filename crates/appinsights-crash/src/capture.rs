//! Crash capture
//!
//! Builds raw [`CrashReport`]s for the running process and routes the
//! converted telemetry:
//!
//! - a panic becomes a high-priority bundle, written synchronously from
//!   the panic hook since the writer task may never run again
//! - a handled exception is staged as a fake report and promoted to a
//!   sendable bundle by [`CrashReporter::send_pending_fake_reports`]
//!
//! Loaded images are read from `/proc/self/maps`. The calling thread's
//! stack is unwound and symbolized on the device; other threads are not
//! recorded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use appinsights_channel::Channel;
use appinsights_core::config::CrashConfig;
use appinsights_core::domain::{
    ApplicationInfo, BinaryImage, CrashReport, ExceptionInfo, HandledException, MachineInfo,
    PersistenceType, ProcessInfo, SignalInfo, StackFrame, SystemInfo, TelemetryContext,
    TelemetryItem, ThreadInfo,
};
use appinsights_persistence::Persistence;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::arch;
use crate::provider::CrashDataProvider;

const PANIC_EXCEPTION_NAME: &str = "panic";

// ============================================================================
// Live reports
// ============================================================================

/// One mapping from `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapsEntry {
    pub start: u64,
    pub end: u64,
    pub path: String,
}

/// Parses a maps line backed by a file. Anonymous and pseudo mappings
/// (`[heap]`, `[vdso]`, ...) are skipped.
pub fn parse_maps_line(line: &str) -> Option<MapsEntry> {
    let mut parts = line.split_whitespace();
    let addr_range = parts.next()?;
    let _perms = parts.next()?;
    let _offset = parts.next()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    let path = parts.next()?;
    if !path.starts_with('/') {
        return None;
    }

    let (start_str, end_str) = addr_range.split_once('-')?;
    let start = u64::from_str_radix(start_str, 16).ok()?;
    let end = u64::from_str_radix(end_str, 16).ok()?;

    Some(MapsEntry {
        start,
        end,
        path: path.to_string(),
    })
}

/// Merges the mappings of each file into one image spanning all of them,
/// in order of first appearance.
pub fn images_from_maps(maps: &str) -> Vec<BinaryImage> {
    let code_type = arch::host_processor();
    let mut images: Vec<BinaryImage> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in maps.lines().filter_map(parse_maps_line) {
        match index.get(&entry.path) {
            Some(&i) => {
                let image = &mut images[i];
                let end = (image.base_address + image.size).max(entry.end);
                image.base_address = image.base_address.min(entry.start);
                image.size = end - image.base_address;
            }
            None => {
                index.insert(entry.path.clone(), images.len());
                images.push(BinaryImage {
                    base_address: entry.start,
                    size: entry.end.saturating_sub(entry.start),
                    path: Some(entry.path),
                    uuid: None,
                    code_type,
                });
            }
        }
    }
    images
}

fn loaded_images() -> Vec<BinaryImage> {
    match std::fs::read_to_string("/proc/self/maps") {
        Ok(maps) => images_from_maps(&maps),
        Err(e) => {
            debug!(error = %e, "Loaded images unavailable");
            Vec::new()
        }
    }
}

/// Frames of the calling thread, innermost first.
///
/// Frames inside the unwinder itself are dropped.
pub fn current_thread_frames() -> Vec<StackFrame> {
    let backtrace = backtrace::Backtrace::new();
    backtrace
        .frames()
        .iter()
        .map(|frame| {
            let instruction_pointer = frame.ip() as usize as u64;
            let symbol = frame.symbols().first().and_then(|symbol| {
                let name = symbol.name()?.to_string();
                let start = symbol
                    .addr()
                    .map(|addr| addr as usize as u64)
                    .unwrap_or(frame.symbol_address() as usize as u64);
                Some((name, start))
            });
            match symbol {
                Some((name, start)) => StackFrame::new(instruction_pointer).with_symbol(name, start),
                None => StackFrame::new(instruction_pointer),
            }
        })
        .skip_while(|frame| {
            frame
                .symbol
                .as_ref()
                .and_then(|s| s.name.as_deref())
                .is_some_and(|name| name.starts_with("backtrace::"))
        })
        .collect()
}

fn read_trimmed(path: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn process_info() -> ProcessInfo {
    let exe: Option<PathBuf> = std::env::current_exe().ok();
    #[cfg(unix)]
    let parent_id = Some(std::os::unix::process::parent_id());
    #[cfg(not(unix))]
    let parent_id: Option<u32> = None;

    ProcessInfo {
        name: exe
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string()),
        id: Some(std::process::id()),
        path: exe.as_ref().map(|p| p.to_string_lossy().to_string()),
        parent_name: parent_id.and_then(|pid| read_trimmed(&format!("/proc/{pid}/comm"))),
        parent_id,
        native: true,
    }
}

/// Builds a report describing the current process right now.
///
/// The calling thread is recorded as the crashed thread, with its stack.
pub fn live_report(
    application: ApplicationInfo,
    signal: Option<SignalInfo>,
    exception: Option<ExceptionInfo>,
) -> CrashReport {
    let processor = arch::host_processor();
    CrashReport {
        uuid: Some(Uuid::new_v4()),
        timestamp: Some(Utc::now()),
        system_info: Some(SystemInfo {
            os_name: Some(std::env::consts::OS.to_string()),
            os_version: read_trimmed("/proc/sys/kernel/osrelease"),
            os_build: None,
            architecture: Some(std::env::consts::ARCH.to_string()),
        }),
        machine_info: Some(MachineInfo {
            model: None,
            processor,
        }),
        application_info: Some(application),
        process_info: Some(process_info()),
        signal_info: signal,
        exception_info: exception,
        threads: vec![ThreadInfo {
            number: 0,
            crashed: true,
            stack_frames: current_thread_frames(),
            registers: Vec::new(),
        }],
        images: loaded_images(),
    }
}

// ============================================================================
// CrashReporter
// ============================================================================

/// Captures crashes and handled exceptions for the running process.
pub struct CrashReporter {
    persistence: Persistence,
    channel: Arc<Channel>,
    context: Arc<TelemetryContext>,
    provider: CrashDataProvider,
}

impl CrashReporter {
    pub fn new(
        persistence: Persistence,
        channel: Arc<Channel>,
        context: Arc<TelemetryContext>,
        config: &CrashConfig,
    ) -> Self {
        Self {
            persistence,
            channel,
            context,
            provider: CrashDataProvider::new(config),
        }
    }

    /// Application identity as currently known to the context.
    fn application_info(&self) -> ApplicationInfo {
        let application = self.context.snapshot().application;
        let identifier = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()));
        ApplicationInfo {
            identifier,
            version: application.build.or_else(|| application.version.clone()),
            short_version: application.version,
        }
    }

    fn stamp(&self, item: TelemetryItem) -> TelemetryItem {
        let item = item.with_tags(self.context.tags());
        match self.context.instrumentation_key() {
            Some(key) => item.with_instrumentation_key(key),
            None => item,
        }
    }

    /// Records a panic as a high-priority crash bundle on the calling thread.
    pub fn report_panic(&self, message: &str, location: Option<&str>) -> bool {
        let reason = match location {
            Some(location) => format!("{message} at {location}"),
            None => message.to_string(),
        };
        let report = live_report(
            self.application_info(),
            Some(SignalInfo {
                name: "SIGABRT".to_string(),
                code: "#0".to_string(),
                address: 0,
            }),
            Some(ExceptionInfo {
                name: Some(PANIC_EXCEPTION_NAME.to_string()),
                reason: Some(reason),
                stack_frames: Vec::new(),
            }),
        );

        let item = self.stamp(self.provider.crash_data_for_crash_report(&report));
        self.persistence
            .persist_bundle_blocking(vec![item], PersistenceType::HighPriority)
    }

    /// Installs a panic hook that records every panic before handing over
    /// to the previously installed hook.
    pub fn install_panic_hook(self: &Arc<Self>) {
        let reporter = Arc::clone(self);
        let previous_hook = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |panic_info| {
            let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            let location = panic_info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));

            if !reporter.report_panic(&message, location.as_deref()) {
                eprintln!("Failed to save crash report");
            }

            previous_hook(panic_info);
        }));
        info!("Crash reporter installed");
    }

    /// Stages a handled exception as a fake crash report.
    ///
    /// Nothing is sent until [`send_pending_fake_reports`](Self::send_pending_fake_reports).
    pub fn track_handled_exception(&self, exception: &HandledException) {
        let report = live_report(self.application_info(), None, None);
        let item = self
            .provider
            .crash_data_for_crash_report_with_exception(&report, Some(exception));
        debug!(name = %exception.name, "Staging handled exception");
        self.channel.persist_fake_report(item);
    }

    /// Moves every staged fake report into the high-priority queue.
    ///
    /// Does blocking I/O; call from a background thread. A report that
    /// cannot be promoted stays staged. Returns the number of bundles
    /// promoted.
    pub fn send_pending_fake_reports(&self) -> usize {
        let promoted = self.persistence.promote_fake_reports();
        if promoted > 0 {
            info!(promoted, "Promoted staged crash reports");
        }
        promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_maps_line_file_backed() {
        let line = "55a4b2c00000-55a4b2c05000 r-xp 00001000 08:01 1234 /usr/bin/foo";
        let entry = parse_maps_line(line).unwrap();
        assert_eq!(entry.start, 0x55a4b2c00000);
        assert_eq!(entry.end, 0x55a4b2c05000);
        assert_eq!(entry.path, "/usr/bin/foo");
    }

    #[test]
    fn test_parse_maps_line_skips_pseudo_and_anonymous() {
        assert!(parse_maps_line("7ffd12300000-7ffd12321000 r-xp 00000000 00:00 0 [vdso]").is_none());
        assert!(parse_maps_line("7f1234000000-7f1234001000 rw-p 00000000 00:00 0").is_none());
        assert!(parse_maps_line("garbage").is_none());
        assert!(parse_maps_line("not-hex r-xp 00000000 08:01 1234 /foo").is_none());
    }

    #[test]
    fn test_images_merge_mappings_per_file() {
        let maps = "\
1000-2000 r--p 00000000 08:01 1 /opt/app/bin
2000-5000 r-xp 00001000 08:01 1 /opt/app/bin
7000-8000 r-xp 00000000 08:01 2 /usr/lib/libc.so.6
5000-6000 rw-p 00004000 08:01 1 /opt/app/bin
9000-a000 rw-p 00000000 00:00 0 [heap]
";
        let images = images_from_maps(maps);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].path.as_deref(), Some("/opt/app/bin"));
        assert_eq!(images[0].base_address, 0x1000);
        assert_eq!(images[0].size, 0x5000);
        assert_eq!(images[1].path.as_deref(), Some("/usr/lib/libc.so.6"));
        assert_eq!(images[1].size, 0x1000);
    }

    #[test]
    fn test_live_report_describes_current_process() {
        let report = live_report(ApplicationInfo::default(), None, None);
        let process = report.process_info.unwrap();
        assert_eq!(process.id, Some(std::process::id()));
        assert!(process.path.is_some());
        assert_eq!(report.threads.len(), 1);
        assert!(report.threads[0].crashed);
        assert!(!report.threads[0].stack_frames.is_empty());
    }

    #[test]
    fn test_current_thread_frames_start_at_caller() {
        let frames = current_thread_frames();
        assert!(!frames.is_empty());

        let names: Vec<&str> = frames
            .iter()
            .filter_map(|f| f.symbol.as_ref().and_then(|s| s.name.as_deref()))
            .collect();
        assert!(names.iter().all(|n| !n.starts_with("backtrace::")));
        assert!(names
            .iter()
            .any(|n| n.contains("test_current_thread_frames_start_at_caller")));
    }
}
