//! The panic hook is process-global, so it gets a test binary of its own.

use std::sync::Arc;
use std::thread;

use appinsights_channel::Channel;
use appinsights_core::config::{ChannelConfig, CrashConfig, PersistenceConfig};
use appinsights_core::domain::{ApplicationContext, TelemetryContext, UNKNOWN};
use appinsights_crash::CrashReporter;
use appinsights_persistence::Persistence;

#[test]
fn test_panic_is_persisted_as_high_priority_crash() {
    let dir = tempfile::tempdir().unwrap();
    // No runtime here: the hook writes synchronously and never needs the writer.
    let (persistence, _writer) = Persistence::new(&PersistenceConfig {
        directory: dir.path().to_path_buf(),
        max_file_count: 10,
    });
    let context = Arc::new(TelemetryContext::new(ApplicationContext::default(), None));
    let channel = Arc::new(Channel::new(
        Arc::new(persistence.clone()),
        Arc::clone(&context),
        ChannelConfig::default(),
    ));
    let reporter = Arc::new(CrashReporter::new(
        persistence.clone(),
        channel,
        context,
        &CrashConfig::default(),
    ));
    reporter.install_panic_hook();

    let result = thread::spawn(|| panic!("worker exploded")).join();
    assert!(result.is_err());

    let path = persistence.next_path().expect("crash bundle");
    assert!(path.starts_with(dir.path().join("high_priority")));

    let items = persistence.bundle_at_path(&path).unwrap();
    assert_eq!(items.len(), 1);
    let headers = &items[0].crash_data().unwrap().headers;
    assert_eq!(headers.exception_type, "panic");
    assert!(headers
        .exception_reason
        .as_deref()
        .unwrap()
        .starts_with("worker exploded at "));
    assert_eq!(headers.exception_code, "#0");
    assert!(!headers.handled);
    assert_eq!(headers.process_id, Some(std::process::id()));

    // The panicking thread's stack, symbolized.
    let threads = &items[0].crash_data().unwrap().threads;
    assert_eq!(threads.len(), 1);
    let frames = &threads[0].frames;
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|f| f.address.starts_with("0x")));
    assert!(frames.iter().any(|f| f.symbol != UNKNOWN));
}
