//! Integration tests for CrashReporter's handled-exception path

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use appinsights_channel::Channel;
use appinsights_core::config::{ChannelConfig, CrashConfig, PersistenceConfig};
use appinsights_core::domain::{
    ApplicationContext, HandledException, PersistenceType, TelemetryContext,
};
use appinsights_crash::CrashReporter;
use appinsights_persistence::Persistence;

fn setup(dir: &Path) -> (Persistence, CrashReporter) {
    let persistence = Persistence::spawn(&PersistenceConfig {
        directory: dir.to_path_buf(),
        max_file_count: 10,
    });
    let context = Arc::new(TelemetryContext::new(
        ApplicationContext {
            version: Some("2.0".to_string()),
            build: Some("200".to_string()),
        },
        Some("ikey".to_string()),
    ));
    let channel = Arc::new(Channel::new(
        Arc::new(persistence.clone()),
        Arc::clone(&context),
        ChannelConfig::default(),
    ));
    let reporter = CrashReporter::new(
        persistence.clone(),
        channel,
        context,
        &CrashConfig::default(),
    );
    (persistence, reporter)
}

/// Waits for the writer task to land `count` files of one type
async fn wait_for_files(dir: &Path, persistence_type: PersistenceType, count: usize) {
    let dir = dir.join(persistence_type.as_str());
    for _ in 0..200 {
        let found = std::fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
                    .count()
            })
            .unwrap_or(0);
        if found >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {count} {persistence_type} bundle(s)");
}

#[tokio::test]
async fn test_handled_exception_is_staged_not_sent() {
    let dir = tempfile::tempdir().unwrap();
    let (persistence, reporter) = setup(dir.path());
    let mut events = persistence.subscribe();

    reporter.track_handled_exception(&HandledException::new("ParseError", "bad input"));
    wait_for_files(dir.path(), PersistenceType::FakeCrash, 1).await;

    assert!(persistence.next_path().is_none());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_pending_fake_reports_are_promoted() {
    let dir = tempfile::tempdir().unwrap();
    let (persistence, reporter) = setup(dir.path());

    reporter.track_handled_exception(&HandledException::new("ParseError", "bad input"));
    reporter.track_handled_exception(&HandledException::new("IoError", "disk gone"));
    wait_for_files(dir.path(), PersistenceType::FakeCrash, 2).await;

    assert_eq!(reporter.send_pending_fake_reports(), 2);
    assert_eq!(reporter.send_pending_fake_reports(), 0);

    let mut names = Vec::new();
    while let Some(path) = persistence.next_path() {
        assert!(path.starts_with(dir.path().join("high_priority")));
        let items = persistence.bundle_at_path(&path).unwrap();
        let item = &items[0];
        assert_eq!(item.instrumentation_key(), Some("ikey"));
        let headers = &item.crash_data().unwrap().headers;
        assert!(headers.handled);
        names.push(headers.exception_type.clone());
        persistence.delete_bundle_at_path(&path);
    }
    names.sort();
    assert_eq!(names, ["IoError", "ParseError"]);
}

#[tokio::test]
async fn test_failed_promotion_keeps_report_staged() {
    let dir = tempfile::tempdir().unwrap();
    let (persistence, reporter) = setup(dir.path());

    reporter.track_handled_exception(&HandledException::new("ParseError", "bad input"));
    wait_for_files(dir.path(), PersistenceType::FakeCrash, 1).await;

    // A plain file where the high-priority directory belongs makes the move fail.
    let blocker = dir.path().join("high_priority");
    std::fs::write(&blocker, b"").unwrap();
    assert_eq!(reporter.send_pending_fake_reports(), 0);
    wait_for_files(dir.path(), PersistenceType::FakeCrash, 1).await;

    std::fs::remove_file(&blocker).unwrap();
    assert_eq!(reporter.send_pending_fake_reports(), 1);

    let path = persistence.next_path().unwrap();
    let items = persistence.bundle_at_path(&path).unwrap();
    assert_eq!(
        items[0].crash_data().unwrap().headers.exception_type,
        "ParseError"
    );
    assert!(persistence.fake_report_bundle().is_none());
}
