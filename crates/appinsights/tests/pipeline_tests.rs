//! Integration tests for Pipeline
//!
//! Each test runs the full pipeline against a temporary bundle directory.
//! Crash reporting stays off except where a test needs it, since the panic
//! hook is process-wide.

use std::path::Path;

use appinsights::{
    ApplicationContext, Config, HandledException, LifecycleEvent, PersistenceType, Pipeline,
    TelemetryData, TelemetryItem,
};
use appinsights_core::config::ConfigBuilder;
use tempfile::TempDir;

// ============================================================================
// Test helpers
// ============================================================================

fn config(dir: &Path, crash_enabled: bool) -> Config {
    ConfigBuilder::new()
        .instrumentation_key("00000000-0000-0000-0000-000000000000")
        .persistence_directory(dir.to_path_buf())
        .persistence_max_file_count(10)
        .channel_max_batch_count(100)
        .channel_batch_interval_secs(60)
        .crash_enabled(crash_enabled)
        .build()
}

fn application() -> ApplicationContext {
    ApplicationContext {
        version: Some("1.2.0".to_string()),
        build: Some("120".to_string()),
    }
}

fn event_name(item: &TelemetryItem) -> &str {
    match item.data() {
        TelemetryData::Event(event) => &event.name,
        other => panic!("expected an event, got {:?}", other.kind()),
    }
}

fn bundle_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| !e.file_name().to_string_lossy().ends_with(".tmp"))
                .count()
        })
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut config = config(temp.path(), false);
    config.channel.max_batch_count = 0;
    config.logging.level = "loud".to_string();

    let err = Pipeline::start(config, application()).err().unwrap();
    let message = err.to_string();
    assert!(message.contains("channel.max_batch_count"));
    assert!(message.contains("logging.level"));
}

#[tokio::test]
async fn test_flush_writes_one_stamped_bundle() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::start(config(temp.path(), false), application()).unwrap();

    pipeline.track_event("first");
    pipeline.track_event("second");
    assert_eq!(pipeline.channel().queued_count(), 2);

    assert!(pipeline.flush().await);
    assert_eq!(pipeline.channel().queued_count(), 0);

    let path = pipeline.persistence().next_path().unwrap();
    let items = pipeline.persistence().bundle_at_path(&path).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(event_name(&items[0]), "first");
    assert_eq!(event_name(&items[1]), "second");
    assert_eq!(
        items[0].instrumentation_key(),
        Some("00000000-0000-0000-0000-000000000000")
    );
    assert_eq!(items[0].tags().get("ai.application.ver"), Some("1.2.0"));

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_flush_with_empty_queue() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::start(config(temp.path(), false), application()).unwrap();

    assert!(pipeline.flush().await);
    assert_eq!(bundle_count(temp.path()), 0);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_persists_queued_items() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::start(config(temp.path(), false), application()).unwrap();
    let persistence = pipeline.persistence().clone();

    pipeline.track_event("pending");
    pipeline.shutdown().await.unwrap();

    let path = persistence.next_path().unwrap();
    assert_eq!(persistence.bundle_at_path(&path).unwrap().len(), 1);
}

#[tokio::test]
async fn test_lifecycle_event_flushes() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::start(config(temp.path(), false), application()).unwrap();
    let mut events = pipeline.persistence().subscribe();

    pipeline.track_event("backgrounded");
    pipeline.on_lifecycle_event(LifecycleEvent::Background);

    let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        appinsights::PersistenceEvent::BundleSaved {
            persistence_type, ..
        } => assert_eq!(persistence_type, PersistenceType::Regular),
    }

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handled_exception_requires_crash_reporting() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::start(config(temp.path(), false), application()).unwrap();

    assert!(pipeline.crash_reporter().is_none());
    assert!(!pipeline.track_handled_exception(&HandledException::new("IOError", "disk gone")));

    pipeline.shutdown().await.unwrap();
}
