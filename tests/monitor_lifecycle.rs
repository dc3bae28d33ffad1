// tests/monitor_lifecycle.rs

use std::path::Path;
use std::time::Duration;

use tempfile::tempdir;
use treewatch::errors::TreewatchError;
use treewatch::types::{EventKind, EventMask};
use treewatch::watch::{Event, Monitor};
use treewatch_test_utils::builders::MonitorConfigBuilder;
use treewatch_test_utils::collector::EventCollector;
use treewatch_test_utils::fake_backend::FakeBackend;
use treewatch_test_utils::init_tracing;

const QUIET: Duration = Duration::from_millis(50);

fn fake_monitor(root: &Path) -> (Monitor, FakeBackend) {
    let fake = FakeBackend::new();
    let config = MonitorConfigBuilder::new(root).exclude("ignored/**").build();
    let monitor = Monitor::with_backend(config, Box::new(fake.clone()));
    (monitor, fake)
}

#[test]
fn start_then_stop() {
    init_tracing();
    let dir = tempdir().unwrap();
    let (mut monitor, fake) = fake_monitor(dir.path());
    let collector = EventCollector::new();

    assert!(!monitor.is_watching());
    monitor.start(collector.handler()).unwrap();
    assert!(monitor.is_watching());
    assert!(fake.is_active());

    monitor.stop().unwrap();
    assert!(!monitor.is_watching());
    assert!(!fake.is_active());
    assert_eq!((fake.setup_calls(), fake.teardown_calls()), (1, 1));
}

#[test]
fn stop_is_idempotent() {
    init_tracing();
    let dir = tempdir().unwrap();
    let (mut monitor, fake) = fake_monitor(dir.path());

    // Never started.
    monitor.stop().unwrap();
    assert_eq!(fake.teardown_calls(), 0);

    monitor.start(|_event: Event| {}).unwrap();
    monitor.stop().unwrap();
    monitor.stop().unwrap();
    assert_eq!(fake.teardown_calls(), 1);
}

#[test]
fn start_while_watching_is_a_no_op() {
    init_tracing();
    let dir = tempdir().unwrap();
    let (mut monitor, fake) = fake_monitor(dir.path());
    let first = EventCollector::new();
    let second = EventCollector::new();

    monitor.start(first.handler()).unwrap();
    monitor.start(second.handler()).unwrap();
    assert_eq!(fake.setup_calls(), 1);

    let root = monitor.config().root().to_path_buf();
    assert!(fake.emit(Event::new(EventKind::Created, root.join("a.txt"))));

    // The original handler is still the one in use.
    assert!(first.recv_timeout(QUIET).is_some());
    assert!(second.recv_timeout(QUIET).is_none());
}

#[test]
fn restart_after_stop_resumes_delivery() {
    init_tracing();
    let dir = tempdir().unwrap();
    let (mut monitor, fake) = fake_monitor(dir.path());
    let root = monitor.config().root().to_path_buf();

    let before = EventCollector::new();
    monitor.start(before.handler()).unwrap();
    monitor.stop().unwrap();
    assert!(!fake.emit(Event::new(EventKind::Created, root.join("lost.txt"))));

    let after = EventCollector::new();
    monitor.start(after.handler()).unwrap();
    assert!(fake.emit(Event::new(EventKind::Created, root.join("b.txt"))));

    let event = after.recv_timeout(QUIET).expect("event after restart");
    assert_eq!(event.path, root.join("b.txt"));
    assert!(before.recv_timeout(QUIET).is_none());
    assert_eq!(fake.setup_calls(), 2);
}

#[test]
fn failed_setup_leaves_monitor_idle() {
    init_tracing();
    let dir = tempdir().unwrap();
    let (mut monitor, fake) = fake_monitor(dir.path());
    fake.fail_next_setup();

    let err = monitor.start(|_event: Event| {}).unwrap_err();
    assert!(matches!(err, TreewatchError::Setup(_)));
    assert!(!monitor.is_watching());

    // A later start can still succeed.
    monitor.start(|_event: Event| {}).unwrap();
    assert!(monitor.is_watching());
}

#[test]
fn failed_teardown_still_marks_not_watching() {
    init_tracing();
    let dir = tempdir().unwrap();
    let (mut monitor, fake) = fake_monitor(dir.path());

    monitor.start(|_event: Event| {}).unwrap();
    fake.fail_next_teardown();

    let err = monitor.stop().unwrap_err();
    assert!(matches!(err, TreewatchError::Teardown(_)));
    assert!(!monitor.is_watching());
    monitor.stop().unwrap();
}

#[test]
fn drop_stops_a_watching_monitor() {
    init_tracing();
    let dir = tempdir().unwrap();
    let (mut monitor, fake) = fake_monitor(dir.path());

    monitor.start(|_event: Event| {}).unwrap();
    drop(monitor);

    assert_eq!(fake.teardown_calls(), 1);
    assert!(!fake.is_active());
}

#[test]
fn excluded_and_masked_events_are_not_delivered() {
    init_tracing();
    let dir = tempdir().unwrap();
    let fake = FakeBackend::new();
    let config = MonitorConfigBuilder::new(dir.path())
        .exclude("ignored/**")
        .events(EventMask::CREATED | EventMask::RENAMED | EventMask::DELETED)
        .build();
    let root = config.root().to_path_buf();
    let mut monitor = Monitor::with_backend(config, Box::new(fake.clone()));
    let collector = EventCollector::new();
    monitor.start(collector.handler()).unwrap();

    assert!(!fake.emit(Event::new(EventKind::Created, root.join("ignored/b.txt"))));
    assert!(!fake.emit(Event::new(EventKind::Modified, root.join("a.txt"))));

    // Renamed into an excluded path degrades to a deletion of the old path.
    assert!(fake.emit(Event::renamed(root.join("a.txt"), root.join("ignored/a.txt"))));
    let event = collector.recv_timeout(QUIET).unwrap();
    assert_eq!(event.kind, EventKind::Deleted);
    assert_eq!(event.path, root.join("a.txt"));
    assert_eq!(event.previous_path, None);

    // Renamed out of an excluded path degrades to a creation of the new path.
    assert!(fake.emit(Event::renamed(root.join("ignored/c.txt"), root.join("c.txt"))));
    let event = collector.recv_timeout(QUIET).unwrap();
    assert_eq!(event.kind, EventKind::Created);
    assert_eq!(event.path, root.join("c.txt"));
    assert_eq!(event.previous_path, None);

    assert!(collector.recv_timeout(QUIET).is_none());
}

#[tokio::test]
async fn tokio_channel_handler_receives_events() {
    init_tracing();
    let dir = tempdir().unwrap();
    let (mut monitor, fake) = fake_monitor(dir.path());
    let root = monitor.config().root().to_path_buf();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Event>();

    monitor.start(tx).unwrap();
    assert!(fake.emit(Event::new(EventKind::Deleted, root.join("gone.txt"))));

    let event = treewatch_test_utils::with_timeout(rx.recv()).await.unwrap();
    assert_eq!(event.kind, EventKind::Deleted);
    assert_eq!(event.kinds(), EventMask::DELETED);
    monitor.stop().unwrap();
}
