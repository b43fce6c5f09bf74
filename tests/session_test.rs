use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::Duration;

use bundle_profiler::{
    ProfileError, ProfileKind, ProfilerConfig, Session, SessionState, TraceLayer,
    TrackingAllocator, block, blocking,
};
use serial_test::serial;
use tracing_subscriber::prelude::*;

#[global_allocator]
static ALLOC: TrackingAllocator = TrackingAllocator::system();

fn session(dir: &Path) -> Session {
    Session::new(ProfilerConfig::new().output_dir(dir))
}

fn read(dir: &Path, name: &str) -> String {
    String::from_utf8_lossy(&std::fs::read(dir.join(name)).unwrap()).into_owned()
}

fn sum_to(x: u64) -> u64 {
    (0..x).map(std::hint::black_box).sum()
}

#[test]
#[serial]
fn demo_session_writes_all_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(dir.path());

    session.start("demo").unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let summary = session.stop().unwrap();

    assert!(summary.duration() >= Duration::from_millis(100));
    for name in ["demo.cpu.pprof", "demo.block.prof", "demo.trace.out", "demo.heap.prof"] {
        let len = std::fs::metadata(dir.path().join(name)).unwrap().len();
        assert!(len > 0, "{name} is empty");
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 4);

    let trace = read(dir.path(), "demo.trace.out");
    assert!(trace.starts_with("[\n{\"name\":\"process_name\""));
    assert!(trace.ends_with("]\n"));
    assert!(read(dir.path(), "demo.block.prof").starts_with("--- contention:\n"));
}

#[test]
#[serial]
fn heap_snapshot_counts_allocations() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(dir.path());

    let kept = session
        .run("heap", || (0..1000).map(|i| vec![i as u8; 64]).collect::<Vec<_>>())
        .unwrap();
    assert_eq!(kept.len(), 1000);

    let heap = read(dir.path(), "heap.heap.prof");
    assert!(heap.starts_with("heap profile: "));
    assert!(heap.contains("# tracking_allocator=installed"));
    assert!(bundle_profiler::heap::stats().in_use_bytes() >= 64 * 1000);
}

#[test]
#[serial]
fn blocking_events_are_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(dir.path());

    session
        .run("block", || {
            block::record("queue_wait", Duration::from_millis(3));
            let lock = std::sync::Mutex::new(0);
            let mut guard = blocking!("counter_lock"; lock.lock().unwrap());
            *guard += 1;
            blocking!("sleep"; std::thread::sleep(Duration::from_millis(5)));
        })
        .unwrap();

    let profile = read(dir.path(), "block.block.prof");
    assert!(profile.contains("sampling period=1\n"));
    assert!(profile.contains(" 1 @ queue_wait\n"));
    assert!(profile.contains(" 1 @ counter_lock\n"));
    assert!(profile.contains(" 1 @ sleep\n"));

    // sampling is switched off once the session stops
    assert_eq!(block::rate(), 0);
    block::record("after_stop", Duration::from_millis(1));
    assert!(!block::snapshot().iter().any(|(site, _)| *site == "after_stop"));
}

#[test]
#[serial]
fn trace_contains_spans_and_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(dir.path());
    let subscriber = tracing_subscriber::registry().with(TraceLayer::new());

    tracing::subscriber::with_default(subscriber, || {
        session
            .run("trace", || {
                let span = tracing::info_span!("crunch");
                let _enter = span.enter();
                tracing::info!(total = sum_to(100_000), "crunched \"numbers\"");
            })
            .unwrap();
    });

    let trace = read(dir.path(), "trace.trace.out");
    assert!(trace.contains("{\"name\":\"crunch\",\"ph\":\"B\""));
    assert!(trace.contains("{\"name\":\"crunch\",\"ph\":\"E\""));
    assert!(trace.contains("crunched \\\"numbers\\\""));
    assert!(trace.contains("{\"name\":\"profiling started\""));
    assert!(trace.contains("\"trace_end\""));
    assert!(!bundle_profiler::trace_layer::is_active());
}

#[test]
#[serial]
fn cpu_profile_is_pprof() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(dir.path());

    let total = session.run("cpu", || sum_to(50_000_000)).unwrap();
    assert!(total > 0);

    let bytes = std::fs::read(dir.path().join("cpu.cpu.pprof")).unwrap();
    // field 1 (sample_type) of the profile message
    assert_eq!(bytes[0], 0x0a);
}

#[test]
#[serial]
fn second_session_cannot_share_the_profilers() {
    let dir = tempfile::tempdir().unwrap();
    let mut first = session(dir.path());
    let mut second = session(dir.path());

    first.start("first").unwrap();
    let err = second.start("second").unwrap_err();
    assert!(matches!(err, ProfileError::Cpu(_)), "{err}");
    assert_eq!(second.state(), SessionState::Idle);
    assert!(!dir.path().join("second.cpu.pprof").exists());

    first.stop().unwrap();
    let files = first.summary().unwrap().files().clone();
    assert!(std::fs::metadata(files.path(ProfileKind::Cpu)).unwrap().len() > 0);

    // the profilers are free again
    second.start("second").unwrap();
    second.stop().unwrap();
}

#[test]
#[serial]
fn run_async_profiles_until_the_future_completes() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(dir.path());

    let output = futures::executor::block_on(session.run_async("async", async {
        std::thread::sleep(Duration::from_millis(20));
        7
    }))
    .unwrap();

    assert_eq!(output, 7);
    assert!(session.duration().unwrap() >= Duration::from_millis(20));
    assert!(dir.path().join("async.heap.prof").exists());
}

#[test]
#[serial]
fn dropping_an_active_session_frees_the_profilers() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut dropped = session(dir.path());
        dropped.start("dropped").unwrap();
        assert!(bundle_profiler::trace_layer::is_active());
        assert_eq!(block::rate(), 1);
    }
    assert!(!bundle_profiler::trace_layer::is_active());
    assert_eq!(block::rate(), 0);

    let mut next = session(dir.path());
    next.start("next").unwrap();
    next.stop().unwrap();
    assert!(std::fs::metadata(dir.path().join("next.trace.out")).unwrap().len() > 0);
}

#[test]
#[serial]
fn panicking_work_does_not_block_later_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let mut session = session(dir.path());
        session.run("panics", || -> u64 { panic!("work failed") }).unwrap();
    }));
    assert!(result.is_err());

    let mut next = session(dir.path());
    next.run("after_panic", || sum_to(1_000)).unwrap();
    assert_eq!(next.state(), SessionState::Closed);
}

#[test]
#[serial]
fn zero_cpu_frequency_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(ProfilerConfig::new().output_dir(dir.path()).cpu_frequency(0));

    let err = session.start("zero").unwrap_err();
    assert!(matches!(err, ProfileError::Config { .. }), "{err}");
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
