/// Profiles an expression in the process-wide session.
///
/// ```no_run
/// let sum = bundle_profiler::profile!("sum"; (0..1_000_000u64).sum::<u64>())?;
/// # Ok::<(), bundle_profiler::ProfileError>(())
/// ```
#[macro_export]
macro_rules! profile {
    ($name:expr ; $call:expr) => {{ $crate::run($name, || $call) }};
}

/// Records the time spent evaluating an expression as a blocking event.
///
/// ```no_run
/// let lock = std::sync::Mutex::new(0);
/// let guard = bundle_profiler::blocking!("counter"; lock.lock());
/// ```
#[macro_export]
macro_rules! blocking {
    ($site:literal ; $call:expr) => {{
        let _timer = $crate::block::timer($site);
        $call
    }};
}
