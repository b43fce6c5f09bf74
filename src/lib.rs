//! Starts and stops a bundle of profiles with one call pair.
//!
//! A session writes four files named after its label: `<label>.cpu.pprof`
//! (CPU samples, pprof protobuf), `<label>.block.prof` (blocking events),
//! `<label>.trace.out` (Chrome trace events) and `<label>.heap.prof` (heap
//! summary). There are three ways to use it.
//!
//! Profile a closure:
//!
//! ```no_run
//! bundle_profiler::run("parse", || {
//!     // code to profile
//! })?;
//! # Ok::<(), bundle_profiler::ProfileError>(())
//! ```
//!
//! Profile a region:
//!
//! ```no_run
//! bundle_profiler::start("region")?;
//! // code to profile
//! bundle_profiler::stop()?;
//! bundle_profiler::summarize();
//! # Ok::<(), bundle_profiler::ProfileError>(())
//! ```
//!
//! Or own the session explicitly:
//!
//! ```no_run
//! use bundle_profiler::{ProfilerConfig, Session};
//!
//! let mut session = Session::new(ProfilerConfig::new().output_dir("/tmp"));
//! session.start("")?;
//! // code to profile
//! let summary = session.stop()?;
//! println!("{summary}");
//! # Ok::<(), bundle_profiler::ProfileError>(())
//! ```
//!
//! Execution traces are fed by [`TraceLayer`], blocking events by
//! [`block::record`] or [`blocking!`], and heap numbers by installing
//! [`TrackingAllocator`] as the global allocator.

use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

mod backend;
mod config;
mod error;
mod macros;
mod output;
mod session;
pub mod trace_layer;

pub use backend::heap::{HeapStats, TrackingAllocator};
pub use backend::{Backend, RuntimeBackend, block, heap};
#[cfg(feature = "cpu")]
pub use backend::CpuSampler;
pub use config::*;
pub use error::*;
pub use output::{OutputFiles, ProfileKind, default_label};
pub use session::{Session, SessionState, Summary};
pub use trace_layer::TraceLayer;

static GLOBAL: Lazy<Mutex<Session>> = Lazy::new(|| {
    let config = ProfilerConfig::from_env().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "invalid profiler environment, using defaults");
        ProfilerConfig::default()
    });
    Mutex::new(Session::new(config))
});

/// Starts the process-wide session. `name` may be empty.
pub fn start(name: &str) -> Result<()> {
    GLOBAL.lock().start(name)
}

/// Stops the process-wide session.
pub fn stop() -> Result<Summary> {
    GLOBAL.lock().stop()
}

/// Profiles `work` in the process-wide session. The session lock is not
/// held while `work` runs.
pub fn run<T, F>(name: &str, work: F) -> Result<T>
where
    F: FnOnce() -> T,
{
    start(name)?;
    let output = work();
    stop()?;
    Ok(output)
}

/// Profiles `future` in the process-wide session until it completes.
pub async fn run_async<F>(name: &str, future: F) -> Result<F::Output>
where
    F: Future,
{
    start(name)?;
    let output = future.await;
    stop()?;
    Ok(output)
}

/// Current state of the process-wide session.
pub fn state() -> SessionState {
    GLOBAL.lock().state()
}

/// Prints how long the process-wide session ran.
pub fn summarize() -> Option<Duration> {
    let duration = GLOBAL.lock().duration();
    match duration {
        Some(duration) => println!("{duration:?}"),
        None => println!("no profiling session has completed"),
    }
    duration
}

/// Prints commands for inspecting the files of `name`, or of the
/// process-wide session when `name` is empty.
pub fn commands(name: &str) -> Vec<String> {
    let files = GLOBAL.lock().files_for(name);
    let commands = files.commands();
    for command in &commands {
        println!("{command}");
    }
    commands
}
