//! The profiling primitives a [`Session`](crate::Session) drives.

use std::fs::File;
#[cfg(not(feature = "cpu"))]
use std::io::Write;

use crate::{ProfileError, ProfileKind, ProfilerConfig, Result, trace_layer};

pub mod block;
#[cfg(feature = "cpu")]
mod cpu;
pub mod heap;

#[cfg(feature = "cpu")]
pub use cpu::CpuSampler;

/// Begin/end hooks for the streaming profiles and writers for the snapshot
/// ones. Streaming profiles receive their sink at start and write to it until
/// stopped; snapshots are written once, at stop.
pub trait Backend {
    fn start_cpu(&mut self, sink: &File) -> Result<()>;
    /// Stops sampling and writes the profile to the sink given to `start_cpu`.
    fn stop_cpu(&mut self) -> Result<()>;

    fn start_trace(&mut self, sink: &File) -> Result<()>;
    fn stop_trace(&mut self) -> Result<()>;

    /// Sampling rate of blocking events; 1 records every event, 0 disables.
    fn set_block_rate(&mut self, rate: u64);
    fn write_block(&mut self, sink: &mut File) -> Result<()>;

    fn write_heap(&mut self, sink: &mut File) -> Result<()>;
}

/// Backend built on the crate's own collectors: `pprof` for CPU, the
/// [`TraceLayer`](crate::TraceLayer) for the execution trace, the [`block`]
/// registry and the [`heap`] counters.
pub struct RuntimeBackend {
    #[cfg(feature = "cpu")]
    cpu: CpuSampler,
    #[cfg(not(feature = "cpu"))]
    cpu_sink: Option<File>,
    process: String,
    tracing: bool,
    blocking: bool,
}

impl RuntimeBackend {
    pub fn new(config: &ProfilerConfig) -> Self {
        Self {
            #[cfg(feature = "cpu")]
            cpu: CpuSampler::new(config.get_cpu_frequency()),
            #[cfg(not(feature = "cpu"))]
            cpu_sink: None,
            process: std::env::args()
                .next()
                .unwrap_or_else(|| config.get_label_prefix().to_string()),
            tracing: false,
            blocking: false,
        }
    }
}

// A session dropped while active must not keep the process-wide trace sink
// or blocking sampling; the cpu guard and the sinks release themselves.
impl Drop for RuntimeBackend {
    fn drop(&mut self) {
        if self.tracing {
            self.tracing = false;
            if let Err(err) = trace_layer::stop() {
                tracing::warn!(error = %err, "failed to stop execution trace on drop");
            }
        }
        if self.blocking {
            self.blocking = false;
            block::set_rate(0);
        }
    }
}

impl Backend for RuntimeBackend {
    #[cfg(feature = "cpu")]
    fn start_cpu(&mut self, sink: &File) -> Result<()> {
        self.cpu.start(sink)
    }

    #[cfg(feature = "cpu")]
    fn stop_cpu(&mut self) -> Result<()> {
        self.cpu.stop()
    }

    #[cfg(not(feature = "cpu"))]
    fn start_cpu(&mut self, sink: &File) -> Result<()> {
        let sink = sink.try_clone().map_err(ProfileError::write(ProfileKind::Cpu))?;
        self.cpu_sink = Some(sink);
        Ok(())
    }

    #[cfg(not(feature = "cpu"))]
    fn stop_cpu(&mut self) -> Result<()> {
        let mut sink = self.cpu_sink.take().ok_or(ProfileError::NotStarted)?;
        writeln!(sink, "# cpu profiling disabled: built without the `cpu` feature")
            .map_err(ProfileError::write(ProfileKind::Cpu))
    }

    fn start_trace(&mut self, sink: &File) -> Result<()> {
        trace_layer::start(sink, &self.process)?;
        self.tracing = true;
        Ok(())
    }

    fn stop_trace(&mut self) -> Result<()> {
        if !std::mem::take(&mut self.tracing) {
            return Err(ProfileError::NotStarted);
        }
        trace_layer::stop()
    }

    fn set_block_rate(&mut self, rate: u64) {
        if rate > 0 {
            block::reset();
        }
        block::set_rate(rate);
        self.blocking = rate > 0;
    }

    fn write_block(&mut self, sink: &mut File) -> Result<()> {
        block::write_snapshot(sink).map_err(ProfileError::write(ProfileKind::Block))
    }

    fn write_heap(&mut self, sink: &mut File) -> Result<()> {
        heap::write_snapshot(sink).map_err(ProfileError::write(ProfileKind::Heap))
    }
}
