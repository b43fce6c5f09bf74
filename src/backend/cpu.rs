use std::fs::File;
use std::io::Write;

use pprof::protos::Message;
use pprof::{ProfilerGuard, ProfilerGuardBuilder};

use crate::{ENV_CPU_FREQ, ProfileError, ProfileKind, Result};

const BLOCKLIST: [&str; 4] = ["libc", "libgcc", "pthread", "vdso"];

/// Samples the stacks of every thread at a fixed frequency and writes the
/// result as a pprof protobuf. Only one sampler may run per process.
pub struct CpuSampler {
    frequency: i32,
    running: Option<(ProfilerGuard<'static>, File)>,
}

impl CpuSampler {
    pub fn new(frequency: i32) -> Self {
        Self {
            frequency,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn start(&mut self, sink: &File) -> Result<()> {
        if self.running.is_some() {
            return Err(ProfileError::AlreadyStarted);
        }
        if self.frequency <= 0 {
            return Err(ProfileError::Config {
                var: ENV_CPU_FREQ,
                value: self.frequency.to_string(),
            });
        }
        let sink = sink.try_clone().map_err(ProfileError::write(ProfileKind::Cpu))?;
        let guard = ProfilerGuardBuilder::default()
            .frequency(self.frequency)
            .blocklist(&BLOCKLIST)
            .build()?;
        tracing::debug!(frequency = self.frequency, "cpu sampling started");
        self.running = Some((guard, sink));
        Ok(())
    }

    /// Stops sampling and writes the profile. Sampling stops even if building
    /// or writing the report fails.
    pub fn stop(&mut self) -> Result<()> {
        let Some((guard, mut sink)) = self.running.take() else {
            return Err(ProfileError::NotStarted);
        };

        let report = guard.report().build();
        drop(guard);
        let profile = report?.pprof()?;
        let content = profile.encode_to_vec();

        sink.write_all(&content)
            .and_then(|()| sink.flush())
            .map_err(ProfileError::write(ProfileKind::Cpu))?;
        tracing::debug!(bytes = content.len(), "cpu profile written");
        Ok(())
    }
}
