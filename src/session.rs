use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::backend::{Backend, RuntimeBackend};
use crate::output::{OutputFiles, Sinks, default_label};
use crate::{ProfileError, ProfileKind, ProfilerConfig, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Closed,
}

/// What a finished session measured and where it wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    files: OutputFiles,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    duration: Duration,
}

impl Summary {
    pub fn label(&self) -> &str {
        self.files.label()
    }

    pub fn files(&self) -> &OutputFiles {
        &self.files
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    /// Time between the end of `start` and the beginning of `stop`.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:.3} ms",
            self.label(),
            self.duration.as_micros() as f64 * 0.001
        )
    }
}

struct ActiveSession {
    files: OutputFiles,
    sinks: Sinks,
    started: Instant,
    started_at: DateTime<Utc>,
}

enum State {
    Idle,
    Active(Box<ActiveSession>),
    Closed(Summary),
}

/// One profiling session: `Idle`, then `Active` after [`start`](Self::start),
/// then `Closed` after [`stop`](Self::stop). A closed session cannot be
/// started again.
pub struct Session<B = RuntimeBackend> {
    config: ProfilerConfig,
    backend: B,
    state: State,
}

impl Session<RuntimeBackend> {
    pub fn new(config: ProfilerConfig) -> Self {
        let backend = RuntimeBackend::new(&config);
        Self::with_backend(config, backend)
    }
}

impl<B: Backend> Session<B> {
    pub fn with_backend(config: ProfilerConfig, backend: B) -> Self {
        Self {
            config,
            backend,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            State::Idle => SessionState::Idle,
            State::Active(_) => SessionState::Active,
            State::Closed(_) => SessionState::Closed,
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Output files of the running or finished session.
    pub fn files(&self) -> Option<&OutputFiles> {
        match &self.state {
            State::Idle => None,
            State::Active(active) => Some(&active.files),
            State::Closed(summary) => Some(summary.files()),
        }
    }

    /// Files a session named `name` writes. An empty `name` means this
    /// session's files, or a fresh timestamp label before it has started.
    pub fn files_for(&self, name: &str) -> OutputFiles {
        let dir = self.config.get_output_dir();
        match (name.is_empty(), self.files()) {
            (true, Some(files)) => files.clone(),
            (true, None) => OutputFiles::new(dir, &default_label(self.config.get_label_prefix())),
            (false, _) => OutputFiles::new(dir, name),
        }
    }

    pub fn summary(&self) -> Option<&Summary> {
        match &self.state {
            State::Closed(summary) => Some(summary),
            _ => None,
        }
    }

    /// `None` until the session has been stopped.
    pub fn duration(&self) -> Option<Duration> {
        self.summary().map(Summary::duration)
    }

    /// Opens the four profile files and starts the profilers. An empty `name`
    /// is replaced by a timestamp label.
    ///
    /// On failure everything acquired so far is released, the created files
    /// are removed and the session stays `Idle`.
    pub fn start(&mut self, name: &str) -> Result<()> {
        if !matches!(self.state, State::Idle) {
            return Err(ProfileError::AlreadyStarted);
        }

        let label = if name.is_empty() {
            default_label(self.config.get_label_prefix())
        } else {
            name.to_string()
        };
        let files = OutputFiles::new(self.config.get_output_dir(), &label);
        let sinks = Sinks::create(&files)?;

        if let Err(err) = self.start_profilers(&sinks) {
            tracing::warn!(label = %label, error = %err, "failed to start profiling, rolling back");
            sinks.discard(&files);
            return Err(err);
        }
        tracing::info!(label = %label, dir = %self.config.get_output_dir().display(), "profiling started");

        // taken last so setup is not part of the measured time
        let started_at = Utc::now();
        let started = Instant::now();
        self.state = State::Active(Box::new(ActiveSession {
            files,
            sinks,
            started,
            started_at,
        }));
        Ok(())
    }

    fn start_profilers(&mut self, sinks: &Sinks) -> Result<()> {
        self.backend.start_cpu(sinks.get(ProfileKind::Cpu))?;
        if let Err(err) = self.backend.start_trace(sinks.get(ProfileKind::Trace)) {
            if let Err(stop_err) = self.backend.stop_cpu() {
                tracing::debug!(error = %stop_err, "failed to stop cpu sampling during rollback");
            }
            return Err(err);
        }
        self.backend.set_block_rate(self.config.get_block_rate());
        Ok(())
    }

    /// Stops the profilers, writes the snapshots and closes the files.
    ///
    /// Every step is attempted even if an earlier one fails, and the first
    /// error is returned. The session is `Closed` afterwards in both cases.
    pub fn stop(&mut self) -> Result<Summary> {
        // taken first so teardown is not part of the measured time
        let ended = Instant::now();
        let ended_at = Utc::now();

        let active = match std::mem::replace(&mut self.state, State::Idle) {
            State::Active(active) => active,
            State::Idle => return Err(ProfileError::NotStarted),
            closed @ State::Closed(_) => {
                self.state = closed;
                return Err(ProfileError::AlreadyStopped);
            }
        };
        let ActiveSession {
            files,
            mut sinks,
            started,
            started_at,
        } = *active;

        let cpu = self.backend.stop_cpu();
        let trace = self.backend.stop_trace();
        let block = self
            .backend
            .write_block(sinks.get_mut(ProfileKind::Block));
        self.backend.set_block_rate(0);
        let heap = self.backend.write_heap(sinks.get_mut(ProfileKind::Heap));
        let close = sinks.close(&files);

        let summary = Summary {
            files,
            started_at,
            ended_at,
            duration: ended.saturating_duration_since(started),
        };
        self.state = State::Closed(summary.clone());

        match [cpu, trace, block, heap, close].into_iter().collect::<Result<()>>() {
            Ok(()) => {
                tracing::info!(
                    label = summary.label(),
                    duration_ms = summary.duration().as_micros() as f64 * 0.001,
                    "profiling stopped"
                );
                Ok(summary)
            }
            Err(err) => {
                tracing::warn!(label = summary.label(), error = %err, "profiling stopped with errors");
                Err(err)
            }
        }
    }

    /// Profiles `work`. If starting fails, `work` is not run. A panic in
    /// `work` skips the stop.
    pub fn run<T, F>(&mut self, name: &str, work: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        self.start(name)?;
        let output = work();
        self.stop()?;
        Ok(output)
    }

    /// Like [`run`](Self::run), profiling until `future` completes.
    pub async fn run_async<F>(&mut self, name: &str, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.start(name)?;
        let output = future.await;
        self.stop()?;
        Ok(output)
    }
}
