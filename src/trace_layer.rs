//! Execution trace written in the Chrome trace event format.
//!
//! [`TraceLayer`] turns span enters/exits and events into trace events. They
//! are streamed to the trace sink of the active session and dropped when no
//! session is running. The output loads in Perfetto or `chrome://tracing`.

use std::cell::Cell;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::span;

use crate::{ProfileError, ProfileKind, Result};

static SINK: Lazy<Mutex<Option<TraceWriter>>> = Lazy::new(|| Mutex::new(None));
static NEXT_TID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TID: Cell<u64> = const { Cell::new(0) };
}

fn tid() -> u64 {
    TID.with(|tid| {
        if tid.get() == 0 {
            tid.set(NEXT_TID.fetch_add(1, Ordering::Relaxed));
        }
        tid.get()
    })
}

struct TraceWriter {
    out: BufWriter<File>,
    epoch: Instant,
    pid: u32,
}

impl TraceWriter {
    fn begin(file: File, process: &str) -> io::Result<Self> {
        let mut writer = Self {
            out: BufWriter::new(file),
            epoch: Instant::now(),
            pid: std::process::id(),
        };
        write!(
            writer.out,
            "[\n{{\"name\":\"process_name\",\"ph\":\"M\",\"ts\":0,\"pid\":{},\"tid\":{},\"args\":{{\"name\":",
            writer.pid,
            tid()
        )?;
        write_json_string(&mut writer.out, process)?;
        write!(writer.out, "}}}}")?;
        Ok(writer)
    }

    fn event(&mut self, ph: char, name: &str, args: &[(&str, &str)]) -> io::Result<()> {
        let ts = self.epoch.elapsed().as_micros();
        write!(self.out, ",\n{{\"name\":")?;
        write_json_string(&mut self.out, name)?;
        write!(
            self.out,
            ",\"ph\":\"{ph}\",\"ts\":{ts},\"pid\":{},\"tid\":{}",
            self.pid,
            tid()
        )?;
        if ph == 'i' {
            write!(self.out, ",\"s\":\"t\"")?;
        }
        if !args.is_empty() {
            write!(self.out, ",\"args\":{{")?;
            for (i, (key, value)) in args.iter().enumerate() {
                if i > 0 {
                    write!(self.out, ",")?;
                }
                write_json_string(&mut self.out, key)?;
                write!(self.out, ":")?;
                write_json_string(&mut self.out, value)?;
            }
            write!(self.out, "}}")?;
        }
        write!(self.out, "}}")
    }

    fn finish(mut self) -> io::Result<()> {
        self.event('i', "trace_end", &[])?;
        write!(self.out, "\n]\n")?;
        self.out.flush()
    }
}

fn write_json_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write!(w, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(w, "\\\"")?,
            '\\' => write!(w, "\\\\")?,
            '\n' => write!(w, "\\n")?,
            '\r' => write!(w, "\\r")?,
            '\t' => write!(w, "\\t")?,
            c if c.is_control() => write!(w, "\\u{:04x}", c as u32)?,
            c => write!(w, "{c}")?,
        }
    }
    write!(w, "\"")
}

/// Starts streaming trace events to `sink`. Fails if a trace is already running.
pub fn start(sink: &File, process: &str) -> Result<()> {
    let mut slot = SINK.lock();
    if slot.is_some() {
        return Err(ProfileError::TraceActive);
    }
    let writer = sink
        .try_clone()
        .and_then(|file| TraceWriter::begin(file, process))
        .map_err(ProfileError::write(ProfileKind::Trace))?;
    *slot = Some(writer);
    Ok(())
}

/// Stops the trace and flushes everything written so far.
pub fn stop() -> Result<()> {
    let writer = SINK.lock().take().ok_or(ProfileError::NotStarted)?;
    writer
        .finish()
        .map_err(ProfileError::write(ProfileKind::Trace))
}

pub fn is_active() -> bool {
    SINK.lock().is_some()
}

fn emit(ph: char, name: &str, args: &[(&str, &str)]) {
    let mut slot = SINK.lock();
    let Some(writer) = slot.as_mut() else {
        return;
    };
    // logging from here would re-enter this layer
    if let Err(err) = writer.event(ph, name, args) {
        eprintln!("failed to write trace event: {err}");
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}

/// A `tracing_subscriber` layer feeding the execution trace.
pub struct TraceLayer {}

impl Default for TraceLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceLayer {
    pub fn new() -> Self {
        Self {}
    }
}

impl<S> tracing_subscriber::Layer<S> for TraceLayer
where
    S: tracing::Subscriber,
    S: for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let name = visitor.message.as_deref().unwrap_or(meta.name());
        emit(
            'i',
            name,
            &[("target", meta.target()), ("level", meta.level().as_str())],
        );
    }

    fn on_enter(&self, id: &span::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            eprintln!("failed to get span");
            return;
        };
        emit('B', span.name(), &[("target", span.metadata().target())]);
    }

    fn on_exit(&self, id: &span::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            eprintln!("failed to get span");
            return;
        };
        emit('E', span.name(), &[]);
    }
}
