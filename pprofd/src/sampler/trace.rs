//! Execution tracer
//!
//! Records every `log` record emitted by any thread while a trace capture is
//! active and serializes them in the Chrome Trace Event format, so a capture
//! can be opened in `chrome://tracing` or Perfetto.
//!
//! The tracer sits in front of `env_logger`: [`ExecutionTracer::install`]
//! registers a wrapping logger as the global `log` backend. During a capture
//! the global max level is raised to `Trace` so nothing is filtered before it
//! reaches the recorder; the previous level is restored when the capture ends.

use log::{LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use super::CaptureSession;
use crate::domain::{CaptureError, CaptureKind};

/// Events kept per capture; later records are counted but dropped
pub const MAX_TRACE_EVENTS: usize = 100_000;

static GLOBAL: OnceLock<Arc<ExecutionTracer>> = OnceLock::new();
static NEXT_TID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static TRACE_TID: Cell<u32> = const { Cell::new(0) };
}

/// Chrome Trace Event format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChromeTraceEvent {
    name: String,
    cat: String,
    /// Phase: "X" = complete, "i" = instant, "M" = metadata
    ph: String,
    /// Microseconds since the capture started
    ts: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    pid: u32,
    tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

#[derive(Debug, Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: String,
}

struct TraceBuffer {
    started: Instant,
    events: Vec<ChromeTraceEvent>,
    thread_names: HashMap<u32, String>,
    dropped: u64,
    previous_level: LevelFilter,
}

/// Process-wide log record recorder
pub struct ExecutionTracer {
    active: AtomicBool,
    buffer: Mutex<Option<TraceBuffer>>,
}

impl Default for ExecutionTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracer {
    #[must_use]
    pub fn new() -> Self {
        Self { active: AtomicBool::new(false), buffer: Mutex::new(None) }
    }

    /// The tracer the global logger feeds
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Install `inner` as the global logger, wrapped by the global tracer
    ///
    /// # Errors
    /// Returns an error if a global logger was already set
    pub fn install(inner: env_logger::Logger) -> Result<(), log::SetLoggerError> {
        let level = inner.filter();
        log::set_boxed_logger(Box::new(TracingLogger { inner, tracer: Self::global() }))?;
        log::set_max_level(level);
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Begin recording
    ///
    /// # Errors
    /// Returns [`CaptureError::AlreadyActive`] if a trace is already running
    pub fn start(self: &Arc<Self>) -> Result<TraceSession, CaptureError> {
        let mut buffer = self.buffer.lock().map_err(|e| CaptureError::Sampler(e.to_string()))?;
        if buffer.is_some() {
            return Err(CaptureError::AlreadyActive(CaptureKind::Trace));
        }

        let previous_level = log::max_level();
        log::set_max_level(LevelFilter::Trace);
        *buffer = Some(TraceBuffer {
            started: Instant::now(),
            events: Vec::new(),
            thread_names: HashMap::new(),
            dropped: 0,
            previous_level,
        });
        self.active.store(true, Ordering::Release);

        Ok(TraceSession { tracer: Arc::clone(self), finished: false })
    }

    /// Add one log record to the active capture, if any
    pub fn record(&self, record: &Record<'_>) {
        if !self.is_active() {
            return;
        }

        let Ok(mut guard) = self.buffer.lock() else {
            return;
        };
        let Some(buffer) = guard.as_mut() else {
            return;
        };

        if buffer.events.len() >= MAX_TRACE_EVENTS {
            buffer.dropped += 1;
            return;
        }

        let tid = current_tid();
        buffer.thread_names.entry(tid).or_insert_with(|| {
            std::thread::current()
                .name()
                .map_or_else(|| format!("thread-{tid}"), str::to_string)
        });

        let mut args = HashMap::new();
        args.insert("level".to_string(), serde_json::json!(record.level().as_str()));
        if let Some(module) = record.module_path() {
            args.insert("module".to_string(), serde_json::json!(module));
        }
        if let (Some(file), Some(line)) = (record.file(), record.line()) {
            args.insert("location".to_string(), serde_json::json!(format!("{file}:{line}")));
        }

        buffer.events.push(ChromeTraceEvent {
            name: record.args().to_string(),
            cat: record.target().to_string(),
            ph: "i".to_string(),
            ts: micros_since(buffer.started),
            dur: None,
            pid: std::process::id(),
            tid,
            args: Some(args),
        });
    }

    fn finish(&self) -> Option<TraceBuffer> {
        self.active.store(false, Ordering::Release);
        let buffer = self.buffer.lock().ok()?.take()?;
        log::set_max_level(buffer.previous_level);
        Some(buffer)
    }
}

/// A running trace capture; dropping it ends the capture
pub struct TraceSession {
    tracer: Arc<ExecutionTracer>,
    finished: bool,
}

impl CaptureSession for TraceSession {
    fn stop(mut self: Box<Self>) -> Result<Vec<u8>, CaptureError> {
        self.finished = true;
        let buffer = self
            .tracer
            .finish()
            .ok_or_else(|| CaptureError::Sampler("trace buffer missing".to_string()))?;
        encode_trace(buffer)
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        if !self.finished {
            self.tracer.finish();
        }
    }
}

fn encode_trace(buffer: TraceBuffer) -> Result<Vec<u8>, CaptureError> {
    let pid = std::process::id();
    let elapsed = micros_since(buffer.started);
    let mut events = buffer.events;

    let mut capture_args = HashMap::new();
    capture_args.insert("events".to_string(), serde_json::json!(events.len()));
    if buffer.dropped > 0 {
        capture_args.insert("dropped".to_string(), serde_json::json!(buffer.dropped));
    }
    events.push(ChromeTraceEvent {
        name: "trace capture".to_string(),
        cat: "pprofd".to_string(),
        ph: "X".to_string(),
        ts: 0.0,
        dur: Some(elapsed),
        pid,
        tid: 0,
        args: Some(capture_args),
    });

    for (tid, name) in buffer.thread_names {
        let mut args = HashMap::new();
        args.insert("name".to_string(), serde_json::json!(name));
        events.push(ChromeTraceEvent {
            name: "thread_name".to_string(),
            cat: String::new(),
            ph: "M".to_string(),
            ts: 0.0,
            dur: None,
            pid,
            tid,
            args: Some(args),
        });
    }

    let trace = ChromeTrace { trace_events: events, display_time_unit: "ms".to_string() };
    serde_json::to_vec(&trace).map_err(|e| CaptureError::Encode(e.to_string()))
}

fn current_tid() -> u32 {
    TRACE_TID.with(|tid| {
        if tid.get() == 0 {
            tid.set(NEXT_TID.fetch_add(1, Ordering::Relaxed));
        }
        tid.get()
    })
}

fn micros_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1_000_000.0
}

/// Global logger: `env_logger` output plus trace recording
struct TracingLogger {
    inner: env_logger::Logger,
    tracer: Arc<ExecutionTracer>,
}

impl Log for TracingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.tracer.is_active() || self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.inner.matches(record) {
            self.inner.log(record);
        }
        self.tracer.record(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}
