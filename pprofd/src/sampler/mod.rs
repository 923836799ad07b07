//! Sampler gateway
//!
//! Thin adapter over the process-wide samplers. Each capture kind has one
//! [`CaptureSlot`]; a capture holds the slot from a successful start until it
//! is stopped or dropped, so at most one capture per kind runs at a time.
//!
//! ```text
//! SamplerGateway::start(kind)
//!   ├─ CaptureSlot::try_acquire   busy → CaptureError::AlreadyActive
//!   ├─ SamplingBackend::start     fails → slot released
//!   └─ ActiveCapture { session, slot }
//!        └─ stop() → bytes        (drop also stops)
//! ```

pub mod cpu;
pub mod trace;

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::{CaptureError, CaptureKind};

pub use cpu::{
    runtime_address, CpuSampler, CpuSamples, CpuSession, SampledFrame, StackSample,
    DEFAULT_FREQUENCY,
};
pub use trace::{ExecutionTracer, TraceSession, MAX_TRACE_EVENTS};

/// A running capture that can be turned into its raw bytes
///
/// Dropping a session without calling `stop` must still stop sampling.
pub trait CaptureSession: Send {
    /// Stop sampling and serialize what was collected
    ///
    /// # Errors
    /// Returns an error if the collected data cannot be serialized
    fn stop(self: Box<Self>) -> Result<Vec<u8>, CaptureError>;
}

/// Source of capture sessions
pub trait SamplingBackend: Send + Sync {
    /// Start a capture of the given kind
    ///
    /// # Errors
    /// Returns an error if the underlying sampler cannot be started
    fn start(&self, kind: CaptureKind) -> Result<Box<dyn CaptureSession>, CaptureError>;
}

/// Single-slot ownership of one capture kind
#[derive(Debug, Clone)]
pub struct CaptureSlot {
    kind: CaptureKind,
    busy: Arc<AtomicBool>,
}

impl CaptureSlot {
    #[must_use]
    pub fn new(kind: CaptureKind) -> Self {
        Self { kind, busy: Arc::new(AtomicBool::new(false)) }
    }

    /// Claim the slot without waiting
    ///
    /// # Errors
    /// Returns [`CaptureError::AlreadyActive`] if the slot is held
    pub fn try_acquire(&self) -> Result<SlotGuard, CaptureError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CaptureError::AlreadyActive(self.kind))?;
        Ok(SlotGuard { busy: Arc::clone(&self.busy) })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held slot; released on drop
#[derive(Debug)]
pub struct SlotGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// A started capture
///
/// Fields drop in order: the session stops before the slot is released.
pub struct ActiveCapture {
    kind: CaptureKind,
    session: Box<dyn CaptureSession>,
    slot: SlotGuard,
    started: Instant,
}

impl ActiveCapture {
    #[must_use]
    pub fn kind(&self) -> CaptureKind {
        self.kind
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop the capture and return the raw bytes
    ///
    /// # Errors
    /// Returns an error if the backend fails to serialize the capture
    pub fn stop(self) -> Result<Vec<u8>, CaptureError> {
        let ActiveCapture { kind, session, slot, started } = self;
        let result = session.stop();
        drop(slot);

        debug!(
            "{kind} capture stopped after {:?} ({})",
            started.elapsed(),
            match &result {
                Ok(bytes) => format!("{} bytes", bytes.len()),
                Err(e) => e.to_string(),
            }
        );
        result
    }
}

/// Entry point for starting captures
#[derive(Clone)]
pub struct SamplerGateway {
    backend: Arc<dyn SamplingBackend>,
    cpu_slot: CaptureSlot,
    trace_slot: CaptureSlot,
}

impl SamplerGateway {
    #[must_use]
    pub fn new(backend: Arc<dyn SamplingBackend>) -> Self {
        Self {
            backend,
            cpu_slot: CaptureSlot::new(CaptureKind::Cpu),
            trace_slot: CaptureSlot::new(CaptureKind::Trace),
        }
    }

    /// Gateway over the real process samplers
    #[must_use]
    pub fn process(frequency: i32) -> Self {
        Self::new(Arc::new(ProcessBackend::new(frequency)))
    }

    /// # Errors
    /// See [`SamplerGateway::start`]
    pub fn start_cpu(&self) -> Result<ActiveCapture, CaptureError> {
        self.start(CaptureKind::Cpu)
    }

    /// # Errors
    /// See [`SamplerGateway::start`]
    pub fn start_trace(&self) -> Result<ActiveCapture, CaptureError> {
        self.start(CaptureKind::Trace)
    }

    /// Start a capture of `kind`
    ///
    /// # Errors
    /// Returns [`CaptureError::AlreadyActive`] if a capture of the same kind
    /// is running, or the backend's error if sampling cannot start.
    pub fn start(&self, kind: CaptureKind) -> Result<ActiveCapture, CaptureError> {
        let slot = match kind {
            CaptureKind::Cpu => self.cpu_slot.try_acquire()?,
            CaptureKind::Trace => self.trace_slot.try_acquire()?,
        };
        let session = self.backend.start(kind)?;

        debug!("{kind} capture started");
        Ok(ActiveCapture { kind, session, slot, started: Instant::now() })
    }

    /// True while a capture of `kind` holds its slot
    #[must_use]
    pub fn is_capturing(&self, kind: CaptureKind) -> bool {
        match kind {
            CaptureKind::Cpu => self.cpu_slot.is_busy(),
            CaptureKind::Trace => self.trace_slot.is_busy(),
        }
    }
}

impl Default for SamplerGateway {
    fn default() -> Self {
        Self::process(DEFAULT_FREQUENCY)
    }
}

/// `pprof` for CPU profiles, the global [`ExecutionTracer`] for traces
pub struct ProcessBackend {
    cpu: CpuSampler,
    tracer: Arc<ExecutionTracer>,
}

impl ProcessBackend {
    #[must_use]
    pub fn new(frequency: i32) -> Self {
        Self { cpu: CpuSampler::new(frequency), tracer: ExecutionTracer::global() }
    }
}

impl SamplingBackend for ProcessBackend {
    fn start(&self, kind: CaptureKind) -> Result<Box<dyn CaptureSession>, CaptureError> {
        Ok(match kind {
            CaptureKind::Cpu => Box::new(self.cpu.start()?),
            CaptureKind::Trace => Box::new(self.tracer.start()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeBackend {
        stops: Arc<AtomicUsize>,
        fail: bool,
    }

    struct FakeSession {
        stops: Arc<AtomicUsize>,
    }

    impl CaptureSession for FakeSession {
        fn stop(self: Box<Self>) -> Result<Vec<u8>, CaptureError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(b"raw".to_vec())
        }
    }

    impl SamplingBackend for FakeBackend {
        fn start(&self, _kind: CaptureKind) -> Result<Box<dyn CaptureSession>, CaptureError> {
            if self.fail {
                return Err(CaptureError::Sampler("timer unavailable".to_string()));
            }
            Ok(Box::new(FakeSession { stops: Arc::clone(&self.stops) }))
        }
    }

    #[test]
    fn test_slot_is_exclusive_until_released() {
        let slot = CaptureSlot::new(CaptureKind::Cpu);
        let guard = slot.try_acquire().unwrap();

        assert!(slot.try_acquire().unwrap_err().is_already_active());
        drop(guard);
        assert!(slot.try_acquire().is_ok());
    }

    #[test]
    fn test_second_capture_of_same_kind_fails() {
        let gateway = SamplerGateway::new(Arc::new(FakeBackend::default()));
        let capture = gateway.start_cpu().unwrap();

        let err = gateway.start_cpu().err().unwrap();
        assert_eq!(err.to_string(), "CPU profile capture already active");

        // Other kinds are independent
        let trace = gateway.start_trace().unwrap();
        assert_eq!(trace.kind(), CaptureKind::Trace);

        assert_eq!(capture.stop().unwrap(), b"raw");
        assert!(!gateway.is_capturing(CaptureKind::Cpu));
        assert!(gateway.start_cpu().is_ok());
    }

    #[test]
    fn test_failed_start_releases_slot() {
        let gateway =
            SamplerGateway::new(Arc::new(FakeBackend { fail: true, ..Default::default() }));

        assert!(!gateway.start_cpu().err().unwrap().is_already_active());
        assert!(!gateway.is_capturing(CaptureKind::Cpu));
    }

    #[test]
    fn test_stop_runs_once() {
        let backend = Arc::new(FakeBackend::default());
        let stops = Arc::clone(&backend.stops);
        let gateway = SamplerGateway::new(backend);

        gateway.start_cpu().unwrap().stop().unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        // Dropped without stop: slot released, no serialization
        drop(gateway.start_cpu().unwrap());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(!gateway.is_capturing(CaptureKind::Cpu));
    }
}
