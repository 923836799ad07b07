//! CPU sampling backend and the raw capture format
//!
//! Sampling is done by `pprof` (SIGPROF-driven stack walks). When the capture
//! stops, the report is serialized as a gzip-compressed pprof `Profile`
//! protobuf. Frames inside the main executable are written as address-only
//! locations so they can be resolved later through `/symbol`; all other
//! frames keep the sampler's own function name.
//!
//! The unwinder reports link-time addresses. They are moved by the load bias
//! of the executable so that every address in a capture is a runtime program
//! counter, the same kind `/symbol` and the capture's mapping work with.

use flate2::{write::GzEncoder, Compression};
use log::{debug, warn};
use pprof::protos::{self, Message};
use pprof::{ProfilerGuard, ProfilerGuardBuilder};
use std::collections::HashMap;
use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::CaptureSession;
use crate::domain::{CaptureError, CaptureKind};
use crate::symbolization::{current_load_bias, ExecutableMapping};

/// Sampling frequency used when none is configured
///
/// 99 Hz rather than 100 to avoid lock-step with other periodic timers.
pub const DEFAULT_FREQUENCY: i32 = 99;

/// Libraries whose frames are not sampled (including the unwinder itself)
const BLOCKLIST: &[&str] = &["libc", "libgcc", "pthread", "vdso", "libunwind", "backtrace"];

/// Starts process-wide CPU sampling sessions
#[derive(Debug, Clone, Copy)]
pub struct CpuSampler {
    frequency: i32,
    load_bias: u64,
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new(DEFAULT_FREQUENCY)
    }
}

impl CpuSampler {
    /// Sampler for the running executable
    #[must_use]
    pub fn new(frequency: i32) -> Self {
        let load_bias = current_load_bias().unwrap_or_else(|e| {
            warn!("Failed to compute load bias: {e:#}. Captured addresses may not resolve.");
            0
        });
        Self::with_load_bias(frequency, load_bias)
    }

    #[must_use]
    pub fn with_load_bias(frequency: i32, load_bias: u64) -> Self {
        Self { frequency: frequency.max(1), load_bias }
    }

    #[must_use]
    pub fn frequency(&self) -> i32 {
        self.frequency
    }

    /// Start sampling
    ///
    /// # Errors
    /// Returns [`CaptureError::AlreadyActive`] if the process-wide profiler is
    /// already running, or [`CaptureError::Sampler`] if the signal timer
    /// cannot be installed.
    pub fn start(&self) -> Result<CpuSession, CaptureError> {
        let guard = ProfilerGuardBuilder::default()
            .frequency(self.frequency)
            .blocklist(BLOCKLIST)
            .build()
            .map_err(|e| match e {
                pprof::Error::Running => CaptureError::AlreadyActive(CaptureKind::Cpu),
                other => CaptureError::Sampler(other.to_string()),
            })?;

        let mapping = match ExecutableMapping::current() {
            Ok(mapping) => Some(mapping),
            Err(e) => {
                warn!("Failed to get memory range: {e}. Capture will carry no mapping.");
                None
            }
        };

        debug!("CPU sampling started at {} Hz", self.frequency);
        Ok(CpuSession { guard, mapping, load_bias: self.load_bias })
    }
}

/// A running CPU capture; dropping it stops the sampler
pub struct CpuSession {
    guard: ProfilerGuard<'static>,
    mapping: Option<ExecutableMapping>,
    load_bias: u64,
}

impl CaptureSession for CpuSession {
    fn stop(self: Box<Self>) -> Result<Vec<u8>, CaptureError> {
        let CpuSession { guard, mapping, load_bias } = *self;

        let report = guard.report().build().map_err(|e| CaptureError::Sampler(e.to_string()))?;
        drop(guard);

        let samples = CpuSamples::from_report(&report, mapping, load_bias);
        debug!(
            "CPU sampling stopped: {} distinct stacks over {:?}",
            samples.samples.len(),
            samples.duration
        );
        samples.encode()
    }
}

/// One frame of a sampled stack
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SampledFrame {
    /// Program counter still to be symbolized
    Address(u64),
    /// Already-named frame (no program counter available)
    Function(String),
}

/// A distinct stack and how often it was sampled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSample {
    /// Leaf first
    pub frames: Vec<SampledFrame>,
    pub count: i64,
}

/// Everything a CPU capture collected, ready for serialization
#[derive(Debug, Clone)]
pub struct CpuSamples {
    pub samples: Vec<StackSample>,
    pub frequency: i32,
    pub start_time: SystemTime,
    pub duration: Duration,
    pub mapping: Option<ExecutableMapping>,
}

impl CpuSamples {
    #[must_use]
    pub fn from_report(
        report: &pprof::Report,
        mapping: Option<ExecutableMapping>,
        load_bias: u64,
    ) -> Self {
        let samples = report
            .data
            .iter()
            .map(|(frames, count)| StackSample {
                frames: frames
                    .frames
                    .iter()
                    .filter_map(|symbols| sampled_frame(symbols, mapping.as_ref(), load_bias))
                    .collect(),
                count: *count as i64,
            })
            .collect();

        Self {
            samples,
            frequency: report.timing.frequency,
            start_time: report.timing.start_time,
            duration: report.timing.duration,
            mapping,
        }
    }

    /// Nanoseconds of CPU time one sample stands for
    #[must_use]
    pub fn period_nanos(&self) -> i64 {
        1_000_000_000 / i64::from(self.frequency.max(1))
    }

    /// Build the pprof profile message
    #[must_use]
    pub fn to_profile(&self) -> protos::Profile {
        let mut strings = StringTable::new();
        let period = self.period_nanos();

        let cpu_nanos = protos::ValueType {
            ty: strings.intern("cpu"),
            unit: strings.intern("nanoseconds"),
            ..Default::default()
        };
        let mut profile = protos::Profile {
            sample_type: vec![
                protos::ValueType {
                    ty: strings.intern("samples"),
                    unit: strings.intern("count"),
                    ..Default::default()
                },
                cpu_nanos.clone(),
            ],
            period_type: Some(cpu_nanos),
            period,
            time_nanos: nanos_since_epoch(self.start_time),
            duration_nanos: i64::try_from(self.duration.as_nanos()).unwrap_or(i64::MAX),
            ..Default::default()
        };

        if let Some(mapping) = &self.mapping {
            profile.mapping.push(protos::Mapping {
                id: 1,
                memory_start: mapping.range.start,
                memory_limit: mapping.range.end,
                filename: strings.intern(&mapping.path.to_string_lossy()),
                ..Default::default()
            });
        }

        let mut location_ids: HashMap<&SampledFrame, u64> = HashMap::new();
        let mut function_ids: HashMap<&str, u64> = HashMap::new();

        for sample in &self.samples {
            let mut ids = Vec::with_capacity(sample.frames.len());

            for frame in &sample.frames {
                if let Some(id) = location_ids.get(frame) {
                    ids.push(*id);
                    continue;
                }

                let id = profile.location.len() as u64 + 1;
                let location = match frame {
                    SampledFrame::Address(pc) => {
                        let in_executable =
                            self.mapping.as_ref().is_some_and(|m| m.range.contains(*pc));
                        protos::Location {
                            id,
                            mapping_id: u64::from(in_executable),
                            address: *pc,
                            ..Default::default()
                        }
                    }
                    SampledFrame::Function(name) => {
                        let function_id = match function_ids.get(name.as_str()) {
                            Some(function_id) => *function_id,
                            None => {
                                let function_id = profile.function.len() as u64 + 1;
                                let name_idx = strings.intern(name);
                                profile.function.push(protos::Function {
                                    id: function_id,
                                    name: name_idx,
                                    system_name: name_idx,
                                    ..Default::default()
                                });
                                function_ids.insert(name, function_id);
                                function_id
                            }
                        };
                        protos::Location {
                            id,
                            line: vec![protos::Line { function_id, ..Default::default() }],
                            ..Default::default()
                        }
                    }
                };

                profile.location.push(location);
                location_ids.insert(frame, id);
                ids.push(id);
            }

            profile.sample.push(protos::Sample {
                location_id: ids,
                value: vec![sample.count, sample.count.saturating_mul(period)],
                ..Default::default()
            });
        }

        profile.string_table = strings.into_strings();
        profile
    }

    /// Serialize as a gzip-compressed pprof protobuf
    ///
    /// # Errors
    /// Returns an error if compression fails
    pub fn encode(&self) -> Result<Vec<u8>, CaptureError> {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&self.to_profile().encode_to_vec())
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
        gz.finish().map_err(|e| CaptureError::Encode(e.to_string()))
    }
}

/// Runtime program counter for an address reported by the unwinder
///
/// Addresses already inside the executable mapping are kept. Anything else is
/// treated as link-time and moved by `load_bias`; `None` if it still falls
/// outside the executable.
#[must_use]
pub fn runtime_address(
    addr: u64,
    mapping: Option<&ExecutableMapping>,
    load_bias: u64,
) -> Option<u64> {
    let range = mapping?.range;
    if range.contains(addr) {
        return Some(addr);
    }
    let relocated = addr.checked_add(load_bias)?;
    range.contains(relocated).then_some(relocated)
}

fn sampled_frame(
    symbols: &[pprof::Symbol],
    mapping: Option<&ExecutableMapping>,
    load_bias: u64,
) -> Option<SampledFrame> {
    // Inlined symbols of one frame share its address
    let pc = symbols
        .iter()
        .find_map(|s| s.addr)
        .and_then(|addr| runtime_address(addr as usize as u64, mapping, load_bias));
    if let Some(pc) = pc {
        return Some(SampledFrame::Address(pc));
    }
    symbols.first().map(|s| SampledFrame::Function(s.name()))
}

fn nanos_since_epoch(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Interning string table; index 0 is always the empty string
struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, i64>,
}

impl StringTable {
    fn new() -> Self {
        Self { strings: vec![String::new()], index: HashMap::from([(String::new(), 0)]) }
    }

    fn intern(&mut self, s: &str) -> i64 {
        if let Some(idx) = self.index.get(s) {
            return *idx;
        }

        let idx = self.strings.len() as i64;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }

    fn into_strings(self) -> Vec<String> {
        self.strings
    }
}
