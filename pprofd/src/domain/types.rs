//! Domain types providing compile-time safety and self-documentation
//!
//! Request-scoped values built from query parameters. None of them outlive
//! the HTTP response that created them.

use std::fmt;
use std::time::Duration;

/// Default CPU profile window when `seconds` is missing or zero
pub const DEFAULT_CPU_SECONDS: f64 = 30.0;

/// Default execution trace window when `seconds` is missing or invalid
pub const DEFAULT_TRACE_SECONDS: f64 = 1.0;

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// The current process
    #[must_use]
    pub fn current() -> Self {
        Pid(std::process::id())
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Thread ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// What a timed capture samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureKind {
    /// Statistical CPU profile (signal-driven stack sampling)
    Cpu,
    /// Execution trace (timeline of log records per thread)
    Trace,
}

impl CaptureKind {
    /// Window used when the request does not specify a usable duration
    #[must_use]
    pub fn default_duration(self) -> Duration {
        match self {
            CaptureKind::Cpu => Duration::from_secs_f64(DEFAULT_CPU_SECONDS),
            CaptureKind::Trace => Duration::from_secs_f64(DEFAULT_TRACE_SECONDS),
        }
    }

    /// Resolve the `seconds` query parameter into a capture window
    ///
    /// Missing, unparsable, zero, negative and non-finite values all fall
    /// back to [`CaptureKind::default_duration`]; nothing is rejected.
    #[must_use]
    pub fn resolve_duration(self, seconds: Option<&str>) -> Duration {
        seconds
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| self.default_duration())
    }
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureKind::Cpu => write!(f, "CPU profile"),
            CaptureKind::Trace => write!(f, "execution trace"),
        }
    }
}

/// One capture request, decoded from query parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub kind: CaptureKind,
    pub duration: Duration,
    pub want_binary: bool,
    pub want_cumulative_sort: bool,
}

impl CaptureRequest {
    /// `/profile?seconds=..&binary=..&cum=..`
    #[must_use]
    pub fn cpu(seconds: Option<&str>, binary: Option<&str>, cum: Option<&str>) -> Self {
        Self {
            kind: CaptureKind::Cpu,
            duration: CaptureKind::Cpu.resolve_duration(seconds),
            want_binary: parse_flag(binary),
            want_cumulative_sort: parse_flag(cum),
        }
    }

    /// `/trace?seconds=..` (always binary)
    #[must_use]
    pub fn trace(seconds: Option<&str>) -> Self {
        Self {
            kind: CaptureKind::Trace,
            duration: CaptureKind::Trace.resolve_duration(seconds),
            want_binary: true,
            want_cumulative_sort: false,
        }
    }

    /// Renderer options for the text path
    #[must_use]
    pub fn report_options(&self) -> ProfileReportOptions {
        ProfileReportOptions {
            output_format: OutputFormat::Text,
            sort_by_cumulative: self.want_cumulative_sort,
            print_addresses: true,
        }
    }
}

/// Parse a boolean query flag
///
/// Accepts `1`, `t`, `T`, `true`, `TRUE`, `True` as true. Everything else,
/// including a missing flag, is false.
#[must_use]
pub fn parse_flag(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "t" | "T" | "true" | "TRUE" | "True"))
}

/// Parse an integer query parameter, treating anything invalid as zero
#[must_use]
pub fn parse_int(value: Option<&str>) -> i32 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
}

/// Snapshot of renderer settings, consumed once per report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileReportOptions {
    pub output_format: OutputFormat,
    /// Order rows by cumulative weight instead of self weight
    pub sort_by_cumulative: bool,
    /// Print raw program counters next to resolved names
    pub print_addresses: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_duration_defaults() {
        let default = Duration::from_secs(30);
        assert_eq!(CaptureKind::Cpu.resolve_duration(None), default);
        assert_eq!(CaptureKind::Cpu.resolve_duration(Some("0")), default);
        assert_eq!(CaptureKind::Cpu.resolve_duration(Some("-4")), default);
        assert_eq!(CaptureKind::Cpu.resolve_duration(Some("soon")), default);
        assert_eq!(CaptureKind::Cpu.resolve_duration(Some("5")), Duration::from_secs(5));
        assert_eq!(CaptureKind::Cpu.resolve_duration(Some("0.5")), Duration::from_millis(500));
    }

    #[test]
    fn test_trace_duration_defaults() {
        let default = Duration::from_secs(1);
        assert_eq!(CaptureKind::Trace.resolve_duration(None), default);
        assert_eq!(CaptureKind::Trace.resolve_duration(Some("-1")), default);
        assert_eq!(CaptureKind::Trace.resolve_duration(Some("NaN")), default);
        assert_eq!(CaptureKind::Trace.resolve_duration(Some("inf")), default);
        assert_eq!(CaptureKind::Trace.resolve_duration(Some("0.1")), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(Some("true")));
        assert!(parse_flag(Some("1")));
        assert!(parse_flag(Some("T")));
        assert!(!parse_flag(Some("yes")));
        assert!(!parse_flag(Some("false")));
        assert!(!parse_flag(None));
    }

    #[test]
    fn test_cpu_request() {
        let request = CaptureRequest::cpu(Some("2"), Some("true"), None);
        assert_eq!(request.kind, CaptureKind::Cpu);
        assert_eq!(request.duration, Duration::from_secs(2));
        assert!(request.want_binary);

        let options = request.report_options();
        assert!(!options.sort_by_cumulative);
        assert!(options.print_addresses);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(Some("2")), 2);
        assert_eq!(parse_int(Some("x")), 0);
        assert_eq!(parse_int(None), 0);
    }
}
