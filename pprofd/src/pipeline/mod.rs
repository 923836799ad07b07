//! Profile pipeline: raw CPU capture → text report
//!
//! ```text
//! raw bytes ──parse──▶ ParsedProfile ──symbolize──▶ ParsedProfile ──render──▶ text
//!              fatal                 best effort
//! ```
//!
//! A parse failure ends the request. A symbolization failure only adds a
//! warning; the report is rendered with whatever was resolved.

pub mod parse;
pub mod report;
pub mod symbolize;

use log::warn;

use crate::domain::{PipelineError, ProfileReportOptions};

pub use parse::{parse_profile, ParsedProfile, ProfileLocation, ProfileMapping, ProfileSample};
pub use report::render_text;
pub use symbolize::{symbolize, HttpSymbolResolver, SymbolResolver, SYMBOL_TIMEOUT};

/// Output of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub body: String,
    /// `Failed to symbolize profile: ...` line, if symbolization failed
    pub warning: Option<String>,
}

impl RenderedReport {
    /// Response text: the warning line (if any) followed by the report
    #[must_use]
    pub fn into_text(self) -> String {
        match self.warning {
            Some(warning) => format!("{warning}\n{}", self.body),
            None => self.body,
        }
    }
}

/// Parse, symbolize and render a raw CPU capture
///
/// # Errors
/// Returns [`PipelineError::Parse`] if the capture cannot be parsed
pub fn render(
    raw: &[u8],
    options: &ProfileReportOptions,
    resolver: &dyn SymbolResolver,
) -> Result<RenderedReport, PipelineError> {
    let mut profile = parse_profile(raw)?;

    let warning = match symbolize(&mut profile, resolver) {
        Ok(_) => None,
        Err(e) => {
            warn!("Failed to symbolize profile: {e}");
            Some(format!("Failed to symbolize profile: {e}"))
        }
    };

    Ok(RenderedReport { body: render_text(&profile, options), warning })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SymbolizationError;
    use crate::sampler::{CpuSamples, SampledFrame, StackSample};
    use std::collections::HashMap;
    use std::time::{Duration, UNIX_EPOCH};

    struct Resolver(Option<HashMap<u64, String>>);

    impl SymbolResolver for Resolver {
        fn resolve(&self, _: &[u64]) -> Result<HashMap<u64, String>, SymbolizationError> {
            self.0.clone().ok_or_else(|| SymbolizationError::Status {
                endpoint: "http://localhost:6060/symbol".to_string(),
                status: 503,
            })
        }
    }

    fn raw() -> Vec<u8> {
        CpuSamples {
            samples: vec![StackSample { frames: vec![SampledFrame::Address(0xabc)], count: 4 }],
            frequency: 100,
            start_time: UNIX_EPOCH,
            duration: Duration::from_secs(1),
            mapping: None,
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn test_render_resolves_names() {
        let resolver = Resolver(Some(HashMap::from([(0xabc, "app::busy".to_string())])));
        let report = render(&raw(), &ProfileReportOptions::default(), &resolver).unwrap();

        assert!(report.warning.is_none());
        assert!(report.body.contains("app::busy"));
    }

    #[test]
    fn test_symbolization_failure_is_a_warning() {
        let report = render(&raw(), &ProfileReportOptions::default(), &Resolver(None)).unwrap();

        let text = report.into_text();
        assert!(text.starts_with(
            "Failed to symbolize profile: symbol endpoint http://localhost:6060/symbol returned HTTP 503\n"
        ));
        assert!(text.contains("0xabc"));
    }

    #[test]
    fn test_parse_failure_is_fatal() {
        let err = render(b"garbage", &ProfileReportOptions::default(), &Resolver(None)).unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }
}
