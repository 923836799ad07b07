//! Remote symbolization of parsed profiles
//!
//! Unresolved addresses are sent to a `/symbol` endpoint (normally this
//! process's own) and the answers are written back into the profile.

use log::debug;
use pprofd_common::{encode_symbol_request, parse_symbol_response};
use std::collections::HashMap;
use std::time::Duration;

use super::parse::ParsedProfile;
use crate::domain::SymbolizationError;

/// Default timeout for one symbol lookup round trip
pub const SYMBOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Program counter → function name lookups, in bulk
pub trait SymbolResolver: Send + Sync {
    /// Resolve as many of `addresses` as possible
    ///
    /// Addresses the resolver has no name for are simply absent from the map.
    ///
    /// # Errors
    /// Returns an error if the lookup itself failed
    fn resolve(&self, addresses: &[u64]) -> Result<HashMap<u64, String>, SymbolizationError>;
}

/// Resolver that POSTs to a `/symbol` endpoint
#[derive(Debug, Clone)]
pub struct HttpSymbolResolver {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpSymbolResolver {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, SYMBOL_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self { endpoint: endpoint.into(), agent }
    }

    /// Resolver for the `/symbol` endpoint serving `host`
    #[must_use]
    pub fn for_host(scheme: &str, host: &str) -> Self {
        Self::new(format!("{scheme}://{host}/symbol"))
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SymbolResolver for HttpSymbolResolver {
    fn resolve(&self, addresses: &[u64]) -> Result<HashMap<u64, String>, SymbolizationError> {
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "text/plain")
            .send_string(&encode_symbol_request(addresses))
            .map_err(|e| match e {
                ureq::Error::Status(status, _) => {
                    SymbolizationError::Status { endpoint: self.endpoint.clone(), status }
                }
                ureq::Error::Transport(t) => SymbolizationError::Request {
                    endpoint: self.endpoint.clone(),
                    error: t.to_string(),
                },
            })?;

        let body = response.into_string()?;
        let parsed = parse_symbol_response(&body)?;
        for error in &parsed.errors {
            debug!("Symbol endpoint reported: {error}");
        }
        Ok(parsed.symbols.into_iter().collect())
    }
}

/// Fill in function names for unresolved locations
///
/// Returns the number of addresses that were resolved. Locations the
/// resolver has no answer for stay unresolved.
///
/// # Errors
/// Returns the resolver's error; the profile is left untouched in that case
pub fn symbolize(
    profile: &mut ParsedProfile,
    resolver: &dyn SymbolResolver,
) -> Result<usize, SymbolizationError> {
    let addresses = profile.unresolved_addresses();
    if addresses.is_empty() {
        return Ok(0);
    }

    let names = resolver.resolve(&addresses)?;
    for location in profile.locations.iter_mut().filter(|l| !l.is_symbolized()) {
        if let Some(name) = names.get(&location.address) {
            location.functions.push(name.clone());
        }
    }

    debug!("Resolved {} of {} addresses", names.len(), addresses.len());
    Ok(names.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parse::{ProfileLocation, ProfileSample};
    use std::sync::Mutex;

    struct FixedResolver {
        names: HashMap<u64, String>,
        calls: Mutex<Vec<Vec<u64>>>,
    }

    impl SymbolResolver for FixedResolver {
        fn resolve(&self, addresses: &[u64]) -> Result<HashMap<u64, String>, SymbolizationError> {
            self.calls.lock().unwrap().push(addresses.to_vec());
            Ok(addresses
                .iter()
                .filter_map(|a| self.names.get(a).map(|n| (*a, n.clone())))
                .collect())
        }
    }

    fn location(address: u64, functions: &[&str]) -> ProfileLocation {
        ProfileLocation {
            address,
            mapping: None,
            functions: functions.iter().map(ToString::to_string).collect(),
        }
    }

    fn profile() -> ParsedProfile {
        ParsedProfile {
            locations: vec![
                location(0x10, &[]),
                location(0x20, &[]),
                location(0x10, &[]),
                location(0, &["main"]),
            ],
            samples: vec![ProfileSample { stack: vec![0, 1, 3], values: vec![1] }],
            ..Default::default()
        }
    }

    #[test]
    fn test_symbolize_fills_known_addresses() {
        let resolver = FixedResolver {
            names: HashMap::from([(0x10, "app::hot".to_string())]),
            calls: Mutex::new(Vec::new()),
        };
        let mut profile = profile();

        assert_eq!(symbolize(&mut profile, &resolver).unwrap(), 1);
        assert_eq!(*resolver.calls.lock().unwrap(), vec![vec![0x10, 0x20]]);
        assert_eq!(profile.locations[0].functions, vec!["app::hot".to_string()]);
        assert_eq!(profile.locations[2].functions, vec!["app::hot".to_string()]);
        // Best effort: unknown address stays unresolved
        assert!(!profile.locations[1].is_symbolized());
    }

    #[test]
    fn test_symbolize_skips_call_when_nothing_to_resolve() {
        let resolver = FixedResolver { names: HashMap::new(), calls: Mutex::new(Vec::new()) };
        let mut profile = ParsedProfile {
            locations: vec![location(0, &["main"])],
            ..Default::default()
        };

        assert_eq!(symbolize(&mut profile, &resolver).unwrap(), 0);
        assert!(resolver.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_http_resolver_reports_unreachable_endpoint() {
        // Port 9 (discard) on localhost is expected to refuse connections
        let resolver =
            HttpSymbolResolver::with_timeout("http://127.0.0.1:9/symbol", Duration::from_secs(1));

        let err = resolver.resolve(&[0x10]).unwrap_err();
        assert!(matches!(err, SymbolizationError::Request { .. }));
        assert!(err.to_string().contains("127.0.0.1:9"));
    }

    #[test]
    fn test_https_endpoint_is_attempted() {
        let resolver =
            HttpSymbolResolver::with_timeout("https://127.0.0.1:9/symbol", Duration::from_secs(1));

        // Fails on connect, not for lack of a TLS backend
        let err = resolver.resolve(&[0x10]).unwrap_err().to_string();
        assert!(!err.contains("Unknown Scheme"), "{err}");
        assert!(err.contains("Connection Failed"), "{err}");
    }

    #[test]
    fn test_for_host_builds_endpoint() {
        let resolver = HttpSymbolResolver::for_host("https", "localhost:6060");
        assert_eq!(resolver.endpoint(), "https://localhost:6060/symbol");
    }
}
