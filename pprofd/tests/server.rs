//! HTTP-level tests of the debug server with fake sampling backends

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tower::ServiceExt;

use pprofd::domain::{CaptureError, CaptureKind, SymbolizationError};
use pprofd::pipeline::SymbolResolver;
use pprofd::profiles::{HeapProfile, MemoryReclaimer, ProfileRegistry};
use pprofd::sampler::{
    CaptureSession, CpuSamples, SampledFrame, SamplerGateway, SamplingBackend, StackSample,
};
use pprofd::server::{DebugServer, DebugServerBuilder};
use pprofd::symbolization::{FunctionSymbol, LiveSymbolTable, SymbolLookup};

struct FakeBackend {
    cpu: Vec<u8>,
    trace: Vec<u8>,
}

struct FakeSession(Vec<u8>);

impl CaptureSession for FakeSession {
    fn stop(self: Box<Self>) -> Result<Vec<u8>, CaptureError> {
        Ok(self.0)
    }
}

impl SamplingBackend for FakeBackend {
    fn start(&self, kind: CaptureKind) -> Result<Box<dyn CaptureSession>, CaptureError> {
        let bytes = match kind {
            CaptureKind::Cpu => self.cpu.clone(),
            CaptureKind::Trace => self.trace.clone(),
        };
        Ok(Box::new(FakeSession(bytes)))
    }
}

/// Resolves straight from a symbol table, skipping HTTP
struct TableResolver(Arc<dyn SymbolLookup>);

impl SymbolResolver for TableResolver {
    fn resolve(&self, addresses: &[u64]) -> Result<HashMap<u64, String>, SymbolizationError> {
        Ok(addresses.iter().filter_map(|a| self.0.lookup(*a).map(|n| (*a, n))).collect())
    }
}

struct FailingResolver;

impl SymbolResolver for FailingResolver {
    fn resolve(&self, _: &[u64]) -> Result<HashMap<u64, String>, SymbolizationError> {
        Err(SymbolizationError::Status { endpoint: "http://test/symbol".to_string(), status: 502 })
    }
}

#[derive(Default)]
struct CountingReclaimer(AtomicUsize);

impl MemoryReclaimer for CountingReclaimer {
    fn reclaim(&self) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst);
        true
    }
}

fn symbol_table() -> Arc<dyn SymbolLookup> {
    Arc::new(LiveSymbolTable::from_functions(
        vec![
            FunctionSymbol { address: 0x3000, size: 0x100, name: "app::handler".to_string() },
            FunctionSymbol { address: 0x10900, size: 0x100, name: "app::worker".to_string() },
        ],
        0,
    ))
}

/// Two stacks: handler (resolvable) and 0xdead (unknown), both under `main`
fn cpu_capture() -> Vec<u8> {
    CpuSamples {
        samples: vec![
            StackSample {
                frames: vec![SampledFrame::Address(0x3039), SampledFrame::Function("main".into())],
                count: 3,
            },
            StackSample {
                frames: vec![SampledFrame::Address(0xdead), SampledFrame::Function("main".into())],
                count: 1,
            },
        ],
        frequency: 100,
        start_time: UNIX_EPOCH,
        duration: Duration::from_secs(1),
        mapping: None,
    }
    .encode()
    .unwrap()
}

fn builder(cpu: Vec<u8>) -> DebugServerBuilder {
    let backend = FakeBackend { cpu, trace: br#"{"traceEvents":[]}"#.to_vec() };
    DebugServer::builder()
        .sampler(SamplerGateway::new(Arc::new(backend)))
        .symbol_table(symbol_table())
}

fn router() -> Router {
    builder(cpu_capture()).symbol_resolver(Arc::new(TableResolver(symbol_table()))).build().router()
}

async fn send(router: Router, method: Method, uri: &str, body: &str) -> (StatusCode, String, String) {
    let request =
        Request::builder().method(method).uri(uri).body(Body::from(body.to_string())).unwrap();
    let response = router.oneshot(request).await.unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, String::from_utf8_lossy(&bytes).into_owned())
}

async fn get_text(router: Router, uri: &str) -> (StatusCode, String, String) {
    send(router, Method::GET, uri, "").await
}

#[tokio::test]
async fn test_symbol_get_skips_invalid_tokens() {
    let (status, content_type, body) = get_text(router(), "/symbol?12345+0+badtoken+67890").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "text/plain; charset=utf-8");
    assert_eq!(body, "num_symbols: 1\n0x3039 app::handler\n0x10932 app::worker\n");
}

#[tokio::test]
async fn test_symbol_post_reads_body() {
    let (status, _, body) = send(router(), Method::POST, "/symbol?0x3001", "0x3039+0x10932").await;

    assert_eq!(status, StatusCode::OK);
    // Query string is ignored for POST
    assert_eq!(body, "num_symbols: 1\n0x3039 app::handler\n0x10932 app::worker\n");
}

#[tokio::test]
async fn test_symbol_post_reports_body_read_error_after_resolved_lines() {
    let chunks: Vec<Result<&'static str, std::io::Error>> =
        vec![Ok("0x3039+"), Err(std::io::Error::other("connection reset"))];
    let request = Request::builder()
        .method(Method::POST)
        .uri("/symbol")
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap();

    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8_lossy(&bytes);

    assert!(body.starts_with("num_symbols: 1\n0x3039 app::handler\n"), "{body}");
    assert!(body.ends_with("reading request: connection reset\n"), "{body}");
}

#[tokio::test]
async fn test_symbol_without_symbols() {
    let router = DebugServer::builder()
        .symbol_table(Arc::new(LiveSymbolTable::empty()))
        .build()
        .router();

    let (_, _, body) = get_text(router, "/symbol?0x3039").await;
    assert_eq!(body, "num_symbols: 0\n");
}

#[tokio::test]
async fn test_profile_binary_returns_raw_capture() {
    let raw = cpu_capture();
    let router = builder(raw.clone()).build().router();

    let request = Request::builder()
        .uri("/profile?seconds=0.05&binary=true")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/octet-stream");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.to_vec(), raw);
}

#[tokio::test]
async fn test_profile_text_keeps_unresolved_addresses() {
    let (status, content_type, body) = get_text(router(), "/profile?seconds=0.05").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "text/plain; charset=utf-8");
    assert!(body.starts_with("Type: cpu\n"));
    assert!(body.contains("app::handler"));
    assert!(body.contains("0xdead"));
    assert!(!body.contains("Failed to symbolize"));
}

#[tokio::test]
async fn test_profile_text_cumulative_sort() {
    let (_, _, body) = get_text(router(), "/profile?seconds=0.05&cum=1").await;

    let first_row = body.lines().nth(4).unwrap();
    assert!(first_row.ends_with("main"), "unexpected first row: {first_row}");
}

#[tokio::test]
async fn test_profile_symbolization_failure_is_reported_inline() {
    let router = builder(cpu_capture()).symbol_resolver(Arc::new(FailingResolver)).build().router();

    let (status, _, body) = get_text(router, "/profile?seconds=0.05").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(
        "Failed to symbolize profile: symbol endpoint http://test/symbol returned HTTP 502\n"
    ));
    assert!(body.contains("0x3039"));
}

#[tokio::test]
async fn test_profile_parse_failure() {
    let router = builder(b"garbage".to_vec())
        .symbol_resolver(Arc::new(FailingResolver))
        .build()
        .router();

    let (status, _, body) = get_text(router, "/profile?seconds=0.05").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("Failed to parse profile: "));
}

#[tokio::test]
async fn test_concurrent_profiles_one_fails_fast() {
    let router = router();

    let first = tokio::spawn(get_text(router.clone(), "/profile?seconds=1&binary=1"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    let (status, _, body) = get_text(router, "/profile?seconds=1&binary=1").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Could not enable CPU profiling: CPU profile capture already active\n");
    assert!(started.elapsed() < Duration::from_millis(500));

    let (status, _, _) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_trace_is_binary() {
    let (status, content_type, body) = get_text(router(), "/trace?seconds=0.05").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/octet-stream");
    assert_eq!(body, r#"{"traceEvents":[]}"#);
}

#[tokio::test]
async fn test_unknown_profile_is_404() {
    let (status, _, body) = get_text(router(), "/goroutine?debug=2").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Unknown profile: goroutine\n");
}

#[tokio::test]
async fn test_heap_gc_runs_reclaimer_first() {
    let dir = tempfile::tempdir().unwrap();
    let status_path = dir.path().join("status");
    std::fs::write(&status_path, "VmRSS:\t  2048 kB\n").unwrap();

    let reclaimer = Arc::new(CountingReclaimer::default());
    let mut profiles = ProfileRegistry::new();
    profiles.register(Arc::new(HeapProfile::new(status_path, reclaimer.clone())));
    let router = builder(cpu_capture()).profiles(profiles).build().router();

    let (status, _, body) = get_text(router.clone(), "/heap?gc=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "VmRSS: 2048 kB\n");
    assert_eq!(reclaimer.0.load(Ordering::SeqCst), 0);

    get_text(router, "/heap?gc=1").await;
    assert_eq!(reclaimer.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cmdline_is_nul_joined() {
    let (status, _, body) = send(router(), Method::POST, "/cmdline", "").await;

    let expected: Vec<String> = std::env::args().collect();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, expected.join("\0"));
}

#[tokio::test]
async fn test_index_lists_profiles() {
    let (status, content_type, body) = get_text(router(), "/").await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("text/html"));
    assert!(body.contains("<a href=\"heap?debug=1\">heap</a>"));
    assert!(body.contains("<a href=\"threads?debug=1\">threads</a>"));
}

#[tokio::test]
async fn test_custom_index_template() {
    let router = builder(cpu_capture())
        .profiles(ProfileRegistry::new())
        .index_template("<ul>{{profiles}}</ul>")
        .build()
        .router();

    let (_, _, body) = get_text(router, "/").await;
    assert_eq!(body, "<ul></ul>");
}

#[tokio::test]
async fn test_middleware_wraps_router() {
    let router = builder(cpu_capture())
        .middleware(|router| router.route("/healthz", get(|| async { "ok" })))
        .build()
        .router();

    let (status, _, body) = get_text(router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

/// Full round trip over TCP: the text report resolves addresses by calling
/// the server's own `/symbol` endpoint
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_profile_self_symbolization_over_http() {
    let router = builder(cpu_capture()).build().router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    let body = tokio::task::spawn_blocking(move || {
        ureq::get(&format!("http://{addr}/profile?seconds=0.05"))
            .call()
            .unwrap()
            .into_string()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(!body.contains("Failed to symbolize"), "{body}");
    assert!(body.contains("app::handler"));
    assert!(body.contains("0xdead"));
}

#[inline(never)]
fn marker_function_for_lookup() -> u64 {
    std::hint::black_box(42)
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_live_symbol_table_resolves_own_functions() {
    let table = LiveSymbolTable::load_current().unwrap();
    assert!(!table.is_empty());

    let pc = marker_function_for_lookup as usize as u64;
    assert_eq!(marker_function_for_lookup(), 42);
    let name = table.lookup(pc).unwrap();
    assert!(name.ends_with("marker_function_for_lookup"), "resolved to {name}");

    let router = builder(cpu_capture()).symbol_table(Arc::new(table)).build().router();
    let (_, _, body) = get_text(router, &format!("/symbol?{pc:#x}")).await;
    assert!(body.starts_with("num_symbols: 1\n"));
    assert!(body.contains("marker_function_for_lookup"));
}
