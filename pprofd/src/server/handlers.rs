//! HTTP handlers
//!
//! Every handler answers with a fully buffered body. Capture handlers spawn
//! the capture in its own task (see [`capture_until_disconnect`]); blocking
//! work runs on the blocking pool.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use http_body_util::BodyExt;
use log::{debug, warn};
use pprofd_common::{
    format_num_symbols, format_symbol_line, parse_program_counter, TokenSplitter, READ_ERROR_PREFIX,
};
use std::collections::HashMap;
use std::sync::Arc;

use super::index::render_index;
use super::AppState;
use crate::capture::capture_until_disconnect;
use crate::domain::{
    parse_int, CaptureError, CaptureKind, CaptureRequest, PipelineError, ProfileError,
};
use crate::pipeline::{self, HttpSymbolResolver, SymbolResolver};
use crate::symbolization::SymbolLookup;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

type Params = Query<HashMap<String, String>>;

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params.get(name).map(String::as_str)
}

fn text(status: StatusCode, body: impl Into<Body>) -> Response {
    (status, [(header::CONTENT_TYPE, TEXT_PLAIN)], body.into()).into_response()
}

fn binary(bytes: Vec<u8>) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, OCTET_STREAM)], bytes).into_response()
}

/// Start errors are reported as "could not enable", everything else as a failed capture
fn capture_failure(kind: CaptureKind, error: &CaptureError) -> Response {
    let verb = match kind {
        CaptureKind::Cpu => "CPU profiling",
        CaptureKind::Trace => "tracing",
    };
    let message = match error {
        CaptureError::AlreadyActive(_) | CaptureError::Sampler(_) => {
            format!("Could not enable {verb}: {error}\n")
        }
        CaptureError::Encode(_) | CaptureError::Aborted(_) => {
            format!("Failed to capture {kind}: {error}\n")
        }
    };
    warn!("{}", message.trim_end());
    text(StatusCode::INTERNAL_SERVER_ERROR, message)
}

/// Parse failures and aborted pipeline tasks are both HTTP 500
fn pipeline_failure(error: &PipelineError) -> Response {
    let message = match error {
        PipelineError::Parse(_) => format!("Failed to parse profile: {error}\n"),
        PipelineError::Aborted(_) => format!("Failed to render profile: {error}\n"),
    };
    warn!("{}", message.trim_end());
    text(StatusCode::INTERNAL_SERVER_ERROR, message)
}

/// `GET /`
pub async fn index(State(state): State<AppState>) -> Response {
    let template = Arc::clone(&state.index_template);
    let profiles = state.profiles.clone();

    match tokio::task::spawn_blocking(move || render_index(&template, &profiles)).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to render index: {e}\n")),
    }
}

/// `/cmdline`: argv joined by NUL bytes
pub async fn cmdline() -> Response {
    let args: Vec<String> =
        std::env::args_os().map(|arg| arg.to_string_lossy().into_owned()).collect();
    text(StatusCode::OK, args.join("\0"))
}

/// `/profile?seconds=&binary=&cum=`
pub async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Params,
) -> Response {
    let request = CaptureRequest::cpu(
        param(&params, "seconds"),
        param(&params, "binary"),
        param(&params, "cum"),
    );
    debug!("CPU profile requested for {:?} (binary: {})", request.duration, request.want_binary);

    let raw = match capture_until_disconnect(state.sampler.clone(), request.kind, request.duration).await {
        Ok(raw) => raw,
        Err(e) => return capture_failure(request.kind, &e),
    };

    if request.want_binary {
        return binary(raw.bytes);
    }

    let resolver: Arc<dyn SymbolResolver> = match &state.resolver {
        Some(resolver) => Arc::clone(resolver),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .unwrap_or(&state.addr);
            Arc::new(HttpSymbolResolver::for_host(state.scheme, host))
        }
    };
    let options = request.report_options();

    let rendered = tokio::task::spawn_blocking(move || {
        pipeline::render(&raw.bytes, &options, resolver.as_ref())
    })
    .await
    .unwrap_or_else(|e| Err(PipelineError::Aborted(e.to_string())));

    match rendered {
        Ok(report) => text(StatusCode::OK, report.into_text()),
        Err(e) => pipeline_failure(&e),
    }
}

/// `/trace?seconds=`
pub async fn trace(State(state): State<AppState>, Query(params): Params) -> Response {
    let request = CaptureRequest::trace(param(&params, "seconds"));
    debug!("Execution trace requested for {:?}", request.duration);

    match capture_until_disconnect(state.sampler.clone(), request.kind, request.duration).await {
        Ok(raw) => binary(raw.bytes),
        Err(e) => capture_failure(request.kind, &e),
    }
}

/// `/symbol`: program counters from the query string, or the body for POST
pub async fn symbol(State(state): State<AppState>, method: Method, uri: Uri, body: Body) -> Response {
    let symbols = state.symbols.as_ref();
    let mut out = format_num_symbols(!symbols.is_empty());
    let mut splitter = TokenSplitter::new();

    if method == Method::POST {
        let mut body = body;
        let mut read_error = None;

        while let Some(frame) = body.frame().await {
            match frame {
                Ok(frame) => {
                    if let Ok(data) = frame.into_data() {
                        splitter.push(&data, |token| lookup_token(symbols, token, &mut out));
                    }
                }
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }
        }

        splitter.finish(|token| lookup_token(symbols, token, &mut out));
        if let Some(e) = read_error {
            out.push_str(&format!("{READ_ERROR_PREFIX} {e}\n"));
        }
    } else {
        let query = uri.query().unwrap_or_default();
        splitter.push(query.as_bytes(), |token| lookup_token(symbols, token, &mut out));
        splitter.finish(|token| lookup_token(symbols, token, &mut out));
    }

    text(StatusCode::OK, out)
}

fn lookup_token(symbols: &dyn SymbolLookup, token: &[u8], out: &mut String) {
    let Some(pc) = parse_program_counter(token).filter(|pc| *pc != 0) else {
        return;
    };
    if let Some(name) = symbols.lookup(pc) {
        out.push_str(&format_symbol_line(pc, &name));
    }
}

/// `/<name>?debug=&gc=`: named profiles
pub async fn named_profile(State(state): State<AppState>, uri: Uri, Query(params): Params) -> Response {
    let name = uri.path().trim_start_matches('/').to_string();
    let debug = parse_int(param(&params, "debug"));
    let gc = parse_int(param(&params, "gc"));
    let profiles = state.profiles.clone();

    match tokio::task::spawn_blocking(move || profiles.dump(&name, debug, gc)).await {
        Ok(Ok(bytes)) => text(StatusCode::OK, bytes),
        Ok(Err(e @ ProfileError::Unknown(_))) => text(StatusCode::NOT_FOUND, format!("{e}\n")),
        Ok(Err(e)) => {
            warn!("{e}");
            text(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n"))
        }
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to dump profile: {e}\n")),
    }
}
