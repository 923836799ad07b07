//! Timed capture controller
//!
//! Bounds a capture to the requested window and ends it early when the HTTP
//! client goes away. The capture is always stopped before the controller
//! returns; if the controller future itself is dropped, dropping the
//! [`ActiveCapture`] stops it instead.

use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::domain::{CaptureError, CaptureKind};
use crate::sampler::{ActiveCapture, SamplerGateway};

/// Which event ended the wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The requested duration elapsed
    Elapsed,
    /// The response could no longer be delivered
    ClientGone,
}

/// Bytes produced by one capture, owned by the request that asked for it
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub bytes: Vec<u8>,
    /// Observed wait window
    pub window: Duration,
    pub outcome: WaitOutcome,
}

/// Run one capture for at most `duration`
///
/// `start` is invoked once. If it fails the error is returned right away and
/// nothing needs stopping. Otherwise the wait ends when `duration` elapses or
/// `client_gone` resolves, whichever comes first, and the capture is stopped
/// on the blocking pool.
///
/// # Errors
/// Returns the start error, or the stop error if serialization fails
pub async fn run_bounded_capture<S, G>(
    start: S,
    duration: Duration,
    client_gone: G,
) -> Result<RawCapture, CaptureError>
where
    S: FnOnce() -> Result<ActiveCapture, CaptureError>,
    G: Future<Output = ()>,
{
    let capture = start()?;
    let kind = capture.kind();
    let began = tokio::time::Instant::now();

    let outcome = tokio::select! {
        () = tokio::time::sleep(duration) => WaitOutcome::Elapsed,
        () = client_gone => WaitOutcome::ClientGone,
    };
    let window = began.elapsed();
    if outcome == WaitOutcome::ClientGone {
        debug!("Client disconnected after {window:?} of a {duration:?} {kind} capture");
    }

    let bytes = tokio::task::spawn_blocking(move || capture.stop())
        .await
        .map_err(|e| CaptureError::Aborted(e.to_string()))??;

    Ok(RawCapture { bytes, window, outcome })
}

/// Run a capture in its own task, tied to the caller's lifetime
///
/// The caller keeps the sending half of a oneshot channel while it waits.
/// When the caller is dropped (hyper drops the handler future on client
/// disconnect) the channel closes and the capture ends early.
///
/// # Errors
/// See [`run_bounded_capture`]
pub async fn capture_until_disconnect(
    sampler: SamplerGateway,
    kind: CaptureKind,
    duration: Duration,
) -> Result<RawCapture, CaptureError> {
    let (alive, gone) = oneshot::channel::<()>();

    let task = tokio::spawn(run_bounded_capture(
        move || sampler.start(kind),
        duration,
        async move {
            let _ = gone.await;
        },
    ));

    let result = task.await.map_err(|e| CaptureError::Aborted(e.to_string()))?;
    drop(alive);
    result
}
