//! # Tripwire Log
//!
//! Bridges an HTTP client transport's round-trip logging hook to structured
//! `tracing` logs.
//!
//! Every completed (or failed) round trip is rendered into one text line and
//! emitted at a severity derived from the response status.
//!
//! ## Building blocks
//!
//! - [`RoundTripRenderer`]: writes the text for a round trip ([`TextRenderer`]
//!   is the default)
//! - [`LogFormatter`]: turns a round trip into a message; [`PooledFormatter`]
//!   lends each call its own renderer and buffer, so it is safe to share
//!   between concurrent transports
//! - [`PrefixedFormatter`]: prepends a fixed prefix to another formatter's output
//! - [`RoundTripLogger`]: picks the severity and emits into a [`LogSink`]
//! - [`RoundTripLogLayer`]: tower middleware that plugs any [`RoundTripHook`]
//!   into a `tower::Service` transport
//!
//! ## Quick Start
//!
//! ```rust
//! use axum::body::Body;
//! use axum::http::{Request, Response};
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//! use tripwire_log::{default_logger, RoundTripLogLayer};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), std::convert::Infallible> {
//! // Any tower service that performs the HTTP exchange will do.
//! let transport = service_fn(|_request: Request<Body>| async {
//!     Ok::<_, std::convert::Infallible>(Response::new(Body::from("pong")))
//! });
//!
//! let client = ServiceBuilder::new()
//!     .layer(RoundTripLogLayer::new(default_logger()))
//!     .service(transport);
//!
//! // Emits a DEBUG event like
//! // "2024-05-01T09:30:00Z GET http://search.local/_ping [status:200 request:0s]"
//! let response = client
//!     .oneshot(Request::get("http://search.local/_ping").body(Body::empty()).unwrap())
//!     .await?;
//! assert!(response.status().is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Hooks
//!
//! Implement [`RoundTripHook`] to route round trips somewhere other than a
//! formatter + sink pair:
//!
//! ```rust
//! use tripwire_log::{RoundTripHook, types::RoundTripRecord};
//!
//! struct SlowCallHook;
//!
//! impl RoundTripHook for SlowCallHook {
//!     type Error = std::convert::Infallible;
//!
//!     fn log_round_trip(&self, record: &RoundTripRecord) -> Result<(), Self::Error> {
//!         if record.duration.as_secs() >= 1 {
//!             println!("slow call: {} {}", record.request.method, record.request.uri);
//!         }
//!         Ok(())
//!     }
//!
//!     fn request_body_enabled(&self) -> bool {
//!         false
//!     }
//!
//!     fn response_body_enabled(&self) -> bool {
//!         false
//!     }
//! }
//! ```

use axum::{body::Body, extract::Request, response::Response};
use futures::{future::BoxFuture, FutureExt};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::{Instant, SystemTime},
};
use tower::{Layer, Service};
use tracing::{debug, error, info_span, Instrument, Span};

pub mod types;
pub use types::{RequestData, ResponseData, RoundTripRecord};

pub mod body_wrapper;
use body_wrapper::{capture_body, BodyCaptureError, CapturedBody};

pub mod renderer;
pub use renderer::{RoundTripRenderer, TextRenderer, TextRendererConfig};

pub mod formatter;
pub use formatter::{default_formatter, LogFormatter, PooledFormatter};

pub mod prefix;
pub use prefix::PrefixedFormatter;

pub mod logger;
pub use logger::{default_logger, default_severity, LogSink, RoundTripLogger, Severity, TracingSink};

#[cfg(test)]
mod test_support;

/// Global atomic counter for correlation IDs and process start timestamp
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(1);
static PROCESS_START_TIME: std::sync::OnceLock<u64> = std::sync::OnceLock::new();

/// Generate a unique correlation ID combining process start time and counter
fn generate_correlation_id() -> u64 {
    let start_time = *PROCESS_START_TIME.get_or_init(|| {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    });

    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);

    // High 32 bits: process start timestamp, Low 32 bits: counter
    (start_time << 32) | (counter & 0xFFFFFFFF)
}

/// Logging hook a transport calls once per round trip.
///
/// The two flags tell the transport whether it has to capture request and
/// response bodies before calling [`log_round_trip`](Self::log_round_trip);
/// bodies are left out of the record otherwise.
pub trait RoundTripHook: Send + Sync + 'static {
    /// Error raised when the round trip could not be logged.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Log one completed or failed round trip.
    fn log_round_trip(&self, record: &RoundTripRecord) -> Result<(), Self::Error>;

    /// Whether the transport should capture request bodies.
    fn request_body_enabled(&self) -> bool;

    /// Whether the transport should capture response bodies.
    fn response_body_enabled(&self) -> bool;
}

impl<H: RoundTripHook + ?Sized> RoundTripHook for Arc<H> {
    type Error = H::Error;

    fn log_round_trip(&self, record: &RoundTripRecord) -> Result<(), H::Error> {
        (**self).log_round_trip(record)
    }

    fn request_body_enabled(&self) -> bool {
        (**self).request_body_enabled()
    }

    fn response_body_enabled(&self) -> bool {
        (**self).response_body_enabled()
    }
}

/// Tower layer that logs every round trip through a transport service.
///
/// The wrapped service is the transport: it receives the outgoing request and
/// resolves to the upstream response. Requests and responses pass through
/// untouched, apart from bodies being tee'd when the hook asks for them.
///
/// # Examples
///
/// ```rust
/// use tripwire_log::{PooledFormatter, RoundTripLogLayer, RoundTripLogger, TextRendererConfig};
///
/// let formatter = PooledFormatter::text(TextRendererConfig {
///     request_body: true,
///     response_body: false,
/// });
/// let layer = RoundTripLogLayer::new(RoundTripLogger::new(formatter));
/// # let _ = layer;
/// ```
pub struct RoundTripLogLayer<H> {
    hook: Arc<H>,
}

impl<H: RoundTripHook> RoundTripLogLayer<H> {
    /// Wrap transports so every round trip is handed to `hook`.
    pub fn new(hook: H) -> Self {
        Self {
            hook: Arc::new(hook),
        }
    }

    /// Share an existing hook between several layers.
    pub fn from_shared(hook: Arc<H>) -> Self {
        Self { hook }
    }
}

impl<H> Clone for RoundTripLogLayer<H> {
    fn clone(&self) -> Self {
        Self {
            hook: self.hook.clone(),
        }
    }
}

impl<S, H> Layer<S> for RoundTripLogLayer<H> {
    type Service = RoundTripLogService<S, H>;

    fn layer(&self, inner: S) -> Self::Service {
        RoundTripLogService {
            inner,
            hook: self.hook.clone(),
        }
    }
}

/// Tower service created by [`RoundTripLogLayer`].
///
/// The response is handed back as soon as the transport produces it. When a
/// captured body is still in flight at that point (any response body, or a
/// request body the transport has not finished with), the entry is emitted
/// from a spawned task once that body is complete, so a Tokio runtime must be
/// running.
pub struct RoundTripLogService<S, H> {
    inner: S,
    hook: Arc<H>,
}

impl<S: Clone, H> Clone for RoundTripLogService<S, H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            hook: self.hook.clone(),
        }
    }
}

impl<S, H> Service<Request> for RoundTripLogService<S, H>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
    H: RoundTripHook,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let correlation_id = generate_correlation_id();
        let start = SystemTime::now();
        let started = Instant::now();

        let span = info_span!(
            "round_trip",
            correlation_id = %correlation_id,
            method = %request.method(),
            uri = %request.uri(),
        );

        let mut request_data = RequestData {
            correlation_id,
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            body: None,
        };

        let request_capture = if self.hook.request_body_enabled() {
            span.in_scope(|| debug!("Wrapping request body for capture"));
            let body = std::mem::replace(request.body_mut(), Body::empty());
            let (body, capture) = capture_body(body);
            *request.body_mut() = body;
            Some(capture)
        } else {
            None
        };

        let hook = self.hook.clone();
        let future = self.inner.call(request);

        Box::pin(
            async move {
                debug!("Awaiting transport response");
                let result = future.await;
                let duration = started.elapsed();

                // A transport may answer before it has finished with the
                // request body, so the capture is only taken if already done.
                let mut request_capture = request_capture;
                if let Some(capture) = request_capture.as_mut() {
                    if let Some(captured) = capture.as_mut().now_or_never() {
                        request_data.body = captured_body(captured, correlation_id, "request");
                        request_capture = None;
                    }
                }

                match result {
                    Ok(mut response) => {
                        let response_data = ResponseData {
                            status: response.status(),
                            headers: response.headers().clone(),
                            body: None,
                        };

                        let response_capture = if hook.response_body_enabled() {
                            debug!("Wrapping response body for capture");
                            let body = std::mem::replace(response.body_mut(), Body::empty());
                            let (body, capture) = capture_body(body);
                            *response.body_mut() = body;
                            Some(capture)
                        } else {
                            None
                        };

                        let record =
                            RoundTripRecord::completed(request_data, response_data, start, duration);
                        log_when_captured(hook, record, request_capture, response_capture);

                        Ok(response)
                    }
                    Err(e) => {
                        let record =
                            RoundTripRecord::failed(request_data, e.to_string(), start, duration);
                        log_when_captured(hook, record, request_capture, None);
                        Err(e)
                    }
                }
            }
            .instrument(span),
        )
    }
}

/// Log `record` once every pending body capture has resolved.
///
/// With nothing pending the hook runs inline. Otherwise the bodies only
/// complete once the caller (or the transport) has read or dropped them, so
/// the wait moves to a spawned task and the response goes back right away.
fn log_when_captured<H: RoundTripHook>(
    hook: Arc<H>,
    mut record: RoundTripRecord,
    request_capture: Option<CapturedBody>,
    response_capture: Option<CapturedBody>,
) {
    if request_capture.is_none() && response_capture.is_none() {
        log_round_trip(hook.as_ref(), &record);
        return;
    }

    let correlation_id = record.request.correlation_id;
    debug!("Deferring log entry until captured bodies are complete");
    tokio::spawn(
        async move {
            if let Some(capture) = request_capture {
                record.request.body = await_capture(capture, correlation_id, "request").await;
            }
            if let Some(capture) = response_capture {
                let body = await_capture(capture, correlation_id, "response").await;
                if let Some(response) = record.response.as_mut() {
                    response.body = body;
                }
            }
            log_round_trip(hook.as_ref(), &record);
        }
        .instrument(Span::current()),
    );
}

async fn await_capture(
    capture: CapturedBody,
    correlation_id: u64,
    side: &'static str,
) -> Option<bytes::Bytes> {
    captured_body(capture.await, correlation_id, side)
}

fn captured_body(
    captured: Result<bytes::Bytes, BodyCaptureError>,
    correlation_id: u64,
    side: &'static str,
) -> Option<bytes::Bytes> {
    match captured {
        Ok(body) => Some(body),
        Err(e) => {
            error!(correlation_id = %correlation_id, error = %e, "Error capturing {side} body");
            None
        }
    }
}

fn log_round_trip<H: RoundTripHook>(hook: &H, record: &RoundTripRecord) {
    if let Err(e) = hook.log_round_trip(record) {
        error!(
            correlation_id = %record.request.correlation_id,
            error = %e,
            "Failed to log round trip"
        );
    }
}
