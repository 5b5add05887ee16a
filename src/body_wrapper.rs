//! Body capture for request and response bodies in flight.
//!
//! A captured body keeps streaming to whoever reads it; the bytes are copied
//! aside as they pass and become available once the stream ends.

use axum::body::{Body, Bytes};
use bytes::BytesMut;
use futures::{Future, StreamExt};
use std::pin::Pin;
use tokio::sync::mpsc;
use tracing::error;

/// Error type for body capture operations
#[derive(Debug, thiserror::Error)]
pub enum BodyCaptureError {
    #[error("Body stream error: {0}")]
    StreamError(String),
}

/// Resolves to the full body once the tee'd stream has been read to the end
/// or dropped.
pub type CapturedBody = Pin<Box<dyn Future<Output = Result<Bytes, BodyCaptureError>> + Send>>;

/// Tee `body` into a pass-through body and a future of its captured bytes.
///
/// The capture future only makes progress as the returned body is polled. If
/// the returned body is dropped part way, the future resolves to the bytes
/// seen so far.
///
/// # Examples
///
/// ```rust
/// use tripwire_log::body_wrapper::capture_body;
/// use axum::body::Body;
/// use http_body_util::BodyExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (body, captured) = capture_body(Body::from("Hello, World!"));
///
/// // Whoever owns `body` reads it as usual...
/// let sent = body.collect().await?.to_bytes();
/// // ...and the copy is ready afterwards.
/// assert_eq!(captured.await?, sent);
/// # Ok(())
/// # }
/// ```
pub fn capture_body(body: Body) -> (Body, CapturedBody) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let tee = body.into_data_stream().map(move |result| {
        let copy = match &result {
            Ok(chunk) => Ok(chunk.clone()),
            Err(e) => {
                error!(error = %e, "Stream error during body capture");
                Err(BodyCaptureError::StreamError(e.to_string()))
            }
        };
        // The receiver may be gone if nobody waits for the capture.
        let _ = tx.send(copy);
        result
    });

    let captured = Box::pin(async move {
        let mut buffer = BytesMut::new();
        while let Some(chunk_result) = rx.recv().await {
            match chunk_result {
                Ok(chunk) => buffer.extend_from_slice(&chunk),
                Err(e) => return Err(e),
            }
        }
        Ok(buffer.freeze())
    });

    (Body::from_stream(tee), captured)
}
