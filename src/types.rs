//! Data types describing one HTTP round trip.
//!
//! A [`RoundTripRecord`] is what a transport hands to its logging hook once a
//! request has completed (or failed). Every formatter and logger in this crate
//! only ever borrows it.

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use bytes::Bytes;
use std::time::{Duration, SystemTime};

/// The request half of a round trip.
///
/// # Examples
///
/// ```rust
/// use tripwire_log::types::RequestData;
/// use axum::http::{Method, Uri};
///
/// let request = RequestData::new(Method::GET, Uri::from_static("http://localhost/health"));
/// assert!(request.body.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct RequestData {
    /// Identifier shared by every log line emitted for this round trip
    pub correlation_id: u64,
    /// HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Full request URI
    pub uri: Uri,
    /// Request headers as sent by the transport
    pub headers: HeaderMap,
    /// Request body bytes, only present when the hook asked for request bodies
    pub body: Option<Bytes>,
}

impl RequestData {
    /// Request with no headers or body, and correlation id `0`.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            correlation_id: 0,
            method,
            uri,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// The response half of a round trip.
#[derive(Debug, Clone)]
pub struct ResponseData {
    /// HTTP status code (200, 404, 500, etc.)
    pub status: StatusCode,
    /// Response headers as received by the transport
    pub headers: HeaderMap,
    /// Response body bytes, only present when the hook asked for response bodies
    pub body: Option<Bytes>,
}

impl ResponseData {
    /// Response with no headers and no body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// Everything known about one request/response cycle.
///
/// `response` is `None` when the transport failed before any response was
/// received; `error` then carries the transport's error message.
#[derive(Debug, Clone)]
pub struct RoundTripRecord {
    pub request: RequestData,
    pub response: Option<ResponseData>,
    pub error: Option<String>,
    /// When the request was handed to the transport
    pub start: SystemTime,
    /// Time from `start` until the response headers (or the error) arrived
    pub duration: Duration,
}

impl RoundTripRecord {
    /// Record for a round trip that produced a response.
    pub fn completed(
        request: RequestData,
        response: ResponseData,
        start: SystemTime,
        duration: Duration,
    ) -> Self {
        Self {
            request,
            response: Some(response),
            error: None,
            start,
            duration,
        }
    }

    /// Record for a round trip the transport could not complete.
    pub fn failed(
        request: RequestData,
        error: impl Into<String>,
        start: SystemTime,
        duration: Duration,
    ) -> Self {
        Self {
            request,
            response: None,
            error: Some(error.into()),
            start,
            duration,
        }
    }

    /// Status code of the response, if there was one.
    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|response| response.status)
    }
}
