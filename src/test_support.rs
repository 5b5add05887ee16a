//! Mocks shared by the unit tests.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::http::{Method, StatusCode, Uri};

use crate::formatter::LogFormatter;
use crate::renderer::RoundTripRenderer;
use crate::types::{RequestData, ResponseData, RoundTripRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mock failure: {0}")]
pub struct MockError(pub String);

type RenderFn = Arc<dyn Fn(&RoundTripRecord) -> Result<String, MockError> + Send + Sync>;

/// Renderer that writes whatever its closure returns.
#[derive(Clone)]
pub struct MockRenderer {
    pub render: RenderFn,
    pub request_body_enabled: bool,
    pub response_body_enabled: bool,
}

impl MockRenderer {
    pub fn new<F>(render: F) -> Self
    where
        F: Fn(&RoundTripRecord) -> Result<String, MockError> + Send + Sync + 'static,
    {
        Self {
            render: Arc::new(render),
            request_body_enabled: false,
            response_body_enabled: false,
        }
    }

    pub fn returning(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }
}

impl RoundTripRenderer for MockRenderer {
    type Error = MockError;

    fn render(
        &mut self,
        record: &RoundTripRecord,
        out: &mut dyn fmt::Write,
    ) -> Result<(), MockError> {
        let text = (self.render)(record)?;
        out.write_str(&text)
            .map_err(|e| MockError(e.to_string()))
    }

    fn request_body_enabled(&self) -> bool {
        self.request_body_enabled
    }

    fn response_body_enabled(&self) -> bool {
        self.response_body_enabled
    }
}

/// Formatter that returns whatever its closure returns, bypassing any renderer.
#[derive(Clone)]
pub struct MockFormatter {
    pub format: RenderFn,
    pub request_body_enabled: bool,
    pub response_body_enabled: bool,
}

impl MockFormatter {
    pub fn new<F>(format: F) -> Self
    where
        F: Fn(&RoundTripRecord) -> Result<String, MockError> + Send + Sync + 'static,
    {
        Self {
            format: Arc::new(format),
            request_body_enabled: false,
            response_body_enabled: false,
        }
    }

    pub fn returning(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn failing(error: MockError) -> Self {
        Self::new(move |_| Err(error.clone()))
    }
}

impl LogFormatter for MockFormatter {
    type Error = MockError;

    fn format(&self, record: &RoundTripRecord) -> Result<String, MockError> {
        (self.format)(record)
    }

    fn request_body_enabled(&self) -> bool {
        self.request_body_enabled
    }

    fn response_body_enabled(&self) -> bool {
        self.response_body_enabled
    }
}

pub fn record_with_status(status: u16) -> RoundTripRecord {
    RoundTripRecord::completed(
        RequestData::new(Method::GET, Uri::from_static("http://dummy/dummy")),
        ResponseData::new(StatusCode::from_u16(status).unwrap()),
        SystemTime::now(),
        Duration::from_millis(1234),
    )
}
