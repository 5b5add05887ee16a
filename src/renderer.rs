//! Renderers turn a [`RoundTripRecord`] into human-readable text.
//!
//! A renderer writes into whatever [`fmt::Write`] sink it is handed; owning and
//! recycling that sink is the formatter's job (see [`crate::formatter`]).

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::types::RoundTripRecord;

/// Writes a log line describing a round trip.
///
/// Implementations may keep scratch state between calls, which is why
/// `render` takes `&mut self`: the pooled formatter hands every call an
/// exclusively borrowed renderer.
pub trait RoundTripRenderer: Send + 'static {
    /// Error raised when the renderer cannot produce its output.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Write the description of `record` into `out`.
    fn render(
        &mut self,
        record: &RoundTripRecord,
        out: &mut dyn fmt::Write,
    ) -> Result<(), Self::Error>;

    /// Whether the transport should capture the request body for this renderer.
    fn request_body_enabled(&self) -> bool;

    /// Whether the transport should capture the response body for this renderer.
    fn response_body_enabled(&self) -> bool;
}

/// Configuration for [`TextRenderer`].
///
/// # Examples
///
/// ```rust
/// use tripwire_log::TextRendererConfig;
///
/// let config = TextRendererConfig {
///     request_body: true,
///     ..Default::default()
/// };
/// assert!(!config.response_body);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TextRendererConfig {
    /// Append the request body, one `> ` line per body line
    pub request_body: bool,
    /// Append the response body, one `< ` line per body line
    pub response_body: bool,
}

/// Plain-text renderer.
///
/// Produces one summary line per round trip:
///
/// ```text
/// 2020-09-13T12:26:40Z GET http://localhost/ping [status:200 request:12ms]
/// ```
///
/// followed by optional body lines and an `! ERROR:` line when the transport
/// failed. Every line, the last one included, ends with `\n`.
#[derive(Clone, Debug, Default)]
pub struct TextRenderer {
    config: TextRendererConfig,
}

impl TextRenderer {
    /// Renderer writing the bodies `config` asks for.
    pub fn new(config: TextRendererConfig) -> Self {
        Self { config }
    }
}

impl RoundTripRenderer for TextRenderer {
    type Error = fmt::Error;

    fn render(&mut self, record: &RoundTripRecord, out: &mut dyn fmt::Write) -> fmt::Result {
        let start: DateTime<Utc> = record.start.into();
        let status = record
            .status()
            .map(|status| i32::from(status.as_u16()))
            .unwrap_or(-1);

        writeln!(
            out,
            "{} {} {} [status:{} request:{}]",
            start.to_rfc3339_opts(SecondsFormat::Secs, true),
            record.request.method,
            record.request.uri,
            status,
            format_duration(record.duration),
        )?;

        if self.config.request_body {
            if let Some(body) = &record.request.body {
                write_body(out, body, '>')?;
            }
        }
        if self.config.response_body {
            if let Some(body) = record.response.as_ref().and_then(|r| r.body.as_ref()) {
                write_body(out, body, '<')?;
            }
        }
        if let Some(error) = &record.error {
            writeln!(out, "! ERROR: {error}")?;
        }
        Ok(())
    }

    fn request_body_enabled(&self) -> bool {
        self.config.request_body
    }

    fn response_body_enabled(&self) -> bool {
        self.config.response_body
    }
}

fn write_body(out: &mut dyn fmt::Write, body: &[u8], marker: char) -> fmt::Result {
    let text = String::from_utf8_lossy(body);
    for line in text.lines() {
        writeln!(out, "{marker} {line}")?;
    }
    Ok(())
}

/// Millisecond-truncated duration: `0s`, `250ms`, `1.5s`, `12s`.
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    match millis {
        0 => "0s".to_string(),
        1..=999 => format!("{millis}ms"),
        _ => {
            let secs = millis / 1000;
            let frac = millis % 1000;
            if frac == 0 {
                format!("{secs}s")
            } else {
                let frac = format!("{frac:03}");
                format!("{secs}.{}s", frac.trim_end_matches('0'))
            }
        }
    }
}
