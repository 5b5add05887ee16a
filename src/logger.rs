//! Severity routing of formatted round trips into a structured log sink.
//!
//! [`RoundTripLogger`] is the [`RoundTripHook`] most transports want: it asks a
//! [`LogFormatter`] for the message, picks a [`Severity`] from the response
//! status and hands both to a [`LogSink`]. The default sink emits `tracing`
//! events, so the entries pick up whatever span is current at the call site.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::formatter::{default_formatter, LogFormatter, PooledFormatter};
use crate::renderer::TextRenderer;
use crate::types::RoundTripRecord;
use crate::RoundTripHook;

/// Target of every event emitted by [`TracingSink`].
pub const ROUND_TRIP_TARGET: &str = "tripwire_log::round_trip";

/// Level attached to an emitted round trip entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Upper-case level name, e.g. `"WARNING"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default status to severity mapping.
///
/// Anything below 400 is `Debug`. Client errors, server errors and round
/// trips that never got a response all share the `Warning` bucket.
pub fn default_severity(record: &RoundTripRecord) -> Severity {
    match record.status() {
        Some(status) if status.as_u16() < 400 => Severity::Debug,
        _ => Severity::Warning,
    }
}

/// Destination of formatted round trip entries.
pub trait LogSink: Send + Sync + 'static {
    /// Append one entry.
    fn emit(&self, severity: Severity, message: &str);
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn emit(&self, severity: Severity, message: &str) {
        (**self).emit(severity, message);
    }
}

/// [`LogSink`] that emits `tracing` events under [`ROUND_TRIP_TARGET`].
///
/// `Warning` maps to `tracing::Level::WARN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => debug!(target: ROUND_TRIP_TARGET, "{message}"),
            Severity::Info => info!(target: ROUND_TRIP_TARGET, "{message}"),
            Severity::Warning => warn!(target: ROUND_TRIP_TARGET, "{message}"),
            Severity::Error => error!(target: ROUND_TRIP_TARGET, "{message}"),
        }
    }
}

type SeverityFn = Box<dyn Fn(&RoundTripRecord) -> Severity + Send + Sync>;

/// Formats round trips and routes them to a sink by severity.
///
/// A render failure is returned to the transport unchanged and nothing is
/// emitted for that round trip.
///
/// # Examples
///
/// ```rust
/// use tripwire_log::{default_formatter, RoundTripLogger, Severity};
///
/// // Treat client errors as informational, everything else as the default.
/// let logger = RoundTripLogger::new(default_formatter()).with_severity(|record| {
///     match record.status().map(|s| s.as_u16()) {
///         Some(400..=499) => Severity::Info,
///         Some(500..) | None => Severity::Error,
///         Some(_) => Severity::Debug,
///     }
/// });
/// ```
pub struct RoundTripLogger<F, S = TracingSink> {
    formatter: F,
    sink: S,
    severity: SeverityFn,
}

impl<F: LogFormatter> RoundTripLogger<F> {
    /// Logger emitting into `tracing` with [`default_severity`].
    pub fn new(formatter: F) -> Self {
        Self {
            formatter,
            sink: TracingSink,
            severity: Box::new(default_severity),
        }
    }
}

impl<F: LogFormatter, S: LogSink> RoundTripLogger<F, S> {
    /// Replace the sink entries are emitted into.
    pub fn with_sink<T: LogSink>(self, sink: T) -> RoundTripLogger<F, T> {
        RoundTripLogger {
            formatter: self.formatter,
            sink,
            severity: self.severity,
        }
    }

    /// Replace the status to severity mapping.
    pub fn with_severity<G>(mut self, severity: G) -> Self
    where
        G: Fn(&RoundTripRecord) -> Severity + Send + Sync + 'static,
    {
        self.severity = Box::new(severity);
        self
    }

    /// The formatter building each message.
    pub fn formatter(&self) -> &F {
        &self.formatter
    }

    /// The sink receiving each entry.
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<F: LogFormatter, S: LogSink> RoundTripHook for RoundTripLogger<F, S> {
    type Error = F::Error;

    fn log_round_trip(&self, record: &RoundTripRecord) -> Result<(), F::Error> {
        let message = self.formatter.format(record)?;
        self.sink.emit((self.severity)(record), &message);
        Ok(())
    }

    fn request_body_enabled(&self) -> bool {
        self.formatter.request_body_enabled()
    }

    fn response_body_enabled(&self) -> bool {
        self.formatter.response_body_enabled()
    }
}

impl<F: fmt::Debug, S: fmt::Debug> fmt::Debug for RoundTripLogger<F, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundTripLogger")
            .field("formatter", &self.formatter)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

/// Logger over [`default_formatter`] emitting into `tracing`.
pub fn default_logger() -> RoundTripLogger<PooledFormatter<TextRenderer>> {
    RoundTripLogger::new(default_formatter())
}
