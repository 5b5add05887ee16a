//! Prefixing decorator for any [`LogFormatter`].

use crate::formatter::LogFormatter;
use crate::types::RoundTripRecord;

/// Prepends a fixed prefix to every message produced by `inner`.
///
/// When `inner` fails, `format` returns an empty message and **no error**.
/// Callers relying on render failures to suppress logging must not put a
/// `PrefixedFormatter` in front of them; the router will log an empty line
/// instead.
///
/// # Examples
///
/// ```rust
/// use tripwire_log::{default_formatter, LogFormatter, PrefixedFormatter};
///
/// let formatter = PrefixedFormatter::new("[search] ", default_formatter());
/// assert!(!formatter.request_body_enabled());
/// ```
#[derive(Debug, Clone)]
pub struct PrefixedFormatter<F> {
    prefix: String,
    inner: F,
}

impl<F: LogFormatter> PrefixedFormatter<F> {
    /// Prepend `prefix` to every message `inner` produces.
    pub fn new(prefix: impl Into<String>, inner: F) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    /// The text put in front of each message.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The wrapped formatter.
    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: LogFormatter> LogFormatter for PrefixedFormatter<F> {
    type Error = F::Error;

    fn format(&self, record: &RoundTripRecord) -> Result<String, F::Error> {
        match self.inner.format(record) {
            Ok(message) => Ok(format!("{}{}", self.prefix, message)),
            Err(_) => Ok(String::new()),
        }
    }

    fn request_body_enabled(&self) -> bool {
        self.inner.request_body_enabled()
    }

    fn response_body_enabled(&self) -> bool {
        self.inner.response_body_enabled()
    }
}
