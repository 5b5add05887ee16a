//! Formatters produce the log line for a round trip.
//!
//! [`PooledFormatter`] is the workhorse: it keeps a pool of renderer + buffer
//! pairs so concurrent transports never write into the same buffer, and it
//! caches the renderer's body capture flags after the first query.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use crate::renderer::{RoundTripRenderer, TextRenderer, TextRendererConfig};
use crate::types::RoundTripRecord;

/// Builds the log message for a round trip.
///
/// This is the shape a transport's logging hook consumes: a message plus the
/// two flags telling the transport which bodies to capture.
pub trait LogFormatter: Send + Sync + 'static {
    /// Error raised when no message could be produced.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Build the log message for `record`.
    fn format(&self, record: &RoundTripRecord) -> Result<String, Self::Error>;

    /// Whether the transport should capture request bodies.
    fn request_body_enabled(&self) -> bool;

    /// Whether the transport should capture response bodies.
    fn response_body_enabled(&self) -> bool;
}

/// Formatter over the plain [`TextRenderer`] with body capture disabled.
///
/// # Examples
///
/// ```rust
/// use tripwire_log::{default_formatter, LogFormatter};
///
/// let formatter = default_formatter();
/// assert!(!formatter.request_body_enabled());
/// assert!(!formatter.response_body_enabled());
/// ```
pub fn default_formatter() -> PooledFormatter<TextRenderer> {
    PooledFormatter::new(TextRenderer::default)
}

/// Removes exactly one trailing line break (`\n` or `\r\n`).
///
/// ```rust
/// use tripwire_log::formatter::chomp;
///
/// assert_eq!(chomp("OK\n"), "OK");
/// assert_eq!(chomp("OK\n\n"), "OK\n");
/// assert_eq!(chomp("OK"), "OK");
/// ```
pub fn chomp(line: &str) -> &str {
    match line.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest),
        None => line,
    }
}

type RendererFactory<R> = Box<dyn Fn() -> R + Send + Sync>;

/// Largest buffer capacity a pooled core keeps once it is handed back.
pub const MAX_POOLED_BUFFER_CAPACITY: usize = 16 * 1024;

/// [`LogFormatter`] backed by a pool of renderers.
///
/// Each `format` call borrows one renderer together with its output buffer,
/// renders into the buffer, chomps one trailing line break and hands the
/// pair back with the buffer cleared. The pool grows when every pair is
/// borrowed and never shrinks; a buffer that grew past
/// [`MAX_POOLED_BUFFER_CAPACITY`] (a large body, say) is trimmed back to it
/// before it is pooled again.
///
/// The body capture flags are read from a pooled renderer on first use and
/// cached for the lifetime of the formatter: renderers built by the factory
/// are expected to answer them identically, forever.
///
/// # Examples
///
/// ```rust
/// use tripwire_log::{LogFormatter, PooledFormatter, TextRenderer, TextRendererConfig};
///
/// let formatter = PooledFormatter::new(|| {
///     TextRenderer::new(TextRendererConfig {
///         request_body: true,
///         response_body: false,
///     })
/// });
/// assert!(formatter.request_body_enabled());
/// ```
pub struct PooledFormatter<R: RoundTripRenderer> {
    pool: Mutex<Vec<FormatterCore<R>>>,
    new_renderer: RendererFactory<R>,
    request_body_enabled: OnceFlag,
    response_body_enabled: OnceFlag,
}

impl<R: RoundTripRenderer> PooledFormatter<R> {
    /// Create a formatter that builds renderers on demand with `new_renderer`.
    pub fn new<F>(new_renderer: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
    {
        Self {
            pool: Mutex::new(Vec::new()),
            new_renderer: Box::new(new_renderer),
            request_body_enabled: OnceFlag::default(),
            response_body_enabled: OnceFlag::default(),
        }
    }

    /// Number of renderer + buffer pairs currently waiting in the pool.
    pub fn idle(&self) -> usize {
        self.lock_pool().len()
    }

    fn acquire(&self) -> PooledCore<'_, R> {
        let core = self.lock_pool().pop().unwrap_or_else(|| FormatterCore {
            renderer: (self.new_renderer)(),
            buffer: String::new(),
        });
        PooledCore {
            owner: self,
            core: Some(core),
        }
    }

    // Pooled cores are always cleared before they go back, so a poisoned
    // lock still guards a consistent pool.
    fn lock_pool(&self) -> MutexGuard<'_, Vec<FormatterCore<R>>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PooledFormatter<TextRenderer> {
    /// Formatter over a [`TextRenderer`] built from `config`.
    pub fn text(config: TextRendererConfig) -> Self {
        Self::new(move || TextRenderer::new(config))
    }
}

impl<R: RoundTripRenderer> LogFormatter for PooledFormatter<R> {
    type Error = R::Error;

    fn format(&self, record: &RoundTripRecord) -> Result<String, R::Error> {
        self.acquire().format(record)
    }

    fn request_body_enabled(&self) -> bool {
        self.request_body_enabled
            .get_once(|| self.acquire().renderer.request_body_enabled())
    }

    fn response_body_enabled(&self) -> bool {
        self.response_body_enabled
            .get_once(|| self.acquire().renderer.response_body_enabled())
    }
}

impl<R: RoundTripRenderer> fmt::Debug for PooledFormatter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledFormatter")
            .field("idle", &self.idle())
            .field("request_body_enabled", &self.request_body_enabled)
            .field("response_body_enabled", &self.response_body_enabled)
            .finish_non_exhaustive()
    }
}

struct FormatterCore<R> {
    renderer: R,
    buffer: String,
}

impl<R: RoundTripRenderer> FormatterCore<R> {
    fn format(&mut self, record: &RoundTripRecord) -> Result<String, R::Error> {
        self.renderer.render(record, &mut self.buffer)?;
        Ok(chomp(&self.buffer).to_owned())
    }
}

/// Exclusive loan of a pooled core. Clears the buffer and returns the core
/// to the pool on drop, whether the render succeeded, failed or panicked.
struct PooledCore<'a, R: RoundTripRenderer> {
    owner: &'a PooledFormatter<R>,
    core: Option<FormatterCore<R>>,
}

impl<R: RoundTripRenderer> Deref for PooledCore<'_, R> {
    type Target = FormatterCore<R>;

    fn deref(&self) -> &Self::Target {
        self.core.as_ref().expect("core is only taken on drop")
    }
}

impl<R: RoundTripRenderer> DerefMut for PooledCore<'_, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.core.as_mut().expect("core is only taken on drop")
    }
}

impl<R: RoundTripRenderer> Drop for PooledCore<'_, R> {
    fn drop(&mut self) {
        if let Some(mut core) = self.core.take() {
            core.buffer.clear();
            core.buffer.shrink_to(MAX_POOLED_BUFFER_CAPACITY);
            self.owner.lock_pool().push(core);
        }
    }
}

/// A boolean decided by the first caller and fixed afterwards.
#[derive(Debug, Default)]
pub(crate) struct OnceFlag {
    value: OnceLock<bool>,
}

impl OnceFlag {
    pub(crate) fn get_once(&self, get: impl FnOnce() -> bool) -> bool {
        *self.value.get_or_init(get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{record_with_status, MockError, MockRenderer};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn formatter_returning(text: &str) -> PooledFormatter<MockRenderer> {
        let renderer = MockRenderer::returning(text);
        PooledFormatter::new(move || renderer.clone())
    }

    #[test]
    fn test_default_formatter_chomps_line_break() {
        let formatter = default_formatter();
        let message = formatter.format(&record_with_status(200)).unwrap();
        assert!(!message.ends_with('\n'), "unexpected message: {message:?}");
        assert!(message.contains("GET http://dummy/dummy [status:200 request:1.234s]"));
    }

    #[test]
    fn test_chomp_removes_exactly_one_line_break() {
        let cases = [
            ("OK\n", "OK"),
            ("OK", "OK"),
            ("OK\n\n", "OK\n"),
            ("OK\r\n", "OK"),
            ("OK\r\n\r\n", "OK\r\n"),
            ("OK\r", "OK\r"),
            ("\n", ""),
            ("", ""),
        ];
        for (rendered, expected) in cases {
            let formatter = formatter_returning(rendered);
            let message = formatter.format(&record_with_status(200)).unwrap();
            assert_eq!(message, expected, "rendered {rendered:?}");
        }
    }

    proptest! {
        #[test]
        fn prop_message_is_rendered_output_chomped(msg in ".*\n?") {
            let formatter = formatter_returning(&msg);
            let message = formatter.format(&record_with_status(200)).unwrap();

            let expected = msg
                .strip_suffix("\r\n")
                .or_else(|| msg.strip_suffix('\n'))
                .unwrap_or(&msg);
            prop_assert_eq!(message, expected);
        }

        #[test]
        fn prop_render_error_is_returned_unchanged(msg in ".*") {
            let expected = MockError(msg);
            let error = expected.clone();
            let renderer = MockRenderer::new(move |_| Err(error.clone()));
            let formatter = PooledFormatter::new(move || renderer.clone());

            let result = formatter.format(&record_with_status(200));
            prop_assert_eq!(result, Err(expected));
        }
    }

    #[test]
    fn test_flags_forwarded_from_renderer() {
        for (request_body, response_body) in [(false, false), (true, false), (false, true), (true, true)] {
            let mut renderer = MockRenderer::returning("OK");
            renderer.request_body_enabled = request_body;
            renderer.response_body_enabled = response_body;
            let formatter = PooledFormatter::new(move || renderer.clone());

            assert_eq!(formatter.request_body_enabled(), request_body);
            assert_eq!(formatter.response_body_enabled(), response_body);
        }
    }

    /// Renderer whose request flag is read from shared state on every query.
    struct SwitchingRenderer {
        enabled: Arc<AtomicBool>,
        queries: Arc<AtomicUsize>,
    }

    impl RoundTripRenderer for SwitchingRenderer {
        type Error = fmt::Error;

        fn render(&mut self, _: &RoundTripRecord, out: &mut dyn fmt::Write) -> fmt::Result {
            out.write_str("OK\n")
        }

        fn request_body_enabled(&self) -> bool {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.enabled.load(Ordering::SeqCst)
        }

        fn response_body_enabled(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_flags_are_decided_once() {
        let enabled = Arc::new(AtomicBool::new(true));
        let queries = Arc::new(AtomicUsize::new(0));
        let formatter = {
            let enabled = enabled.clone();
            let queries = queries.clone();
            PooledFormatter::new(move || SwitchingRenderer {
                enabled: enabled.clone(),
                queries: queries.clone(),
            })
        };

        assert!(formatter.request_body_enabled());
        enabled.store(false, Ordering::SeqCst);
        assert!(formatter.request_body_enabled());
        assert!(formatter.request_body_enabled());
        assert_eq!(queries.load(Ordering::SeqCst), 1);

        // The renderer borrowed for the query went straight back to the pool.
        assert_eq!(formatter.idle(), 1);
    }

    #[test]
    fn test_pool_reuses_renderer_and_clears_buffer() {
        let built = Arc::new(AtomicUsize::new(0));
        let formatter = {
            let built = built.clone();
            PooledFormatter::new(move || {
                built.fetch_add(1, Ordering::SeqCst);
                MockRenderer::new(|record| Ok(format!("{}\n", record.request.method)))
            })
        };

        let mut record = record_with_status(200);
        assert_eq!(formatter.format(&record).unwrap(), "GET");
        record.request.method = axum::http::Method::DELETE;
        assert_eq!(formatter.format(&record).unwrap(), "DELETE");

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(formatter.idle(), 1);
    }

    /// Writes partial output before failing.
    struct HalfWrittenRenderer {
        fail: Arc<AtomicBool>,
    }

    impl RoundTripRenderer for HalfWrittenRenderer {
        type Error = fmt::Error;

        fn render(&mut self, _: &RoundTripRecord, out: &mut dyn fmt::Write) -> fmt::Result {
            out.write_str("partial ")?;
            if self.fail.load(Ordering::SeqCst) {
                return Err(fmt::Error);
            }
            out.write_str("complete\n")
        }

        fn request_body_enabled(&self) -> bool {
            false
        }

        fn response_body_enabled(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_buffer_cleared_after_render_error() {
        let fail = Arc::new(AtomicBool::new(true));
        let formatter = {
            let fail = fail.clone();
            PooledFormatter::new(move || HalfWrittenRenderer { fail: fail.clone() })
        };

        assert_eq!(formatter.format(&record_with_status(200)), Err(fmt::Error));
        assert_eq!(formatter.idle(), 1);

        fail.store(false, Ordering::SeqCst);
        assert_eq!(
            formatter.format(&record_with_status(200)).unwrap(),
            "partial complete"
        );
    }

    #[test]
    fn test_large_render_does_not_pin_its_buffer() {
        let formatter = PooledFormatter::new(|| {
            MockRenderer::new(|record| Ok(format!("{}\n", record.request.method)))
        });
        let huge = PooledFormatter::new(|| MockRenderer::returning(&"x".repeat(1024 * 1024)));

        formatter.format(&record_with_status(200)).unwrap();
        let small_capacity = formatter.lock_pool()[0].buffer.capacity();
        assert!(small_capacity <= MAX_POOLED_BUFFER_CAPACITY);

        let message = huge.format(&record_with_status(200)).unwrap();
        assert_eq!(message.len(), 1024 * 1024);
        let pool = huge.lock_pool();
        assert_eq!(pool.len(), 1);
        assert!(pool[0].buffer.is_empty());
        assert!(
            pool[0].buffer.capacity() <= MAX_POOLED_BUFFER_CAPACITY,
            "pooled capacity {}",
            pool[0].buffer.capacity()
        );
    }

    #[test]
    fn test_concurrent_formats_never_share_a_buffer() {
        let formatter = PooledFormatter::new(|| {
            MockRenderer::new(|record| {
                // Yield mid-render so overlapping calls would interleave.
                std::thread::yield_now();
                Ok(format!("{}\n", record.request.uri))
            })
        });

        std::thread::scope(|scope| {
            for thread in 0..8 {
                let formatter = &formatter;
                scope.spawn(move || {
                    for i in 0..100 {
                        let mut record = record_with_status(200);
                        let uri = format!("http://dummy/{thread}/{i}");
                        record.request.uri = uri.parse().unwrap();
                        assert_eq!(formatter.format(&record).unwrap(), uri);
                    }
                });
            }
        });

        assert!(formatter.idle() >= 1);
        assert!(formatter.idle() <= 8);
    }

    #[test]
    fn test_text_formatter_with_bodies_keeps_inner_line_breaks() {
        let formatter = PooledFormatter::text(TextRendererConfig {
            request_body: true,
            response_body: true,
        });
        let mut record = record_with_status(200);
        record.request.body = Some(bytes::Bytes::from_static(b"{\"q\":1}"));

        let message = formatter.format(&record).unwrap();
        assert_eq!(message.lines().count(), 2);
        assert!(message.ends_with("> {\"q\":1}"));
    }
}
