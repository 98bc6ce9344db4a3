//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline processes each page.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a channel, a WebSocket, or a terminal progress bar
//! without the library knowing how the host application communicates. The
//! trait is `Send + Sync` because pages are processed concurrently.

/// Called by the conversion pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_page_start`, `on_page_complete`, and `on_page_error` may be called
/// concurrently from different tasks. Implementations must protect shared
/// mutable state with appropriate synchronisation (`Mutex`, atomics).
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before any page is processed, after a cache miss.
    ///
    /// Not called at all when the document is served from cache.
    fn on_conversion_start(&self, _total_pages: usize) {}

    /// Called when a page enters the extraction stage.
    fn on_page_start(&self, _page_num: usize, _total_pages: usize) {}

    /// Called when a page's extraction (and refinement, if enabled) is done.
    fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _markdown_len: usize) {}

    /// Called when a page degrades (OCR failure, refinement fallback).
    fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: String) {}

    /// Called once after assembly, before the cache write.
    fn on_conversion_complete(&self, _total_pages: usize, _succeeded: usize) {}
}

/// A callback that ignores every event.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        completed: AtomicUsize,
    }

    impl ConversionProgressCallback for Counter {
        fn on_page_complete(&self, _page: usize, _total: usize, _len: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn callback_object_is_usable_through_arc_dyn() {
        let counter = Arc::new(Counter {
            completed: AtomicUsize::new(0),
        });
        let cb: Arc<dyn ConversionProgressCallback> = counter.clone();
        cb.on_page_start(1, 3);
        cb.on_page_complete(1, 3, 42);
        assert_eq!(counter.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callback_is_send_across_spawn() {
        let cb: Arc<dyn ConversionProgressCallback> = Arc::new(NoopProgressCallback);
        tokio::spawn(async move {
            cb.on_page_error(2, 5, "timeout".to_string());
        })
        .await
        .expect("spawn must succeed");
    }
}
