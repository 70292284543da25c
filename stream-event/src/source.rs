//! Cold stream source: subscribe with an observer, cancel via the handle.
//!
//! A [`StreamSource`] does no work until `subscribe` is called; the returned
//! [`StreamHandle`] stops the underlying producer and releases its resources
//! within a bounded time. The contract is independent of any stream library:
//! producers backed by async channels, blocking readers, or fixed vectors all
//! fit behind the same three callbacks.

use crate::chunk::{StreamChunk, StreamError};

/// Receives the events of one stream: zero or more chunks, then exactly one
/// terminal call (`on_complete` or `on_error`).
///
/// Observers are consumed by [`StreamSource::subscribe`] and invoked from the
/// producer's context; implementations must not block for long.
pub trait StreamObserver: Send {
    /// Called for each chunk, in order.
    fn on_chunk(&mut self, chunk: StreamChunk);

    /// Terminal: the stream failed. No further calls follow.
    fn on_error(&mut self, error: StreamError);

    /// Terminal: the stream finished normally. No further calls follow.
    fn on_complete(&mut self);
}

/// A cold source of stream chunks.
///
/// Nothing is produced until `subscribe`; subscribing starts the underlying
/// request. The source is consumed by subscription — a second subscription
/// requires a second source.
pub trait StreamSource: Send {
    /// Starts the stream, delivering events to `observer`. Returns a handle
    /// whose `cancel` stops the producer.
    fn subscribe(self: Box<Self>, observer: Box<dyn StreamObserver>) -> StreamHandle;
}

/// Handle to a live stream subscription. Dropping the handle does not cancel;
/// call [`StreamHandle::cancel`] to stop the producer.
pub struct StreamHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl StreamHandle {
    /// Creates a handle whose cancellation runs `cancel`.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Handle for a stream that cannot be cancelled (already finished).
    pub fn completed() -> Self {
        Self { cancel: None }
    }

    /// Stops the underlying producer. Idempotent: only the first call acts.
    pub fn cancel(&mut self) {
        if let Some(f) = self.cancel.take() {
            f();
        }
    }
}

/// Observer assembled from three closures. Convenient for call sites that do
/// not want a named observer type.
pub struct FnObserver<C, E, D>
where
    C: FnMut(StreamChunk) + Send,
    E: FnMut(StreamError) + Send,
    D: FnMut() + Send,
{
    on_chunk: C,
    on_error: E,
    on_complete: D,
}

impl<C, E, D> FnObserver<C, E, D>
where
    C: FnMut(StreamChunk) + Send,
    E: FnMut(StreamError) + Send,
    D: FnMut() + Send,
{
    /// Builds an observer from `on_chunk`, `on_error`, `on_complete` closures.
    pub fn new(on_chunk: C, on_error: E, on_complete: D) -> Self {
        Self {
            on_chunk,
            on_error,
            on_complete,
        }
    }
}

impl<C, E, D> StreamObserver for FnObserver<C, E, D>
where
    C: FnMut(StreamChunk) + Send,
    E: FnMut(StreamError) + Send,
    D: FnMut() + Send,
{
    fn on_chunk(&mut self, chunk: StreamChunk) {
        (self.on_chunk)(chunk)
    }

    fn on_error(&mut self, error: StreamError) {
        (self.on_error)(error)
    }

    fn on_complete(&mut self) {
        (self.on_complete)()
    }
}

/// Cold source over a fixed chunk sequence, delivered synchronously on
/// subscribe. Used by mock clients and tests.
pub struct VecSource {
    chunks: Vec<StreamChunk>,
    error: Option<StreamError>,
}

impl VecSource {
    /// Source that emits `chunks` then completes.
    pub fn new(chunks: Vec<StreamChunk>) -> Self {
        Self {
            chunks,
            error: None,
        }
    }

    /// Source that emits `chunks` then fails with `error`.
    pub fn failing(chunks: Vec<StreamChunk>, error: StreamError) -> Self {
        Self {
            chunks,
            error: Some(error),
        }
    }
}

impl StreamSource for VecSource {
    fn subscribe(self: Box<Self>, mut observer: Box<dyn StreamObserver>) -> StreamHandle {
        for chunk in self.chunks {
            observer.on_chunk(chunk);
        }
        match self.error {
            Some(e) => observer.on_error(e),
            None => observer.on_complete(),
        }
        StreamHandle::completed()
    }
}
