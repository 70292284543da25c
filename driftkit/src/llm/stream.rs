//! Bridge from tokio channels to the cold-stream contract.
//!
//! Providers with native streaming produce chunks on an mpsc channel;
//! [`ChannelStreamSource`] defers starting the producer until `subscribe` and
//! wires the subscription's cancel into a [`CancellationToken`], so dropping
//! a response mid-stream stops the underlying request.

use stream_event::{StreamChunk, StreamError, StreamHandle, StreamObserver, StreamSource};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Item produced by a streaming backend: a chunk or the terminal error.
pub type ChunkResult = Result<StreamChunk, StreamError>;

/// Cold stream source over a producer started at subscribe time.
///
/// The `start` closure receives a cancellation token and must return the
/// receiving half of the chunk channel; it typically spawns the provider
/// request onto the runtime. Nothing runs before `subscribe`.
pub struct ChannelStreamSource {
    start: Box<dyn FnOnce(CancellationToken) -> mpsc::Receiver<ChunkResult> + Send>,
}

impl ChannelStreamSource {
    /// Creates a source whose producer is started by `start` on subscribe.
    pub fn new(
        start: impl FnOnce(CancellationToken) -> mpsc::Receiver<ChunkResult> + Send + 'static,
    ) -> Self {
        Self {
            start: Box::new(start),
        }
    }
}

impl StreamSource for ChannelStreamSource {
    fn subscribe(self: Box<Self>, mut observer: Box<dyn StreamObserver>) -> StreamHandle {
        let token = CancellationToken::new();
        let mut rx = (self.start)(token.clone());
        let pump_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_token.cancelled() => return,
                    item = rx.recv() => match item {
                        Some(Ok(chunk)) => observer.on_chunk(chunk),
                        Some(Err(e)) => {
                            observer.on_error(e);
                            return;
                        }
                        None => {
                            observer.on_complete();
                            return;
                        }
                    },
                }
            }
        });
        StreamHandle::new(move || token.cancel())
    }
}
