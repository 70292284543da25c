//! Cold-stream contract for model output.
//!
//! This crate defines the wire-library-independent streaming contract used by
//! model clients: a [`StreamSource`] produces nothing until `subscribe`, an
//! observer receives chunks plus exactly one terminal signal, and the returned
//! [`StreamHandle`] cancels the producer. It does not depend on driftkit;
//! driftkit bridges async channels into this contract.

pub mod chunk;
pub mod source;

pub use chunk::{StreamChunk, StreamError};
pub use source::{FnObserver, StreamHandle, StreamObserver, StreamSource, VecSource};
