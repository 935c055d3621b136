//! Resumable chunked upload client.
//!
//! Splits a local file into fixed-size chunks, sends them sequentially with
//! bounded retries, and survives interruption: the server-assigned upload id
//! is persisted in a session store keyed by file identity, and on the next
//! attempt the client asks the server which chunks it already has and skips
//! them.

mod client;
mod error;
mod progress;
mod session;
mod splitter;
mod uploader;

pub use client::{ApiError, ByteSink, ChunkSubmission, HttpUploadApi, UploadApi};
pub use error::UploadError;
pub use progress::{ProgressCallback, ProgressState, UploadProgress};
pub use session::{
    JsonFileBackend, MemorySessionBackend, SessionBackend, SessionKey, UploadSessionStore,
};
pub use splitter::{ChunkPlan, ChunkReader, ChunkSpan, SplitError};
pub use uploader::{Uploader, guess_content_type};
