//! HTTP receiver for resumable chunked uploads.
//!
//! Chunks arrive as multipart POSTs in any order, are persisted under a
//! unique `(file_id, chunk_index)` key, and the upload auto-finalizes into a
//! single artifact once every declared chunk is present. Finalized artifacts
//! are served back under `/media/{file_id}`.

mod config;
mod error;
mod routes;
mod service;

pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use routes::router;
pub use service::{AppState, ChunkIngest, IngestResult};
