use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Chunk size for preview-class content (512 KiB).
///
/// Previews are short clips fetched eagerly by browsers, so smaller
/// requests keep per-chunk latency and memory low.
pub const PREVIEW_CHUNK_SIZE: u64 = 512 * 1024;

/// Chunk size for main-class content (2 MiB).
pub const MAIN_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Default server-side cap on a single chunk body (8 MiB).
///
/// A submission above this limit is answered with 413, which the client
/// surfaces as a chunk-size misconfiguration rather than a transient error.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// Timeout for a single chunk submission.
///
/// Generous on purpose: one chunk of a video file over a slow uplink can
/// legitimately take minutes. There is no overall-upload timeout; the
/// upload finishes or is explicitly cancelled.
pub const CHUNK_SEND_TIMEOUT: Duration = Duration::from_secs(180);

/// Fixed pause between retry attempts for one chunk.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Total attempts per chunk (1 initial + 3 retries).
pub const MAX_SEND_ATTEMPTS: u32 = 4;

/// URL prefix under which finalized artifacts are served.
pub const MEDIA_ROOT: &str = "/media";

/// Usage class of an uploaded file, selecting the chunk-size policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentClass {
    #[serde(rename = "main")]
    Main,
    #[serde(rename = "preview")]
    Preview,
}

impl ContentClass {
    /// Chunk size in bytes for this class.
    pub fn chunk_size(self) -> u64 {
        match self {
            ContentClass::Main => MAIN_CHUNK_SIZE,
            ContentClass::Preview => PREVIEW_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_policy() {
        assert!(ContentClass::Preview.chunk_size() < ContentClass::Main.chunk_size());
        assert_eq!(ContentClass::Main.chunk_size(), 2 * 1024 * 1024);
    }

    #[test]
    fn content_class_wire_names() {
        assert_eq!(
            serde_json::to_string(&ContentClass::Preview).unwrap(),
            "\"preview\""
        );
        let c: ContentClass = serde_json::from_str("\"main\"").unwrap();
        assert_eq!(c, ContentClass::Main);
    }
}
