/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub file_id: Option<String>,
    pub acked_chunks: u32,
    pub total_chunks: u32,
    /// Percent complete, 0.0..=100.0, monotonic across retries.
    pub percent: f64,
}

/// Callback invoked as the upload advances. Shared (`Arc`) because the
/// byte-level hook handed to the transport must own its copy.
pub type ProgressCallback = std::sync::Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Computes a smooth percent from acknowledged chunks plus the in-flight
/// byte progress of the current chunk, so the number moves within a chunk
/// instead of jumping only at chunk boundaries.
///
/// The emitted percent never decreases: during a retry the current chunk's
/// byte progress resets, and without the clamp the display would flicker
/// backwards.
pub struct ProgressState {
    total_chunks: u32,
    acked_chunks: u32,
    file_id: Option<String>,
    high_water: f64,
}

impl ProgressState {
    /// `already_stored` seeds the acked count when resuming.
    pub fn new(total_chunks: u32, already_stored: u32) -> Self {
        Self {
            total_chunks,
            acked_chunks: already_stored.min(total_chunks),
            file_id: None,
            high_water: 0.0,
        }
    }

    pub fn set_file_id(&mut self, file_id: &str) {
        self.file_id = Some(file_id.to_string());
    }

    pub fn acked_chunks(&self) -> u32 {
        self.acked_chunks
    }

    /// Records an acknowledged chunk and returns the new snapshot.
    pub fn chunk_acked(&mut self) -> UploadProgress {
        self.acked_chunks = (self.acked_chunks + 1).min(self.total_chunks);
        self.snapshot(0, 1)
    }

    /// Returns a snapshot blending in `sent` of `len` bytes of the chunk
    /// currently in flight.
    pub fn in_flight(&mut self, sent: u64, len: u64) -> UploadProgress {
        self.snapshot(sent, len.max(1))
    }

    fn snapshot(&mut self, sent: u64, len: u64) -> UploadProgress {
        let chunk_fraction = (sent as f64 / len as f64).clamp(0.0, 1.0);
        let raw = (self.acked_chunks as f64 + chunk_fraction) / self.total_chunks as f64 * 100.0;
        self.high_water = self.high_water.max(raw.min(100.0));
        UploadProgress {
            file_id: self.file_id.clone(),
            acked_chunks: self.acked_chunks,
            total_chunks: self.total_chunks,
            percent: self.high_water,
        }
    }
}
