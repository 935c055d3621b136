use std::sync::Arc;

use medialift_store::{ChunkPut, NewUpload, UploadMeta, UploadStore};

use crate::error::ApiError;

/// One chunk submission after multipart decoding.
#[derive(Debug)]
pub struct ChunkIngest {
    /// Absent on the first chunk of a fresh upload; the store then assigns
    /// the id and the reply carries it back.
    pub file_id: Option<String>,
    pub declared: NewUpload,
    pub chunk_index: u32,
    pub data: Vec<u8>,
}

/// What became of one ingested chunk.
#[derive(Debug)]
pub struct IngestResult {
    /// Metadata after the insert (and after auto-finalize, if it ran).
    pub meta: UploadMeta,
    pub outcome: ChunkPut,
}

/// Shared state behind the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn UploadStore>,
    max_chunk_bytes: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn UploadStore>, max_chunk_bytes: usize) -> Self {
        Self {
            store,
            max_chunk_bytes,
        }
    }

    pub fn store(&self) -> &dyn UploadStore {
        self.store.as_ref()
    }

    pub fn max_chunk_bytes(&self) -> usize {
        self.max_chunk_bytes
    }

    /// Stores one chunk, creating the upload on first contact and recovering
    /// lost metadata on resume. When the chunk completes the set, the upload
    /// is finalized in the same request.
    ///
    /// Idempotent per `(file_id, chunk_index)`: a resend of a stored index is
    /// acknowledged as a duplicate and the original bytes are kept.
    pub async fn ingest_chunk(&self, ingest: ChunkIngest) -> Result<IngestResult, ApiError> {
        self.validate(&ingest)?;

        let mut meta = match &ingest.file_id {
            Some(id) => self
                .store
                .recover(id, &ingest.declared)
                .await?
                .ok_or_else(|| ApiError::UnknownUpload(id.clone()))?,
            None => self.store.create(&ingest.declared).await?,
        };
        if meta.is_finalized() {
            // Terminal: the artifact already exists, so a late resend is
            // acknowledged as a duplicate without touching storage.
            return Ok(IngestResult {
                meta,
                outcome: ChunkPut::Duplicate,
            });
        }
        if meta.total_chunks != ingest.declared.total_chunks {
            return Err(ApiError::InvalidRequest(format!(
                "upload {} declares {} chunks, request says {}",
                meta.file_id, meta.total_chunks, ingest.declared.total_chunks
            )));
        }

        let outcome = self
            .store
            .put_chunk(&meta.file_id, ingest.chunk_index, &ingest.data)
            .await?;
        if let Some(fresh) = self.store.meta(&meta.file_id).await? {
            meta = fresh;
        }

        if meta.has_all_chunks() && !meta.is_finalized() {
            // The chunk itself is safely stored either way, so a finalize
            // failure is reported but does not fail the request; the client
            // can invoke the finalizer explicitly.
            match self.store.finalize(&meta.file_id).await {
                Ok(_) => {
                    if let Some(fresh) = self.store.meta(&meta.file_id).await? {
                        meta = fresh;
                    }
                }
                Err(e) => {
                    tracing::warn!(file_id = %meta.file_id, "auto-finalize failed: {e}");
                }
            }
        }

        Ok(IngestResult { meta, outcome })
    }

    fn validate(&self, ingest: &ChunkIngest) -> Result<(), ApiError> {
        if ingest.declared.file_name.is_empty() {
            return Err(ApiError::InvalidRequest("fileName must not be empty".into()));
        }
        if ingest.declared.total_chunks == 0 {
            return Err(ApiError::InvalidRequest(
                "totalChunks must be at least 1".into(),
            ));
        }
        if ingest.chunk_index >= ingest.declared.total_chunks {
            return Err(ApiError::InvalidRequest(format!(
                "chunkIndex {} out of range for {} chunks",
                ingest.chunk_index, ingest.declared.total_chunks
            )));
        }
        if ingest.data.is_empty() {
            return Err(ApiError::InvalidRequest("chunk body must not be empty".into()));
        }
        if ingest.data.len() > self.max_chunk_bytes {
            return Err(ApiError::PayloadTooLarge {
                limit: self.max_chunk_bytes,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medialift_store::MemoryUploadStore;

    fn state() -> AppState {
        AppState::new(Arc::new(MemoryUploadStore::new()), 1024)
    }

    fn ingest(file_id: Option<&str>, total: u32, index: u32, data: &[u8]) -> ChunkIngest {
        ChunkIngest {
            file_id: file_id.map(str::to_string),
            declared: NewUpload {
                file_name: "clip.mp4".into(),
                content_type: "video/mp4".into(),
                total_chunks: total,
            },
            chunk_index: index,
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn first_chunk_creates_the_upload() {
        let state = state();
        let result = state.ingest_chunk(ingest(None, 2, 0, b"aa")).await.unwrap();
        assert_eq!(result.outcome, ChunkPut::Stored);
        assert!(!result.meta.file_id.is_empty());
        assert!(!result.meta.is_finalized());
    }

    #[tokio::test]
    async fn last_chunk_auto_finalizes() {
        let state = state();
        let first = state.ingest_chunk(ingest(None, 2, 0, b"aa")).await.unwrap();
        let id = first.meta.file_id.clone();

        let last = state
            .ingest_chunk(ingest(Some(&id), 2, 1, b"bb"))
            .await
            .unwrap();
        assert!(last.meta.is_finalized());
        assert!(last.meta.final_path.is_some());
    }

    #[tokio::test]
    async fn duplicate_resend_is_acknowledged() {
        let state = state();
        let first = state.ingest_chunk(ingest(None, 2, 0, b"aa")).await.unwrap();
        let id = first.meta.file_id.clone();

        let again = state
            .ingest_chunk(ingest(Some(&id), 2, 0, b"aa"))
            .await
            .unwrap();
        assert_eq!(again.outcome, ChunkPut::Duplicate);
    }

    #[tokio::test]
    async fn resend_after_finalize_reports_completion_without_storing() {
        let state = state();
        let first = state.ingest_chunk(ingest(None, 1, 0, b"done")).await.unwrap();
        assert!(first.meta.is_finalized());
        let id = first.meta.file_id.clone();

        let late = state
            .ingest_chunk(ingest(Some(&id), 1, 0, b"done"))
            .await
            .unwrap();
        assert_eq!(late.outcome, ChunkPut::Duplicate);
        assert!(late.meta.is_finalized());
    }

    #[tokio::test]
    async fn oversized_chunk_is_rejected_before_storage() {
        let state = state();
        let err = state
            .ingest_chunk(ingest(None, 1, 0, &[0u8; 2048]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn unknown_file_id_is_not_silently_created() {
        let state = state();
        let err = state
            .ingest_chunk(ingest(Some("ghost"), 2, 0, b"aa"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnknownUpload(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn mismatched_total_chunks_is_rejected() {
        let state = state();
        let first = state.ingest_chunk(ingest(None, 3, 0, b"aa")).await.unwrap();
        let id = first.meta.file_id.clone();

        let err = state
            .ingest_chunk(ingest(Some(&id), 5, 1, b"bb"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }
}
