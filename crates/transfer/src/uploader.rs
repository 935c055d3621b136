use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use medialift_protocol::{
    ContentClass, FinalizeRequest, MAX_SEND_ATTEMPTS, RETRY_BACKOFF,
};

use crate::client::{ApiError, ByteSink, ChunkSubmission, UploadApi};
use crate::error::UploadError;
use crate::progress::{ProgressCallback, ProgressState};
use crate::session::{SessionKey, UploadSessionStore};
use crate::splitter::{ChunkPlan, ChunkReader};

/// Best-effort content type from the file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mp3") => "audio/mpeg",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Drives one or more resumable uploads against an [`UploadApi`].
///
/// Chunks are sent strictly sequentially, one in flight at a time, which
/// bounds client memory to a single chunk buffer. Independent uploads (say,
/// a main video and its preview) run as separate `upload` calls.
pub struct Uploader<A: UploadApi> {
    api: A,
    sessions: UploadSessionStore,
    cancel: CancellationToken,
    on_progress: Option<ProgressCallback>,
}

impl<A: UploadApi> Uploader<A> {
    pub fn new(api: A, sessions: UploadSessionStore) -> Self {
        Self {
            api,
            sessions,
            cancel: CancellationToken::new(),
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Token that aborts the upload loop between chunks.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Drops every persisted upload session.
    pub async fn clear_sessions(&self) -> std::io::Result<()> {
        self.sessions.clear().await
    }

    /// Uploads `path`, chunked per the content-class policy.
    ///
    /// Returns the retrieval path of the finalized artifact. Every failure
    /// mode is an [`UploadError`]; there is no partial-success return.
    pub async fn upload(
        &self,
        path: &Path,
        class: ContentClass,
    ) -> Result<String, UploadError> {
        self.upload_with_chunk_size(path, class.chunk_size()).await
    }

    /// Like [`upload`](Self::upload) with an explicit chunk size.
    pub async fn upload_with_chunk_size(
        &self,
        path: &Path,
        chunk_size: u64,
    ) -> Result<String, UploadError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let content_type = guess_content_type(path).to_string();
        let file_size = tokio::fs::metadata(path).await?.len();
        let plan = ChunkPlan::new(file_size, chunk_size)?;
        let total = plan.total_chunks();

        let key = SessionKey::for_file(&file_name, file_size);
        let mut file_id = self.sessions.lookup(&key).await;

        // Resume negotiation: ask which indices the server already has.
        // Best-effort — on failure we resend everything and let the
        // receiver's dedup sort it out.
        let done = match &file_id {
            Some(id) => match self.api.status(id).await {
                Ok(status) => status
                    .received_chunks
                    .into_iter()
                    .filter(|&i| i < total)
                    .collect(),
                Err(e) => {
                    tracing::warn!(file_id = %id, "resume query failed, resending all chunks: {e}");
                    BTreeSet::new()
                }
            },
            None => BTreeSet::new(),
        };
        if !done.is_empty() {
            tracing::info!(
                file_id = file_id.as_deref().unwrap_or(""),
                stored = done.len(),
                total,
                "resuming upload"
            );
        }

        // Shared with the per-chunk byte hook, which ticks from inside the
        // transport while the loop awaits the reply.
        let progress = Arc::new(Mutex::new(ProgressState::new(total, done.len() as u32)));
        if let Some(id) = &file_id {
            progress.lock().unwrap().set_file_id(id);
        }

        let mut reader = ChunkReader::open(path).await?;
        let mut last_reply = None;

        for span in plan.spans() {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            if done.contains(&span.index) {
                continue;
            }

            self.emit(progress.lock().unwrap().in_flight(0, span.len));
            let data = reader.read_span(span).await?;
            let sub = ChunkSubmission {
                file_id: file_id.clone(),
                file_name: file_name.clone(),
                content_type: content_type.clone(),
                total_chunks: total,
                chunk_index: span.index,
                data,
            };

            let on_bytes = self.byte_sink(&progress, span.len);
            let acked = progress.lock().unwrap().acked_chunks();
            let reply = self.send_with_retry(&sub, &on_bytes, acked, total).await?;
            if reply.file_id.is_empty() {
                return Err(UploadError::MissingFileId { index: span.index });
            }
            if file_id.is_none() {
                // First contact taught us the server-assigned id; persist it
                // so a page reload or crash can resume this upload.
                if let Err(e) = self.sessions.save(&key, &reply.file_id).await {
                    tracing::warn!("failed to persist upload session: {e}");
                }
                progress.lock().unwrap().set_file_id(&reply.file_id);
                file_id = Some(reply.file_id.clone());
            }

            self.emit(progress.lock().unwrap().chunk_acked());
            last_reply = Some(reply);
        }

        // The id is known by now: either from the session store or from the
        // first reply of this run.
        let file_id = match file_id {
            Some(id) => id,
            None => return Err(UploadError::MissingFileId { index: 0 }),
        };

        if let Some(reply) = &last_reply
            && reply.is_complete
            && let Some(path) = &reply.file_path
        {
            return Ok(path.clone());
        }

        // The receiver did not (or could not) auto-finalize; invoke the
        // finalizer explicitly. The chunks are all stored, so one retry of
        // finalize alone is worth more than restarting the upload.
        let req = FinalizeRequest {
            file_id: file_id.clone(),
            file_name,
            content_type,
            total_chunks: total,
        };
        let finalized = match self.api.finalize(&req).await {
            Ok(resp) => resp,
            Err(first) => {
                tracing::warn!(file_id = %file_id, "finalize failed, retrying once: {first}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.api.finalize(&req).await.map_err(|source| {
                    UploadError::Finalize {
                        file_id: file_id.clone(),
                        source,
                    }
                })?
            }
        };
        Ok(finalized.file_path)
    }

    /// Byte hook for one chunk: cumulative transport bytes blend into the
    /// reported percent while the chunk is on the wire.
    fn byte_sink(&self, progress: &Arc<Mutex<ProgressState>>, len: u64) -> ByteSink {
        let state = Arc::clone(progress);
        let callback = self.on_progress.clone();
        Arc::new(move |sent| {
            if let Some(cb) = &callback {
                let snapshot = state.lock().unwrap().in_flight(sent, len);
                cb(snapshot);
            }
        })
    }

    async fn send_with_retry(
        &self,
        sub: &ChunkSubmission,
        on_bytes: &ByteSink,
        succeeded: u32,
        total: u32,
    ) -> Result<medialift_protocol::ChunkUploadResponse, UploadError> {
        let mut last_err = None;
        for attempt in 1..=MAX_SEND_ATTEMPTS {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            match self.api.send_chunk(sub, Arc::clone(on_bytes)).await {
                // A duplicate reply lands here too: the outcome tag says the
                // index is already stored, which is success for this loop.
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    tracing::warn!(
                        chunk_index = sub.chunk_index,
                        attempt,
                        "chunk send failed: {e}"
                    );
                    last_err = Some(e);
                }
            }
            if attempt < MAX_SEND_ATTEMPTS {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
        Err(match last_err {
            Some(ApiError::TooLarge) => UploadError::ChunkTooLarge {
                index: sub.chunk_index,
            },
            Some(source) => UploadError::ChunkFailed {
                index: sub.chunk_index,
                attempts: MAX_SEND_ATTEMPTS,
                succeeded,
                total,
                source,
            },
            // The loop always records an error before falling through.
            None => UploadError::ChunkFailed {
                index: sub.chunk_index,
                attempts: MAX_SEND_ATTEMPTS,
                succeeded,
                total,
                source: ApiError::Contract("retry loop exhausted without a reply".into()),
            },
        })
    }

    fn emit(&self, progress: crate::progress::UploadProgress) {
        if let Some(cb) = &self.on_progress {
            cb(progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::io::Write;

    use async_trait::async_trait;
    use medialift_protocol::{
        ChunkOutcome, ChunkUploadResponse, ErrorCode, FinalizeResponse, UploadStatusResponse,
    };

    use crate::session::MemorySessionBackend;

    const FAKE_ID: &str = "fake-upload-1";

    #[derive(Default)]
    struct FakeInner {
        total: u32,
        chunks: BTreeMap<u32, Vec<u8>>,
        sends: Vec<u32>,
        transient_failures: HashMap<u32, u32>,
        too_large: HashSet<u32>,
        omit_file_id: bool,
        defer_finalize: bool,
        finalize_failures: u32,
        finalized: Option<String>,
    }

    /// In-process receiver with scripted fault injection.
    #[derive(Default)]
    struct FakeApi {
        inner: Mutex<FakeInner>,
    }

    impl FakeApi {
        fn scripted(f: impl FnOnce(&mut FakeInner)) -> Self {
            let api = Self::default();
            f(&mut api.inner.lock().unwrap());
            api
        }

        fn assembled(&self) -> Vec<u8> {
            let inner = self.inner.lock().unwrap();
            inner.chunks.values().flatten().copied().collect()
        }

        fn send_log(&self) -> Vec<u32> {
            self.inner.lock().unwrap().sends.clone()
        }
    }

    #[async_trait]
    impl UploadApi for FakeApi {
        async fn send_chunk(
            &self,
            sub: &ChunkSubmission,
            on_bytes: ByteSink,
        ) -> Result<ChunkUploadResponse, ApiError> {
            let mut inner = self.inner.lock().unwrap();
            inner.total = sub.total_chunks;
            inner.sends.push(sub.chunk_index);

            if inner.too_large.contains(&sub.chunk_index) {
                return Err(ApiError::TooLarge);
            }
            if let Some(remaining) = inner.transient_failures.get_mut(&sub.chunk_index)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(ApiError::Rejected {
                    code: ErrorCode::Internal,
                    message: "simulated outage".into(),
                });
            }

            // Mimic the transport ticking partway through the body.
            let len = sub.data.len() as u64;
            on_bytes(len / 2);
            on_bytes(len);

            let file_id = if inner.omit_file_id {
                String::new()
            } else {
                FAKE_ID.to_string()
            };
            let outcome = if inner.chunks.contains_key(&sub.chunk_index) {
                ChunkOutcome::Duplicate
            } else {
                inner.chunks.insert(sub.chunk_index, sub.data.clone());
                ChunkOutcome::Stored
            };
            if inner.chunks.len() as u32 == inner.total && !inner.defer_finalize {
                inner.finalized = Some(format!("/media/{FAKE_ID}"));
            }
            Ok(ChunkUploadResponse {
                file_id,
                outcome,
                is_complete: inner.finalized.is_some(),
                file_path: inner.finalized.clone(),
            })
        }

        async fn status(&self, file_id: &str) -> Result<UploadStatusResponse, ApiError> {
            let inner = self.inner.lock().unwrap();
            Ok(UploadStatusResponse {
                file_id: file_id.to_string(),
                received_chunks: inner.chunks.keys().copied().collect(),
            })
        }

        async fn finalize(
            &self,
            req: &FinalizeRequest,
        ) -> Result<FinalizeResponse, ApiError> {
            let mut inner = self.inner.lock().unwrap();
            if inner.finalize_failures > 0 {
                inner.finalize_failures -= 1;
                return Err(ApiError::Rejected {
                    code: ErrorCode::Internal,
                    message: "simulated finalize outage".into(),
                });
            }
            if (inner.chunks.len() as u32) < req.total_chunks {
                return Err(ApiError::Rejected {
                    code: ErrorCode::IncompleteUpload,
                    message: "gaps".into(),
                });
            }
            let file_path = inner
                .finalized
                .get_or_insert(format!("/media/{FAKE_ID}"))
                .clone();
            Ok(FinalizeResponse {
                file_path,
                sha256: String::new(),
            })
        }
    }

    fn write_source(dir: &tempfile::TempDir, name: &str, len: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&data).unwrap();
        path
    }

    fn uploader(api: FakeApi) -> Uploader<FakeApi> {
        Uploader::new(api, UploadSessionStore::new(MemorySessionBackend::new()))
    }

    #[tokio::test]
    async fn round_trip_matches_source_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "lecture.mp4", 10_000);
        let up = uploader(FakeApi::default());

        let media = up.upload_with_chunk_size(&path, 4096).await.unwrap();
        assert_eq!(media, format!("/media/{FAKE_ID}"));
        assert_eq!(up.api().assembled(), std::fs::read(&path).unwrap());
        // 10_000 / 4096 → 3 chunks, sent in order.
        assert_eq!(up.api().send_log(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn first_reply_id_is_persisted_for_resume() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "clip.mp4", 100);
        let sessions = UploadSessionStore::new(MemorySessionBackend::new());
        let up = Uploader::new(FakeApi::default(), sessions);

        up.upload_with_chunk_size(&path, 64).await.unwrap();

        let key = SessionKey::for_file("clip.mp4", 100);
        assert_eq!(up.sessions.lookup(&key).await.as_deref(), Some(FAKE_ID));
    }

    #[tokio::test]
    async fn resume_skips_already_stored_chunks() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "big.mp4", 400);
        let source = std::fs::read(&path).unwrap();

        // Chunks 0 and 1 survived a previous run.
        let api = FakeApi::scripted(|inner| {
            inner.total = 4;
            inner.chunks.insert(0, source[0..100].to_vec());
            inner.chunks.insert(1, source[100..200].to_vec());
        });
        let sessions = UploadSessionStore::new(MemorySessionBackend::new());
        sessions
            .save(&SessionKey::for_file("big.mp4", 400), FAKE_ID)
            .await
            .unwrap();
        let up = Uploader::new(api, sessions);

        up.upload_with_chunk_size(&path, 100).await.unwrap();
        assert_eq!(up.api().send_log(), vec![2, 3]);
        assert_eq!(up.api().assembled(), source);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_within_budget_succeed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "a.mp4", 50);
        let api = FakeApi::scripted(|inner| {
            inner.transient_failures.insert(0, 3);
        });
        let up = uploader(api);

        up.upload_with_chunk_size(&path, 50).await.unwrap();
        // 3 failures + 1 success.
        assert_eq!(up.api().send_log(), vec![0, 0, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_name_the_chunk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "a.mp4", 200);
        let api = FakeApi::scripted(|inner| {
            inner.transient_failures.insert(1, 4);
        });
        let up = uploader(api);

        let err = up.upload_with_chunk_size(&path, 100).await.unwrap_err();
        match err {
            UploadError::ChunkFailed {
                index,
                attempts,
                succeeded,
                total,
                ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(attempts, 4);
                assert_eq!(succeeded, 1);
                assert_eq!(total, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_chunk_aborts_with_advice() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "a.mp4", 100);
        let api = FakeApi::scripted(|inner| {
            inner.too_large.insert(0);
        });
        let up = uploader(api);

        let err = up.upload_with_chunk_size(&path, 100).await.unwrap_err();
        assert!(matches!(err, UploadError::ChunkTooLarge { index: 0 }));
        assert!(err.to_string().contains("administrator"));
    }

    #[tokio::test]
    async fn blank_file_id_is_a_contract_violation() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "a.mp4", 10);
        let api = FakeApi::scripted(|inner| {
            inner.omit_file_id = true;
        });
        let up = uploader(api);

        let err = up.upload_with_chunk_size(&path, 10).await.unwrap_err();
        assert!(matches!(err, UploadError::MissingFileId { index: 0 }));
        // A contract violation is not retried.
        assert_eq!(up.api().send_log(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_finalize_retries_once_then_succeeds() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "a.mp4", 120);
        let api = FakeApi::scripted(|inner| {
            inner.defer_finalize = true;
            inner.finalize_failures = 1;
        });
        let up = uploader(api);

        let media = up.upload_with_chunk_size(&path, 60).await.unwrap();
        assert_eq!(media, format!("/media/{FAKE_ID}"));
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_failure_is_distinct_from_transport_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "a.mp4", 120);
        let api = FakeApi::scripted(|inner| {
            inner.defer_finalize = true;
            inner.finalize_failures = 2;
        });
        let up = uploader(api);

        let err = up.upload_with_chunk_size(&path, 60).await.unwrap_err();
        assert!(matches!(err, UploadError::Finalize { .. }));
    }

    #[tokio::test]
    async fn cancellation_stops_between_chunks() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "a.mp4", 100);
        let up = uploader(FakeApi::default());
        up.cancel_token().cancel();

        let err = up.upload_with_chunk_size(&path, 10).await.unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert!(up.api().send_log().is_empty());
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_complete() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "a.mp4", 300);
        let seen = Arc::new(Mutex::new(Vec::<f64>::new()));
        let sink = Arc::clone(&seen);
        let up = uploader(FakeApi::default()).with_progress(Arc::new(move |p| {
            sink.lock().unwrap().push(p.percent);
        }));

        up.upload_with_chunk_size(&path, 100).await.unwrap();
        let percents = seen.lock().unwrap();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*percents.last().unwrap(), 100.0);
    }

    #[tokio::test]
    async fn percent_moves_within_a_chunk_not_only_at_boundaries() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_source(&dir, "a.mp4", 400);
        let seen = Arc::new(Mutex::new(Vec::<f64>::new()));
        let sink = Arc::clone(&seen);
        let up = uploader(FakeApi::default()).with_progress(Arc::new(move |p| {
            sink.lock().unwrap().push(p.percent);
        }));

        up.upload_with_chunk_size(&path, 100).await.unwrap();
        let percents = seen.lock().unwrap();
        // 4 chunks; the transport tick at half of chunk 0 must surface as a
        // value strictly between the 0% and 25% boundaries.
        assert!(percents.contains(&12.5));
        assert!(percents.contains(&100.0));
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn content_type_guessing() {
        assert_eq!(guess_content_type(Path::new("a/l.mp4")), "video/mp4");
        assert_eq!(guess_content_type(Path::new("L.MOV")), "video/quicktime");
        assert_eq!(guess_content_type(Path::new("notes.pdf")), "application/pdf");
        assert_eq!(
            guess_content_type(Path::new("mystery")),
            "application/octet-stream"
        );
    }
}
