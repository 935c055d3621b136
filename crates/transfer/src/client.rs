use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};

use medialift_protocol::{
    CHUNK_SEND_TIMEOUT, ChunkUploadResponse, ErrorBody, ErrorCode, FinalizeRequest,
    FinalizeResponse, UploadStatusResponse, field,
};

/// Frame size for streaming a chunk body to the transport.
const STREAM_FRAME_BYTES: usize = 64 * 1024;

/// Cumulative byte-progress hook for one chunk submission.
///
/// Invoked with the total bytes handed to the transport so far, so the
/// reported percent moves while a chunk is on the wire instead of jumping
/// only at chunk boundaries. Owned (`Arc`) because the request body it
/// feeds must be `'static`.
pub type ByteSink = Arc<dyn Fn(u64) + Send + Sync>;

/// One chunk's worth of submission data.
#[derive(Debug, Clone)]
pub struct ChunkSubmission {
    /// Absent only on the very first chunk of a fresh upload.
    pub file_id: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub total_chunks: u32,
    pub chunk_index: u32,
    pub data: Vec<u8>,
}

/// Errors from one API call.
///
/// `TooLarge` is split out from `Rejected` because the transport treats it
/// differently: it is a chunk-size misconfiguration, not a transient fault,
/// and after bounded retries it aborts the upload with remediation advice.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request ({code:?}): {message}")]
    Rejected {
        code: ErrorCode,
        message: String,
    },

    #[error("chunk exceeds the server's size limit")]
    TooLarge,

    #[error("malformed server reply: {0}")]
    Contract(String),
}

/// The receiver-side API as seen by the upload loop.
///
/// A trait so tests drive the loop against an in-process fake; the real
/// implementation is [`HttpUploadApi`].
#[async_trait]
pub trait UploadApi: Send + Sync {
    /// Submits one chunk, reporting cumulative transport bytes through
    /// `on_bytes` as the body goes out.
    async fn send_chunk(
        &self,
        sub: &ChunkSubmission,
        on_bytes: ByteSink,
    ) -> Result<ChunkUploadResponse, ApiError>;

    /// Resume query: which indices does the server already have?
    async fn status(&self, file_id: &str) -> Result<UploadStatusResponse, ApiError>;

    async fn finalize(&self, req: &FinalizeRequest) -> Result<FinalizeResponse, ApiError>;
}

/// HTTP client for the medialift upload API.
pub struct HttpUploadApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpUploadApi {
    /// `base_url` is the server origin, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(CHUNK_SEND_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Maps a non-2xx reply to the typed error taxonomy.
    async fn reject(resp: reqwest::Response) -> ApiError {
        if resp.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::TooLarge;
        }
        let status = resp.status();
        match resp.json::<ErrorBody>().await {
            Ok(body) => ApiError::Rejected {
                code: body.code,
                message: body.message,
            },
            Err(_) => ApiError::Contract(format!("non-JSON error reply with status {status}")),
        }
    }
}

/// Streams a chunk in fixed frames, ticking `on_bytes` with the cumulative
/// count as each frame is pulled by the transport.
fn chunk_body(data: Vec<u8>, on_bytes: ByteSink) -> reqwest::Body {
    let data = Bytes::from(data);
    let mut frames = Vec::with_capacity(data.len().div_ceil(STREAM_FRAME_BYTES));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + STREAM_FRAME_BYTES).min(data.len());
        frames.push(data.slice(offset..end));
        offset = end;
    }
    let mut sent = 0u64;
    reqwest::Body::wrap_stream(stream::iter(frames.into_iter().map(move |frame| {
        sent += frame.len() as u64;
        on_bytes(sent);
        Ok::<_, std::io::Error>(frame)
    })))
}

#[async_trait]
impl UploadApi for HttpUploadApi {
    async fn send_chunk(
        &self,
        sub: &ChunkSubmission,
        on_bytes: ByteSink,
    ) -> Result<ChunkUploadResponse, ApiError> {
        let len = sub.data.len() as u64;
        let part = Part::stream_with_length(chunk_body(sub.data.clone(), on_bytes), len)
            .file_name(sub.file_name.clone())
            .mime_str(&sub.content_type)?;
        let mut form = Form::new()
            .text(field::FILE_NAME, sub.file_name.clone())
            .text(field::CONTENT_TYPE, sub.content_type.clone())
            .text(field::TOTAL_CHUNKS, sub.total_chunks.to_string())
            .text(field::CHUNK_INDEX, sub.chunk_index.to_string())
            .part(field::CHUNK, part);
        if let Some(file_id) = &sub.file_id {
            form = form.text(field::FILE_ID, file_id.clone());
        }

        let resp = self
            .client
            .post(self.url("/api/uploads/chunk"))
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::reject(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn status(&self, file_id: &str) -> Result<UploadStatusResponse, ApiError> {
        let resp = self
            .client
            .get(self.url("/api/uploads/status"))
            .query(&[("fileId", file_id)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::reject(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn finalize(&self, req: &FinalizeRequest) -> Result<FinalizeResponse, ApiError> {
        let resp = self
            .client
            .post(self.url("/api/uploads/finalize"))
            .json(req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::reject(resp).await);
        }
        Ok(resp.json().await?)
    }
}
