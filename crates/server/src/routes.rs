use axum::Json;
use axum::Router;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use medialift_protocol::{
    ChunkOutcome, ChunkUploadResponse, FinalizeRequest, FinalizeResponse, MEDIA_ROOT,
    UploadMetaView, UploadStatusResponse, field,
};
use medialift_store::{ChunkPut, NewUpload};

use crate::error::ApiError;
use crate::service::{AppState, ChunkIngest};

/// Multipart framing adds headers and boundaries around the chunk body;
/// this slack keeps a maximum-size chunk inside the request body limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_chunk_bytes() + MULTIPART_OVERHEAD;
    Router::new()
        .route("/api/uploads/chunk", post(upload_chunk))
        .route("/api/uploads/status", get(upload_status))
        .route("/api/uploads/finalize", post(finalize_upload))
        .route("/api/uploads/{file_id}/meta", get(upload_meta))
        .route(&format!("{MEDIA_ROOT}/{{file_id}}"), get(serve_media))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn multipart_error(limit: usize) -> impl Fn(MultipartError) -> ApiError {
    move |e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            // The whole request body blew the limit before our own
            // chunk-size check could run.
            ApiError::PayloadTooLarge { limit }
        } else {
            ApiError::InvalidRequest(format!("malformed multipart body: {e}"))
        }
    }
}

fn require<T>(value: Option<T>, name: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::InvalidRequest(format!("missing field {name}")))
}

fn parse_u32(raw: &str, name: &str) -> Result<u32, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::InvalidRequest(format!("{name} must be a non-negative integer")))
}

async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>, ApiError> {
    let as_api_error = multipart_error(state.max_chunk_bytes());
    let mut file_id = None;
    let mut file_name = None;
    let mut content_type = None;
    let mut total_chunks = None;
    let mut chunk_index = None;
    let mut data = None;

    while let Some(part) = multipart.next_field().await.map_err(&as_api_error)? {
        let name = part.name().map(str::to_string);
        match name.as_deref() {
            Some(field::FILE_ID) => file_id = Some(part.text().await.map_err(&as_api_error)?),
            Some(field::FILE_NAME) => file_name = Some(part.text().await.map_err(&as_api_error)?),
            Some(field::CONTENT_TYPE) => {
                content_type = Some(part.text().await.map_err(&as_api_error)?)
            }
            Some(field::TOTAL_CHUNKS) => {
                let raw = part.text().await.map_err(&as_api_error)?;
                total_chunks = Some(parse_u32(&raw, field::TOTAL_CHUNKS)?);
            }
            Some(field::CHUNK_INDEX) => {
                let raw = part.text().await.map_err(&as_api_error)?;
                chunk_index = Some(parse_u32(&raw, field::CHUNK_INDEX)?);
            }
            Some(field::CHUNK) => {
                data = Some(part.bytes().await.map_err(&as_api_error)?.to_vec())
            }
            _ => {}
        }
    }

    let ingest = ChunkIngest {
        file_id,
        declared: NewUpload {
            file_name: require(file_name, field::FILE_NAME)?,
            content_type: require(content_type, field::CONTENT_TYPE)?
                .trim()
                .to_string(),
            total_chunks: require(total_chunks, field::TOTAL_CHUNKS)?,
        },
        chunk_index: require(chunk_index, field::CHUNK_INDEX)?,
        data: require(data, field::CHUNK)?,
    };

    let result = state.ingest_chunk(ingest).await?;
    Ok(Json(ChunkUploadResponse {
        file_id: result.meta.file_id.clone(),
        outcome: match result.outcome {
            ChunkPut::Stored => ChunkOutcome::Stored,
            ChunkPut::Duplicate => ChunkOutcome::Duplicate,
        },
        is_complete: result.meta.is_finalized(),
        file_path: result.meta.final_path,
    }))
}

#[derive(Deserialize)]
struct StatusQuery {
    #[serde(rename = "fileId")]
    file_id: String,
}

/// Resume query. Side-effect-free: an unknown id answers with an empty index
/// list rather than an error, and the client falls back to sending
/// everything.
async fn upload_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<UploadStatusResponse>, ApiError> {
    let received_chunks = state.store().received_indices(&query.file_id).await?;
    Ok(Json(UploadStatusResponse {
        file_id: query.file_id,
        received_chunks,
    }))
}

async fn finalize_upload(
    State(state): State<AppState>,
    Json(req): Json<FinalizeRequest>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    let declared = NewUpload {
        file_name: req.file_name,
        content_type: req.content_type,
        total_chunks: req.total_chunks,
    };
    // recover() lets an explicit finalize repair metadata lost to a crash,
    // as long as the chunk records themselves survived.
    if state
        .store()
        .recover(&req.file_id, &declared)
        .await?
        .is_none()
    {
        return Err(ApiError::UnknownUpload(req.file_id));
    }
    let finalized = state.store().finalize(&req.file_id).await?;
    Ok(Json(FinalizeResponse {
        file_path: finalized.path,
        sha256: finalized.sha256,
    }))
}

async fn upload_meta(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<UploadMetaView>, ApiError> {
    let meta = state
        .store()
        .meta(&file_id)
        .await?
        .ok_or(ApiError::UnknownUpload(file_id))?;
    Ok(Json(meta.view()))
}

async fn serve_media(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (meta, bytes) = state
        .store()
        .artifact(&file_id)
        .await?
        .ok_or(ApiError::UnknownUpload(file_id))?;
    Ok(([(header::CONTENT_TYPE, meta.content_type)], bytes))
}
