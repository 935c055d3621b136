use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use async_trait::async_trait;
use medialift_protocol::MEDIA_ROOT;

use crate::store::{ChunkPut, Finalized};
use crate::{NewUpload, StoreError, UploadMeta, UploadStore};

struct MemUpload {
    meta: UploadMeta,
    chunks: BTreeMap<u32, Vec<u8>>,
    artifact: Option<Vec<u8>>,
}

/// In-memory [`UploadStore`] used by tests and the service unit suite.
///
/// Locking is a plain `RwLock` held only across synchronous map edits,
/// never across an await point.
#[derive(Default)]
pub struct MemoryUploadStore {
    inner: RwLock<HashMap<String, MemUpload>>,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn create(&self, declared: &NewUpload) -> Result<UploadMeta, StoreError> {
        let file_id = Uuid::new_v4().to_string();
        let meta = UploadMeta::new(file_id.clone(), declared);
        let mut inner = self.inner.write().unwrap();
        inner.insert(
            file_id,
            MemUpload {
                meta: meta.clone(),
                chunks: BTreeMap::new(),
                artifact: None,
            },
        );
        Ok(meta)
    }

    async fn meta(&self, file_id: &str) -> Result<Option<UploadMeta>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.get(file_id).map(|u| u.meta.clone()))
    }

    async fn recover(
        &self,
        file_id: &str,
        _declared: &NewUpload,
    ) -> Result<Option<UploadMeta>, StoreError> {
        // Memory is lost with the process; there are no orphaned chunk
        // records to rebuild from.
        self.meta(file_id).await
    }

    async fn put_chunk(
        &self,
        file_id: &str,
        index: u32,
        data: &[u8],
    ) -> Result<ChunkPut, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let Some(upload) = inner.get_mut(file_id) else {
            return Err(StoreError::UnknownUpload(file_id.to_string()));
        };
        if index >= upload.meta.total_chunks {
            return Err(StoreError::IndexOutOfRange {
                file_id: file_id.to_string(),
                index,
                total_chunks: upload.meta.total_chunks,
            });
        }
        if upload.chunks.contains_key(&index) {
            return Ok(ChunkPut::Duplicate);
        }
        upload.chunks.insert(index, data.to_vec());
        upload.meta.received.insert(index);
        Ok(ChunkPut::Stored)
    }

    async fn received_indices(&self, file_id: &str) -> Result<Vec<u32>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .get(file_id)
            .map(|u| u.chunks.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn finalize(&self, file_id: &str) -> Result<Finalized, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let Some(upload) = inner.get_mut(file_id) else {
            return Err(StoreError::UnknownUpload(file_id.to_string()));
        };
        if let Some(path) = &upload.meta.final_path {
            return Ok(Finalized {
                path: path.clone(),
                sha256: upload.meta.sha256.clone().unwrap_or_default(),
            });
        }

        let missing: Vec<u32> = (0..upload.meta.total_chunks)
            .filter(|i| !upload.chunks.contains_key(i))
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::MissingChunks {
                file_id: file_id.to_string(),
                missing,
            });
        }

        let mut artifact = Vec::new();
        let mut hasher = Sha256::new();
        for bytes in upload.chunks.values() {
            hasher.update(bytes);
            artifact.extend_from_slice(bytes);
        }
        let sha256 = hex::encode(hasher.finalize());
        let path = format!("{MEDIA_ROOT}/{file_id}");

        upload.artifact = Some(artifact);
        upload.chunks.clear();
        upload.meta.final_path = Some(path.clone());
        upload.meta.sha256 = Some(sha256.clone());
        upload.meta.finalized_at = Some(Utc::now());
        Ok(Finalized { path, sha256 })
    }

    async fn artifact(&self, file_id: &str) -> Result<Option<(UploadMeta, Vec<u8>)>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .get(file_id)
            .and_then(|u| u.artifact.as_ref().map(|a| (u.meta.clone(), a.clone()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(total: u32) -> NewUpload {
        NewUpload {
            file_name: "clip.mp4".into(),
            content_type: "video/mp4".into(),
            total_chunks: total,
        }
    }

    #[tokio::test]
    async fn idempotent_chunk_receipt() {
        let store = MemoryUploadStore::new();
        let meta = store.create(&declared(1)).await.unwrap();
        assert_eq!(store.put_chunk(&meta.file_id, 0, b"x").await.unwrap(), ChunkPut::Stored);
        assert_eq!(store.put_chunk(&meta.file_id, 0, b"x").await.unwrap(), ChunkPut::Duplicate);
        assert_eq!(store.received_indices(&meta.file_id).await.unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn order_independent_assembly() {
        let store = MemoryUploadStore::new();
        let meta = store.create(&declared(4)).await.unwrap();
        for index in [2u32, 0, 3, 1] {
            let byte = vec![b'a' + index as u8];
            store.put_chunk(&meta.file_id, index, &byte).await.unwrap();
        }
        store.finalize(&meta.file_id).await.unwrap();
        let (_, bytes) = store.artifact(&meta.file_id).await.unwrap().unwrap();
        assert_eq!(&bytes, b"abcd");
    }

    #[tokio::test]
    async fn finalize_twice_returns_same_path() {
        let store = MemoryUploadStore::new();
        let meta = store.create(&declared(1)).await.unwrap();
        store.put_chunk(&meta.file_id, 0, b"data").await.unwrap();
        let a = store.finalize(&meta.file_id).await.unwrap();
        let b = store.finalize(&meta.file_id).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn unknown_upload_errors_on_put_but_not_status() {
        let store = MemoryUploadStore::new();
        assert!(matches!(
            store.put_chunk("ghost", 0, b"x").await.unwrap_err(),
            StoreError::UnknownUpload(_)
        ));
        assert!(store.received_indices("ghost").await.unwrap().is_empty());
    }
}
