use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use async_trait::async_trait;
use medialift_protocol::MEDIA_ROOT;

use crate::store::{ChunkPut, Finalized};
use crate::{NewUpload, StoreError, UploadMeta, UploadStore};

/// Filesystem-backed [`UploadStore`].
///
/// Layout under the root:
///
/// ```text
/// uploads/<file_id>/meta.json
/// uploads/<file_id>/chunks/<index>.part
/// media/<file_id>              (finalized artifact)
/// ```
///
/// The unique-key constraint on `(file_id, index)` is a `hard_link` from a
/// freshly written temp file to the chunk's final name: linking fails with
/// `AlreadyExists` when the index was stored before, and that failure is the
/// duplicate signal. The chunk directory listing, not `meta.json`, is the
/// source of truth for which indices exist, so a crash between chunk write
/// and meta write loses nothing.
pub struct FsUploadStore {
    root: PathBuf,
}

impl FsUploadStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("uploads")).await?;
        tokio::fs::create_dir_all(root.join("media")).await?;
        Ok(Self { root })
    }

    fn upload_dir(&self, file_id: &str) -> PathBuf {
        self.root.join("uploads").join(file_id)
    }

    fn chunks_dir(&self, file_id: &str) -> PathBuf {
        self.upload_dir(file_id).join("chunks")
    }

    fn meta_path(&self, file_id: &str) -> PathBuf {
        self.upload_dir(file_id).join("meta.json")
    }

    fn media_path(&self, file_id: &str) -> PathBuf {
        self.root.join("media").join(file_id)
    }

    async fn load_meta(&self, file_id: &str) -> Result<Option<UploadMeta>, StoreError> {
        match tokio::fs::read(self.meta_path(file_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_meta(&self, meta: &UploadMeta) -> Result<(), StoreError> {
        let path = self.meta_path(&meta.file_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(meta)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Scans the chunk directory for persisted indices.
    async fn scan_indices(&self, file_id: &str) -> Result<BTreeSet<u32>, StoreError> {
        let mut indices = BTreeSet::new();
        let mut dir = match tokio::fs::read_dir(self.chunks_dir(file_id)).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(indices),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".part")
                && let Ok(index) = stem.parse::<u32>()
            {
                indices.insert(index);
            }
        }
        Ok(indices)
    }
}

#[async_trait]
impl UploadStore for FsUploadStore {
    async fn create(&self, declared: &NewUpload) -> Result<UploadMeta, StoreError> {
        let file_id = Uuid::new_v4().to_string();
        let meta = UploadMeta::new(file_id.clone(), declared);
        tokio::fs::create_dir_all(self.chunks_dir(&file_id)).await?;
        self.save_meta(&meta).await?;
        tracing::debug!(file_id, file_name = %meta.file_name, total_chunks = meta.total_chunks, "upload created");
        Ok(meta)
    }

    async fn meta(&self, file_id: &str) -> Result<Option<UploadMeta>, StoreError> {
        self.load_meta(file_id).await
    }

    async fn recover(
        &self,
        file_id: &str,
        declared: &NewUpload,
    ) -> Result<Option<UploadMeta>, StoreError> {
        if let Some(meta) = self.load_meta(file_id).await? {
            return Ok(Some(meta));
        }
        let indices = self.scan_indices(file_id).await?;
        if indices.is_empty() {
            return Ok(None);
        }
        // Chunk records survived but meta.json did not. Rebuild from the
        // declared fields and what is actually on disk.
        let mut meta = UploadMeta::new(file_id.to_string(), declared);
        meta.received = indices;
        self.save_meta(&meta).await?;
        tracing::warn!(
            file_id,
            recovered = meta.received.len(),
            "reconstructed upload metadata from orphaned chunk records"
        );
        Ok(Some(meta))
    }

    async fn put_chunk(
        &self,
        file_id: &str,
        index: u32,
        data: &[u8],
    ) -> Result<ChunkPut, StoreError> {
        match self.load_meta(file_id).await? {
            Some(meta) if index >= meta.total_chunks => {
                return Err(StoreError::IndexOutOfRange {
                    file_id: file_id.to_string(),
                    index,
                    total_chunks: meta.total_chunks,
                });
            }
            Some(_) => {}
            None => {
                // Orphaned chunk records (meta lost to a crash) may still be
                // appended to; an id with no trace at all is rejected.
                if self.scan_indices(file_id).await?.is_empty() {
                    return Err(StoreError::UnknownUpload(file_id.to_string()));
                }
            }
        }

        let chunks = self.chunks_dir(file_id);
        tokio::fs::create_dir_all(&chunks).await?;
        let final_path = chunks.join(format!("{index}.part"));
        let tmp_path = chunks.join(format!("{index}.tmp-{}", Uuid::new_v4()));

        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        tmp.write_all(data).await?;
        tmp.flush().await?;
        drop(tmp);

        // hard_link is the unique-key constraint: it fails atomically if the
        // chunk already exists, even if two retries race.
        let outcome = match tokio::fs::hard_link(&tmp_path, &final_path).await {
            Ok(()) => ChunkPut::Stored,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => ChunkPut::Duplicate,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
        };
        tokio::fs::remove_file(&tmp_path).await?;

        if outcome == ChunkPut::Stored
            && let Some(mut meta) = self.load_meta(file_id).await?
        {
            meta.received.insert(index);
            self.save_meta(&meta).await?;
        }
        Ok(outcome)
    }

    async fn received_indices(&self, file_id: &str) -> Result<Vec<u32>, StoreError> {
        Ok(self.scan_indices(file_id).await?.into_iter().collect())
    }

    async fn finalize(&self, file_id: &str) -> Result<Finalized, StoreError> {
        let Some(mut meta) = self.load_meta(file_id).await? else {
            return Err(StoreError::UnknownUpload(file_id.to_string()));
        };
        if let Some(path) = &meta.final_path {
            return Ok(Finalized {
                path: path.clone(),
                sha256: meta.sha256.clone().unwrap_or_default(),
            });
        }

        let on_disk = self.scan_indices(file_id).await?;
        let missing: Vec<u32> = (0..meta.total_chunks)
            .filter(|i| !on_disk.contains(i))
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::MissingChunks {
                file_id: file_id.to_string(),
                missing,
            });
        }

        let media_path = self.media_path(file_id);
        let tmp_path = self.root.join("media").join(format!(".tmp-{file_id}"));
        let mut out = tokio::fs::File::create(&tmp_path).await?;
        let mut hasher = Sha256::new();
        for index in 0..meta.total_chunks {
            let bytes =
                tokio::fs::read(self.chunks_dir(file_id).join(format!("{index}.part"))).await?;
            hasher.update(&bytes);
            out.write_all(&bytes).await?;
        }
        out.flush().await?;
        drop(out);
        tokio::fs::rename(&tmp_path, &media_path).await?;

        let sha256 = hex::encode(hasher.finalize());
        meta.received = on_disk;
        meta.final_path = Some(format!("{MEDIA_ROOT}/{file_id}"));
        meta.sha256 = Some(sha256.clone());
        meta.finalized_at = Some(Utc::now());
        self.save_meta(&meta).await?;

        // Chunk records are no longer needed; failure to purge must not
        // block finalization.
        if let Err(e) = tokio::fs::remove_dir_all(self.chunks_dir(file_id)).await {
            tracing::warn!(file_id, "failed to purge chunk records: {e}");
        }

        tracing::info!(file_id, path = meta.final_path.as_deref().unwrap_or(""), "upload finalized");
        Ok(Finalized {
            path: meta.final_path.clone().unwrap_or_default(),
            sha256,
        })
    }

    async fn artifact(&self, file_id: &str) -> Result<Option<(UploadMeta, Vec<u8>)>, StoreError> {
        let Some(meta) = self.load_meta(file_id).await? else {
            return Ok(None);
        };
        if !meta.is_finalized() {
            return Ok(None);
        }
        match tokio::fs::read(self.media_path(file_id)).await {
            Ok(bytes) => Ok(Some((meta, bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps `Path` in the public API surface even though all internals use
/// `PathBuf` joins.
impl AsRef<Path> for FsUploadStore {
    fn as_ref(&self) -> &Path {
        &self.root
    }
}
