use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medialift_protocol::UploadMetaView;

/// Fields a client declares with every chunk submission.
///
/// Used to create metadata on first contact and to reconstruct it when a
/// crash left chunk records without a metadata file.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUpload {
    pub file_name: String,
    pub content_type: String,
    pub total_chunks: u32,
}

/// Bookkeeping record for one in-progress or finalized upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMeta {
    pub file_id: String,
    pub file_name: String,
    pub content_type: String,
    pub total_chunks: u32,
    /// Indices persisted so far. Backends that can scan their chunk records
    /// treat those as the source of truth and this set as a cache.
    pub received: BTreeSet<u32>,
    pub created_at: DateTime<Utc>,
    /// Retrieval path, set exactly once at finalization. Terminal: once set,
    /// further chunk submissions are no-ops that report completion.
    #[serde(default)]
    pub final_path: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl UploadMeta {
    pub fn new(file_id: String, declared: &NewUpload) -> Self {
        Self {
            file_id,
            file_name: declared.file_name.clone(),
            content_type: declared.content_type.clone(),
            total_chunks: declared.total_chunks,
            received: BTreeSet::new(),
            created_at: Utc::now(),
            final_path: None,
            sha256: None,
            finalized_at: None,
        }
    }

    /// `true` once every index in `[0, total_chunks)` has been recorded.
    pub fn has_all_chunks(&self) -> bool {
        self.received.len() as u32 == self.total_chunks
            && self.received.iter().next_back().is_none_or(|&last| last < self.total_chunks)
    }

    pub fn is_finalized(&self) -> bool {
        self.final_path.is_some()
    }

    /// Indices still absent, in ascending order.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }

    pub fn view(&self) -> UploadMetaView {
        UploadMetaView {
            file_id: self.file_id.clone(),
            file_name: self.file_name.clone(),
            content_type: self.content_type.clone(),
            total_chunks: self.total_chunks,
            received_count: self.received.len() as u32,
            is_complete: self.is_finalized(),
            file_path: self.final_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UploadMeta {
        UploadMeta::new(
            "f1".into(),
            &NewUpload {
                file_name: "lecture.mp4".into(),
                content_type: "video/mp4".into(),
                total_chunks: 3,
            },
        )
    }

    #[test]
    fn fresh_meta_is_empty() {
        let meta = sample();
        assert!(!meta.has_all_chunks());
        assert!(!meta.is_finalized());
        assert_eq!(meta.missing_chunks(), vec![0, 1, 2]);
    }

    #[test]
    fn completeness_requires_every_index() {
        let mut meta = sample();
        meta.received.insert(0);
        meta.received.insert(2);
        assert!(!meta.has_all_chunks());
        assert_eq!(meta.missing_chunks(), vec![1]);

        meta.received.insert(1);
        assert!(meta.has_all_chunks());
        assert!(meta.missing_chunks().is_empty());
    }

    #[test]
    fn out_of_range_index_never_counts_as_complete() {
        let mut meta = sample();
        meta.received.extend([0, 1, 5]);
        assert!(!meta.has_all_chunks());
    }

    #[test]
    fn view_reflects_progress() {
        let mut meta = sample();
        meta.received.insert(0);
        let view = meta.view();
        assert_eq!(view.received_count, 1);
        assert_eq!(view.total_chunks, 3);
        assert!(!view.is_complete);
    }
}
