use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::checksum::verify_content_md5;
use crate::config::PAGE_SIZE;
use crate::{
    BlobError, BlobKind, BlobLocation, BlobResult, BlockId, ChunkConditions, ChunkResponse,
    ChunkStore, ResourceProperties,
};

#[derive(Debug, Clone)]
struct MemoryBlob {
    kind: BlobKind,
    content: Vec<u8>,
    staged: HashMap<BlockId, Bytes>,
    committed: Vec<BlockId>,
    etag: String,
    last_modified: DateTime<Utc>,
    lease_id: Option<String>,
}

impl MemoryBlob {
    fn new(kind: BlobKind, content: Vec<u8>, etag: String) -> Self {
        Self {
            kind,
            content,
            staged: HashMap::new(),
            committed: Vec::new(),
            etag,
            last_modified: Utc::now(),
            lease_id: None,
        }
    }

    fn touch(&mut self, etag: String) {
        self.etag = etag;
        self.last_modified = Utc::now();
    }

    fn response(&self) -> ChunkResponse {
        ChunkResponse {
            etag: Some(self.etag.clone()),
            last_modified: Some(self.last_modified),
            append_offset: None,
        }
    }

    fn check_kind(&self, expected: BlobKind) -> BlobResult<()> {
        if self.kind != expected {
            return Err(BlobError::invalid(format!(
                "blob is a {} blob, not a {} blob",
                self.kind, expected
            )));
        }
        Ok(())
    }

    fn check_lease(&self, conditions: &ChunkConditions) -> BlobResult<()> {
        match &self.lease_id {
            Some(lease) if conditions.lease_id.as_ref() != Some(lease) => {
                Err(BlobError::condition_not_met("lease id missing or does not match"))
            }
            _ => Ok(()),
        }
    }

    fn check_if_match(&self, conditions: &ChunkConditions) -> BlobResult<()> {
        match &conditions.if_match {
            Some(etag) if *etag != self.etag => Err(BlobError::condition_not_met(format!(
                "if-match {} does not match current etag {}",
                etag, self.etag
            ))),
            _ => Ok(()),
        }
    }
}

/// In-memory chunk store for testing and development.
///
/// Enforces the same conditions a real service would: leases, if-match,
/// append position and max size, Content-MD5 and page alignment.
pub struct MemoryChunkStore {
    blobs: Arc<RwLock<HashMap<BlobLocation, MemoryBlob>>>,
    version: AtomicU64,
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
            version: AtomicU64::new(0),
        }
    }

    fn next_etag(&self) -> String {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        format!("\"0x{:016X}\"", version)
    }

    fn check_md5(conditions: &ChunkConditions, data: &[u8]) -> BlobResult<()> {
        match &conditions.content_md5 {
            Some(expected) => verify_content_md5(expected, data),
            None => Ok(()),
        }
    }

    /// Committed content of a blob
    pub fn content(&self, blob: &BlobLocation) -> Option<Vec<u8>> {
        self.blobs.read().get(blob).map(|b| b.content.clone())
    }

    /// Ids of blocks staged but not yet committed, sorted
    pub fn staged_block_ids(&self, blob: &BlobLocation) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = self
            .blobs
            .read()
            .get(blob)
            .map(|b| b.staged.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Block list of the last commit
    pub fn committed_block_ids(&self, blob: &BlobLocation) -> Vec<BlockId> {
        self.blobs
            .read()
            .get(blob)
            .map(|b| b.committed.clone())
            .unwrap_or_default()
    }

    /// Current etag and last-modified
    pub fn properties(&self, blob: &BlobLocation) -> Option<ResourceProperties> {
        self.blobs.read().get(blob).map(|b| ResourceProperties {
            etag: Some(b.etag.clone()),
            last_modified: Some(b.last_modified),
        })
    }

    /// Put a lease on an existing blob
    pub fn acquire_lease<S: Into<String>>(&self, blob: &BlobLocation, lease_id: S) -> BlobResult<()> {
        let mut blobs = self.blobs.write();
        let entry = blobs
            .get_mut(blob)
            .ok_or_else(|| BlobError::not_found(blob.to_string()))?;
        entry.lease_id = Some(lease_id.into());
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn create_page_blob(
        &self,
        blob: &BlobLocation,
        size: u64,
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse> {
        if size % PAGE_SIZE != 0 {
            return Err(BlobError::invalid(format!(
                "page blob size {} is not a multiple of {}",
                size, PAGE_SIZE
            )));
        }

        let etag = self.next_etag();
        let mut blobs = self.blobs.write();
        let lease_id = match blobs.get(blob) {
            Some(existing) => {
                existing.check_lease(conditions)?;
                existing.check_if_match(conditions)?;
                existing.lease_id.clone()
            }
            None if conditions.if_match.is_some() => {
                return Err(BlobError::condition_not_met(format!(
                    "if-match set but {} does not exist",
                    blob
                )));
            }
            None => None,
        };

        let mut created = MemoryBlob::new(BlobKind::Page, vec![0u8; size as usize], etag);
        created.lease_id = lease_id;
        let response = created.response();
        blobs.insert(blob.clone(), created);
        Ok(response)
    }

    async fn create_append_blob(
        &self,
        blob: &BlobLocation,
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse> {
        let etag = self.next_etag();
        let mut blobs = self.blobs.write();
        let lease_id = match blobs.get(blob) {
            Some(existing) => {
                existing.check_lease(conditions)?;
                existing.lease_id.clone()
            }
            None => None,
        };

        let mut created = MemoryBlob::new(BlobKind::Append, Vec::new(), etag);
        created.lease_id = lease_id;
        let response = created.response();
        blobs.insert(blob.clone(), created);
        Ok(response)
    }

    async fn put_block(
        &self,
        blob: &BlobLocation,
        block_id: &BlockId,
        data: Bytes,
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse> {
        Self::check_md5(conditions, &data)?;

        let etag = self.next_etag();
        let mut blobs = self.blobs.write();
        let entry = blobs
            .entry(blob.clone())
            .or_insert_with(|| MemoryBlob::new(BlobKind::Block, Vec::new(), etag));
        entry.check_kind(BlobKind::Block)?;
        entry.check_lease(conditions)?;

        entry.staged.insert(block_id.clone(), data);
        // Staging a block does not change the committed blob
        Ok(ChunkResponse::default())
    }

    async fn put_page(
        &self,
        blob: &BlobLocation,
        start: u64,
        end: u64,
        data: Bytes,
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse> {
        Self::check_md5(conditions, &data)?;

        if end < start || start % PAGE_SIZE != 0 || (end + 1) % PAGE_SIZE != 0 {
            return Err(BlobError::invalid(format!(
                "page range {}-{} is not aligned to {} bytes",
                start, end, PAGE_SIZE
            )));
        }
        if data.len() as u64 != end - start + 1 {
            return Err(BlobError::invalid(format!(
                "page range {}-{} does not match payload of {} bytes",
                start,
                end,
                data.len()
            )));
        }

        let etag = self.next_etag();
        let mut blobs = self.blobs.write();
        let entry = blobs
            .get_mut(blob)
            .ok_or_else(|| BlobError::not_found(blob.to_string()))?;
        entry.check_kind(BlobKind::Page)?;
        entry.check_lease(conditions)?;
        entry.check_if_match(conditions)?;

        if end >= entry.content.len() as u64 {
            return Err(BlobError::invalid(format!(
                "page range {}-{} is beyond blob size {}",
                start,
                end,
                entry.content.len()
            )));
        }

        entry.content[start as usize..=end as usize].copy_from_slice(&data);
        entry.touch(etag);
        Ok(entry.response())
    }

    async fn append_block(
        &self,
        blob: &BlobLocation,
        data: Bytes,
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse> {
        Self::check_md5(conditions, &data)?;

        let etag = self.next_etag();
        let mut blobs = self.blobs.write();
        let entry = blobs
            .get_mut(blob)
            .ok_or_else(|| BlobError::not_found(blob.to_string()))?;
        entry.check_kind(BlobKind::Append)?;
        entry.check_lease(conditions)?;
        entry.check_if_match(conditions)?;

        let current = entry.content.len() as u64;
        if let Some(max) = conditions.maxsize_condition {
            if current + data.len() as u64 > max {
                return Err(BlobError::condition_not_met(format!(
                    "append of {} bytes would exceed max size {}",
                    data.len(),
                    max
                )));
            }
        }
        if let Some(position) = conditions.appendpos_condition {
            if position != current {
                return Err(BlobError::condition_not_met(format!(
                    "append position {} does not match blob length {}",
                    position, current
                )));
            }
        }

        entry.content.extend_from_slice(&data);
        entry.touch(etag);
        Ok(ChunkResponse {
            append_offset: Some(current),
            ..entry.response()
        })
    }

    async fn commit_block_list(
        &self,
        blob: &BlobLocation,
        blocks: &[BlockId],
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse> {
        let etag = self.next_etag();
        let mut blobs = self.blobs.write();
        let entry = blobs
            .entry(blob.clone())
            .or_insert_with(|| MemoryBlob::new(BlobKind::Block, Vec::new(), etag.clone()));
        entry.check_kind(BlobKind::Block)?;
        entry.check_lease(conditions)?;

        let mut content = Vec::new();
        for id in blocks {
            let block = entry
                .staged
                .get(id)
                .ok_or_else(|| BlobError::invalid(format!("block {} was never staged", id)))?;
            content.extend_from_slice(block);
        }

        entry.content = content;
        entry.committed = blocks.to_vec();
        entry.staged.clear();
        entry.touch(etag);
        Ok(entry.response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::content_md5;

    fn location() -> BlobLocation {
        BlobLocation::new("audio", "clip.wav")
    }

    #[tokio::test]
    async fn test_commit_orders_blocks_by_list() {
        let store = MemoryChunkStore::new();
        let conditions = ChunkConditions::new();
        let a = BlockId::from_index(0);
        let b = BlockId::from_index(1);

        store.put_block(&location(), &b, Bytes::from_static(b"world"), &conditions).await.unwrap();
        store.put_block(&location(), &a, Bytes::from_static(b"hello "), &conditions).await.unwrap();
        assert_eq!(store.staged_block_ids(&location()), vec![a.clone(), b.clone()]);

        store.commit_block_list(&location(), &[a, b], &conditions).await.unwrap();
        assert_eq!(store.content(&location()).unwrap(), b"hello world");
        assert!(store.staged_block_ids(&location()).is_empty());
    }

    #[tokio::test]
    async fn test_commit_rejects_unknown_block() {
        let store = MemoryChunkStore::new();
        let err = store
            .commit_block_list(&location(), &[BlockId::from_index(9)], &ChunkConditions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_put_block_validates_md5() {
        let store = MemoryChunkStore::new();
        let conditions = ChunkConditions::new().with_content_md5(Some(content_md5(b"other")));
        let err = store
            .put_block(&location(), &BlockId::from_index(0), Bytes::from_static(b"data"), &conditions)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_page_if_match() {
        let store = MemoryChunkStore::new();
        let created = store.create_page_blob(&location(), 1024, &ChunkConditions::new()).await.unwrap();

        let stale = ChunkConditions::new().with_if_match(Some("\"stale\"".to_string()));
        let err = store
            .put_page(&location(), 0, 511, Bytes::from(vec![1u8; 512]), &stale)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::ConditionNotMet { .. }));

        let fresh = ChunkConditions::new().with_if_match(created.etag.clone());
        let written = store
            .put_page(&location(), 512, 1023, Bytes::from(vec![2u8; 512]), &fresh)
            .await
            .unwrap();
        assert_ne!(written.etag, created.etag);

        let content = store.content(&location()).unwrap();
        assert!(content[..512].iter().all(|b| *b == 0));
        assert!(content[512..].iter().all(|b| *b == 2));
    }

    #[tokio::test]
    async fn test_create_page_blob_checks_if_match() {
        let store = MemoryChunkStore::new();
        let missing = ChunkConditions::new().with_if_match(Some("\"0x1\"".to_string()));
        let err = store.create_page_blob(&location(), 512, &missing).await.unwrap_err();
        assert!(matches!(err, BlobError::ConditionNotMet { .. }));

        let first = store.create_page_blob(&location(), 512, &ChunkConditions::new()).await.unwrap();
        let stale = ChunkConditions::new().with_if_match(Some("\"stale\"".to_string()));
        let err = store.create_page_blob(&location(), 512, &stale).await.unwrap_err();
        assert!(matches!(err, BlobError::ConditionNotMet { .. }));

        let current = ChunkConditions::new().with_if_match(first.etag.clone());
        let second = store.create_page_blob(&location(), 1024, &current).await.unwrap();
        assert_ne!(second.etag, first.etag);
        assert_eq!(store.content(&location()).unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn test_page_alignment() {
        let store = MemoryChunkStore::new();
        store.create_page_blob(&location(), 1024, &ChunkConditions::new()).await.unwrap();
        let err = store
            .put_page(&location(), 0, 99, Bytes::from(vec![0u8; 100]), &ChunkConditions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_append_conditions() {
        let store = MemoryChunkStore::new();
        store.create_append_blob(&location(), &ChunkConditions::new()).await.unwrap();

        let first = store
            .append_block(&location(), Bytes::from_static(b"0123"), &ChunkConditions::new())
            .await
            .unwrap();
        assert_eq!(first.append_offset, Some(0));

        let wrong_position = ChunkConditions::new().with_appendpos(Some(2));
        let err = store
            .append_block(&location(), Bytes::from_static(b"45"), &wrong_position)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::ConditionNotMet { .. }));

        let too_big = ChunkConditions::new().with_maxsize(Some(5));
        let err = store
            .append_block(&location(), Bytes::from_static(b"45"), &too_big)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::ConditionNotMet { .. }));

        let ok = ChunkConditions::new().with_appendpos(Some(4)).with_maxsize(Some(6));
        let second = store
            .append_block(&location(), Bytes::from_static(b"45"), &ok)
            .await
            .unwrap();
        assert_eq!(second.append_offset, Some(4));
        assert_eq!(store.content(&location()).unwrap(), b"012345");
    }

    #[tokio::test]
    async fn test_lease_required_once_acquired() {
        let store = MemoryChunkStore::new();
        store.create_append_blob(&location(), &ChunkConditions::new()).await.unwrap();
        store.acquire_lease(&location(), "lease-1").unwrap();

        let err = store
            .append_block(&location(), Bytes::from_static(b"x"), &ChunkConditions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::ConditionNotMet { .. }));

        let leased = ChunkConditions::new().with_lease(Some("lease-1".to_string()));
        assert!(store.append_block(&location(), Bytes::from_static(b"x"), &leased).await.is_ok());
    }
}
