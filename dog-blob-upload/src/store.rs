use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::{BlobLocation, BlobResult, BlockId, ResourceProperties};

/// Chunk-level storage primitives - implemented by every storage backend
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Create (or reset) a zero-filled page blob of `size` bytes
    async fn create_page_blob(
        &self,
        blob: &BlobLocation,
        size: u64,
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse>;

    /// Create (or reset) an empty append blob
    async fn create_append_blob(
        &self,
        blob: &BlobLocation,
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse>;

    /// Stage a block on a block blob
    async fn put_block(
        &self,
        blob: &BlobLocation,
        block_id: &BlockId,
        data: Bytes,
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse>;

    /// Write the inclusive byte range `start..=end` of a page blob
    async fn put_page(
        &self,
        blob: &BlobLocation,
        start: u64,
        end: u64,
        data: Bytes,
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse>;

    /// Append a block to an append blob
    async fn append_block(
        &self,
        blob: &BlobLocation,
        data: Bytes,
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse>;

    /// Commit staged blocks, in order, as the blob's content
    async fn commit_block_list(
        &self,
        blob: &BlobLocation,
        blocks: &[BlockId],
        conditions: &ChunkConditions,
    ) -> BlobResult<ChunkResponse>;
}

/// Conditional and validation headers sent with a chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkConditions {
    pub lease_id: Option<String>,
    pub if_match: Option<String>,
    /// Append blobs: fail if the blob would grow past this length
    pub maxsize_condition: Option<u64>,
    /// Append blobs: fail unless the blob currently has exactly this length
    pub appendpos_condition: Option<u64>,
    /// Base64 MD5 of the payload
    pub content_md5: Option<String>,
    pub timeout: Option<Duration>,
}

impl ChunkConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease(mut self, lease_id: Option<String>) -> Self {
        self.lease_id = lease_id;
        self
    }

    pub fn with_if_match(mut self, etag: Option<String>) -> Self {
        self.if_match = etag;
        self
    }

    pub fn with_maxsize(mut self, bytes: Option<u64>) -> Self {
        self.maxsize_condition = bytes;
        self
    }

    pub fn with_appendpos(mut self, position: Option<u64>) -> Self {
        self.appendpos_condition = position;
        self
    }

    pub fn with_content_md5(mut self, md5: Option<String>) -> Self {
        self.content_md5 = md5;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Response headers of a chunk write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkResponse {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Append blobs: offset at which the block was written
    pub append_offset: Option<u64>,
}

impl ChunkResponse {
    pub fn properties(&self) -> ResourceProperties {
        ResourceProperties {
            etag: self.etag.clone(),
            last_modified: self.last_modified,
        }
    }
}
