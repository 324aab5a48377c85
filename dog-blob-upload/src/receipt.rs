use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BlobKind, BlobLocation, ResourceProperties, UploadId};

/// Receipt returned after a blob has been fully uploaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub upload_id: UploadId,
    pub location: BlobLocation,
    pub kind: BlobKind,
    /// Source bytes uploaded
    pub size_bytes: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Number of chunks, blocks or pages written
    pub chunks: usize,
    pub upload: UploadInfo,
    pub encrypted: bool,
}

/// How the blob was uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadInfo {
    /// Read once from the source, chunk by chunk
    Chunked {
        chunk_size: u64,
        max_connections: usize,
    },
    /// Each block re-read from its own window of a seekable source
    Substream {
        block_size: u64,
        max_connections: usize,
    },
}

impl UploadReceipt {
    /// Create a new upload receipt
    pub fn new(
        upload_id: UploadId,
        location: BlobLocation,
        kind: BlobKind,
        size_bytes: u64,
        upload: UploadInfo,
    ) -> Self {
        Self {
            upload_id,
            location,
            kind,
            size_bytes,
            etag: None,
            last_modified: None,
            chunks: 0,
            upload,
            encrypted: false,
        }
    }

    /// Set etag and last-modified
    pub fn with_properties(mut self, properties: ResourceProperties) -> Self {
        self.etag = properties.etag;
        self.last_modified = properties.last_modified;
        self
    }

    /// Set chunk count
    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks = chunks;
        self
    }

    /// Mark content as client-side encrypted
    pub fn with_encryption(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Etag and last-modified, for conditional follow-up requests
    pub fn properties(&self) -> ResourceProperties {
        ResourceProperties {
            etag: self.etag.clone(),
            last_modified: self.last_modified,
        }
    }
}
