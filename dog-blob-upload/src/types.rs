use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Progress callback: `(bytes_done, bytes_total)`
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Unique identifier for one upload call, used to correlate log lines
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(pub String);

impl UploadId {
    /// Generate a new random upload ID
    pub fn new() -> Self {
        Self(format!("upl_{}", Uuid::new_v4().simple()))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Destination of an upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobLocation {
    pub container: String,
    pub name: String,
}

impl BlobLocation {
    pub fn new<C: Into<String>, N: Into<String>>(container: C, name: N) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// The three blob flavours the service supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobKind {
    Block,
    Page,
    Append,
}

impl std::fmt::Display for BlobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::Page => write!(f, "page"),
            Self::Append => write!(f, "append"),
        }
    }
}

/// Identifier of a staged block, later committed with a block list
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub String);

impl BlockId {
    /// Block id for a chunk at `offset`: base64 of the 32-digit zero-padded offset.
    /// Every id has the same length, which the service requires within one blob.
    pub fn from_offset(offset: u64) -> Self {
        Self(BASE64_STANDARD.encode(format!("{:032}", offset)))
    }

    /// Block id for the `index`-th substream block
    pub fn from_index(index: usize) -> Self {
        Self(format!("BlockId{:05}", index))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous slice of the source, ready to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Offset of `data` in the uploaded byte space
    pub offset: u64,
    /// Payload, already padded/encrypted when configured
    pub data: Bytes,
    /// Number of source bytes this chunk consumed
    pub source_len: u64,
}

impl Chunk {
    pub fn new(offset: u64, data: Bytes, source_len: u64) -> Self {
        Self {
            offset,
            data,
            source_len,
        }
    }
}

/// What the service recorded for one uploaded chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkReceipt {
    /// Staged block awaiting commit
    Block(BlockId),
    /// Inclusive page range written
    Page { start: u64, end: u64 },
    /// Block appended at `offset`
    Append { offset: u64, len: u64 },
}

impl ChunkReceipt {
    pub fn block_id(&self) -> Option<&BlockId> {
        match self {
            Self::Block(id) => Some(id),
            _ => None,
        }
    }
}

/// Properties of the destination after the last successful write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProperties {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Aggregated result of one chunked upload
#[derive(Debug, Clone)]
pub struct ChunkedUpload {
    pub upload_id: UploadId,
    /// One receipt per chunk, in source order
    pub receipts: Vec<ChunkReceipt>,
    pub properties: ResourceProperties,
    /// Source bytes uploaded
    pub bytes_uploaded: u64,
}

impl ChunkedUpload {
    /// Block ids in source order, for the commit step
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.receipts
            .iter()
            .filter_map(ChunkReceipt::block_id)
            .cloned()
            .collect()
    }
}
