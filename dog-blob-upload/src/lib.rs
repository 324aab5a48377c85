//! # dog-blob-upload: Chunked blob uploads with bounded parallelism
//!
//! `dog-blob-upload` pushes large payloads to blob storage in pieces. A source is cut
//! into fixed-size chunks (or, for seekable sources, into independent windows that
//! each worker reads on its own), every piece goes to the service as a staged block,
//! a page range or an appended block, and the results come back in source order.
//!
//! ## Key Features
//!
//! - **Three blob kinds**: block blobs (staged then committed), page blobs (512-byte
//!   aligned ranges) and append blobs (position-checked appends)
//! - **Bounded parallelism**: at most `max_connections` uploads in flight and at most
//!   one chunk buffered ahead of them
//! - **Fail fast**: the first failed chunk cancels the rest and is returned
//! - **Substreams**: seekable sources are read window by window, each worker
//!   reading its own window under a shared lock
//! - **Client-side encryption and MD5 validation** applied per chunk
//! - **Storage agnostic**: anything implementing [`ChunkStore`] can receive uploads;
//!   [`MemoryChunkStore`] ships for tests and local runs
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_blob_upload::prelude::*;
//! use std::io::Cursor;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! let store = MemoryChunkStore::new();
//! let adapter = BlobUploadAdapter::new(store, UploadConfig::default().with_block_size(4));
//!
//! let receipt = adapter
//!     .upload_block_blob(
//!         BlobLocation::new("media", "hello.txt"),
//!         Cursor::new(b"Hello, world!".to_vec()),
//!         None,
//!         None,
//!     )
//!     .await?;
//!
//! assert_eq!(receipt.size_bytes, 13);
//! assert_eq!(receipt.chunks, 4);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │   BlobUploadAdapter      │  ← create / commit around the chunk phase
//! ├──────────────────────────┤
//! │ ChunkedUploadCoordinator │  ← sequential or bounded-parallel driving
//! ├──────────────────────────┤
//! │   ChunkUploader          │  ← chunking, per-kind upload rules
//! ├──────────────────────────┤
//! │   ChunkStore             │  ← storage primitives
//! └──────────────────────────┘
//! ```

pub mod adapter;
mod checksum;
mod config;
mod coordinator;
pub mod encryption;
mod error;
mod memory_store;
mod receipt;
pub mod store;
pub mod substream;
mod types;
pub mod uploader;

// Re-export main types for clean API
pub use adapter::BlobUploadAdapter;
pub use checksum::{content_md5, verify_content_md5};
pub use config::{UploadConfig, PAGE_SIZE};
pub use coordinator::ChunkedUploadCoordinator;
pub use encryption::{AesCbcEncryptor, ChunkEncoder, ContentEncryption, Pkcs7Padder, Transform};
pub use error::{BlobError, BlobResult};
pub use memory_store::MemoryChunkStore;
pub use receipt::{UploadInfo, UploadReceipt};
pub use store::{ChunkConditions, ChunkResponse, ChunkStore};
pub use substream::{SharedStream, SubStream};
pub use types::{
    BlobKind, BlobLocation, BlockId, Chunk, ChunkReceipt, ChunkedUpload, ProgressCallback,
    ResourceProperties, UploadId,
};
pub use uploader::{ChunkUploader, ProgressTracker};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobError, BlobKind, BlobLocation, BlobResult, BlobUploadAdapter, ChunkStore,
        ContentEncryption, MemoryChunkStore, ProgressCallback, SharedStream, UploadConfig,
        UploadReceipt,
    };
}
