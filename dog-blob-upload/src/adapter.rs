use std::io::{Read, Seek};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, instrument};

use crate::config::PAGE_SIZE;
use crate::substream::SharedStream;
use crate::{
    BlobError, BlobKind, BlobLocation, BlobResult, ChunkConditions, ChunkStore, ChunkedUpload,
    ChunkedUploadCoordinator, ProgressCallback, UploadConfig, UploadInfo, UploadReceipt,
};

/// The main upload adapter - this is what services embed to push blobs to storage
pub struct BlobUploadAdapter {
    store: Arc<dyn ChunkStore>,
    coordinator: ChunkedUploadCoordinator,
}

impl BlobUploadAdapter {
    /// Create a new upload adapter
    pub fn new<S: ChunkStore + 'static>(store: S, config: UploadConfig) -> Self {
        Self::with_shared_store(Arc::new(store), config)
    }

    /// Create from a store that is shared with other components
    pub fn with_shared_store(store: Arc<dyn ChunkStore>, config: UploadConfig) -> Self {
        Self {
            coordinator: ChunkedUploadCoordinator::with_shared_store(store.clone(), config),
            store,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &UploadConfig {
        self.coordinator.config()
    }

    /// Upload a block blob from a stream, then commit its block list
    #[instrument(skip(self, source, progress), fields(blob = %location))]
    pub async fn upload_block_blob<R>(
        &self,
        location: BlobLocation,
        source: R,
        size: Option<u64>,
        progress: Option<ProgressCallback>,
    ) -> BlobResult<UploadReceipt>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.config().validate()?;
        let chunked = self
            .coordinator
            .upload_blob_chunks(location.clone(), BlobKind::Block, source, size, progress)
            .await?;

        let info = UploadInfo::Chunked {
            chunk_size: self.config().max_block_size,
            max_connections: self.config().max_connections,
        };
        self.commit(location, chunked, info).await
    }

    /// Upload a block blob from a seekable source. Each worker reads its own
    /// window of the source under a shared lock.
    #[instrument(skip(self, source, progress), fields(blob = %location))]
    pub async fn upload_block_blob_seekable<S>(
        &self,
        location: BlobLocation,
        source: S,
        progress: Option<ProgressCallback>,
    ) -> BlobResult<UploadReceipt>
    where
        S: Read + Seek + Send + 'static,
    {
        self.config().validate()?;
        if self.config().encryption.is_some() {
            return Err(BlobError::invalid(
                "encrypted uploads must use upload_block_blob",
            ));
        }

        let chunked = self
            .coordinator
            .upload_blob_substream_blocks(location.clone(), SharedStream::new(source), None, progress)
            .await?;

        let info = UploadInfo::Substream {
            block_size: self.config().max_block_size,
            max_connections: self.config().max_connections,
        };
        self.commit(location, chunked, info).await
    }

    /// Create a page blob of `size` bytes and fill it from `source`.
    ///
    /// A configured `if_match` guards the create. Sequential uploads then
    /// condition every page write on the etag returned by the previous call.
    #[instrument(skip(self, source, progress), fields(blob = %location))]
    pub async fn upload_page_blob<R>(
        &self,
        location: BlobLocation,
        source: R,
        size: u64,
        progress: Option<ProgressCallback>,
    ) -> BlobResult<UploadReceipt>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.config().validate()?;
        if size % PAGE_SIZE != 0 {
            return Err(BlobError::invalid(format!(
                "page blob size {} is not a multiple of {}",
                size, PAGE_SIZE
            )));
        }

        let conditions = self
            .conditions()
            .with_if_match(self.config().if_match.clone());
        let created = self
            .store
            .create_page_blob(&location, size, &conditions)
            .await?;
        debug!(size, "page blob created");

        // Page writes chain from the etag of the freshly created blob
        let mut config = self.config().clone();
        config.if_match = created.etag.clone();
        let mut chunked = ChunkedUploadCoordinator::with_shared_store(self.store.clone(), config)
            .upload_blob_chunks(location.clone(), BlobKind::Page, source, Some(size), progress)
            .await?;
        if chunked.receipts.is_empty() {
            chunked.properties = created.properties();
        }

        let info = UploadInfo::Chunked {
            chunk_size: self.config().max_page_size,
            max_connections: self.config().max_connections,
        };
        Ok(self.receipt(location, BlobKind::Page, &chunked, info))
    }

    /// Create an append blob and append `source` to it, one chunk at a time
    #[instrument(skip(self, source, progress), fields(blob = %location))]
    pub async fn upload_append_blob<R>(
        &self,
        location: BlobLocation,
        source: R,
        size: Option<u64>,
        progress: Option<ProgressCallback>,
    ) -> BlobResult<UploadReceipt>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.config().validate()?;
        let created = self
            .store
            .create_append_blob(&location, &self.conditions())
            .await?;

        let mut chunked = self
            .coordinator
            .upload_blob_chunks(location.clone(), BlobKind::Append, source, size, progress)
            .await?;
        if chunked.receipts.is_empty() {
            chunked.properties = created.properties();
        }

        let info = UploadInfo::Chunked {
            chunk_size: self.config().max_append_size,
            max_connections: 1,
        };
        Ok(self.receipt(location, BlobKind::Append, &chunked, info))
    }

    async fn commit(
        &self,
        location: BlobLocation,
        mut chunked: ChunkedUpload,
        info: UploadInfo,
    ) -> BlobResult<UploadReceipt> {
        let blocks = chunked.block_ids();
        let response = self
            .store
            .commit_block_list(&location, &blocks, &self.conditions())
            .await?;
        debug!(blocks = blocks.len(), "block list committed");

        chunked.properties = response.properties();
        Ok(self.receipt(location, BlobKind::Block, &chunked, info))
    }

    fn conditions(&self) -> ChunkConditions {
        ChunkConditions::new()
            .with_lease(self.config().lease_id.clone())
            .with_timeout(self.config().timeout)
    }

    fn receipt(
        &self,
        location: BlobLocation,
        kind: BlobKind,
        chunked: &ChunkedUpload,
        info: UploadInfo,
    ) -> UploadReceipt {
        let mut receipt = UploadReceipt::new(
            chunked.upload_id.clone(),
            location,
            kind,
            chunked.bytes_uploaded,
            info,
        )
        .with_properties(chunked.properties.clone())
        .with_chunks(chunked.receipts.len());
        if self.config().encryption.is_some() {
            receipt = receipt.with_encryption();
        }
        receipt
    }
}
