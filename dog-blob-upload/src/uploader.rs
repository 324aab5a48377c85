use bytes::Bytes;
use futures_core::Stream;
use parking_lot::Mutex;
use std::io::{Read, Seek};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::checksum::content_md5;
use crate::encryption::ChunkEncoder;
use crate::substream::{SharedStream, SubStream};
use crate::{
    BlobError, BlobKind, BlobLocation, BlobResult, BlockId, Chunk, ChunkConditions, ChunkReceipt,
    ChunkStore, ContentEncryption, ProgressCallback, ResourceProperties, UploadConfig,
};

/// Kind-specific upload state, fixed for the whole session
enum KindState {
    Block,
    Page {
        /// Etag the next page write must match. Only chained when sequential.
        if_match: Mutex<Option<String>>,
    },
    Append {
        maxsize_condition: Option<u64>,
        /// Offset the first block landed at; later blocks are positioned relative to it
        first_offset: Mutex<Option<u64>>,
    },
}

impl KindState {
    fn kind(&self) -> BlobKind {
        match self {
            Self::Block => BlobKind::Block,
            Self::Page { .. } => BlobKind::Page,
            Self::Append { .. } => BlobKind::Append,
        }
    }
}

/// Shared byte counter reported through the progress callback.
///
/// The callback runs while `advance` holds the ordering lock, so observers see
/// a non-decreasing sequence. The counter itself is atomic: a callback may
/// read [`ProgressTracker::done`] but must not call `advance`.
pub struct ProgressTracker {
    callback: Option<ProgressCallback>,
    total: Option<u64>,
    done: AtomicU64,
    order: Mutex<()>,
}

impl ProgressTracker {
    pub fn new(callback: Option<ProgressCallback>, total: Option<u64>) -> Self {
        Self {
            callback,
            total,
            done: AtomicU64::new(0),
            order: Mutex::new(()),
        }
    }

    /// Report `(0, total)`
    pub fn start(&self) {
        if let Some(callback) = &self.callback {
            callback(0, self.total);
        }
    }

    /// Add `bytes` and report the new cumulative total
    pub fn advance(&self, bytes: u64) {
        let _order = self.order.lock();
        let done = self.done.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if let Some(callback) = &self.callback {
            callback(done, self.total);
        }
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::SeqCst)
    }
}

/// Splits one source into chunks and uploads them to one destination blob
pub struct ChunkUploader {
    store: Arc<dyn ChunkStore>,
    location: BlobLocation,
    kind: KindState,
    blob_size: Option<u64>,
    chunk_size: u64,
    parallel: bool,
    validate_content: bool,
    lease_id: Option<String>,
    timeout: Option<Duration>,
    encryption: Option<ContentEncryption>,
    progress: ProgressTracker,
    properties: Mutex<ResourceProperties>,
}

impl ChunkUploader {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        location: BlobLocation,
        kind: BlobKind,
        config: &UploadConfig,
        blob_size: Option<u64>,
        progress: Option<ProgressCallback>,
    ) -> Self {
        // Append positions are relative to the first block, so appends never overlap
        let parallel = config.is_parallel() && kind != BlobKind::Append;

        let (kind, chunk_size) = match kind {
            BlobKind::Block => (KindState::Block, config.max_block_size),
            BlobKind::Page => (
                KindState::Page {
                    // A ranged write may start before the previous one returns its etag
                    if_match: Mutex::new(if parallel { None } else { config.if_match.clone() }),
                },
                config.max_page_size,
            ),
            BlobKind::Append => (
                KindState::Append {
                    maxsize_condition: config.maxsize_condition,
                    first_offset: Mutex::new(None),
                },
                config.max_append_size,
            ),
        };

        Self {
            store,
            location,
            kind,
            blob_size,
            chunk_size,
            parallel,
            validate_content: config.validate_content,
            lease_id: config.lease_id.clone(),
            timeout: config.timeout,
            encryption: config.encryption.clone(),
            progress: ProgressTracker::new(progress, blob_size),
            properties: Mutex::new(ResourceProperties::default()),
        }
    }

    pub fn kind(&self) -> BlobKind {
        self.kind.kind()
    }

    pub fn location(&self) -> &BlobLocation {
        &self.location
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Etag and last-modified from the last successful write
    pub fn properties(&self) -> ResourceProperties {
        self.properties.lock().clone()
    }

    /// Lazily read `source` into fixed-size chunks.
    ///
    /// Stops at end of input or after `blob_size` bytes when the size is known.
    /// Only the last chunk may be short. When encryption is configured every
    /// chunk is encoded incrementally and the last one flushes the padder and
    /// encryptor, so the sequence can only be restarted from a fresh source.
    pub fn get_chunk_streams<R>(
        &self,
        mut source: R,
    ) -> impl Stream<Item = BlobResult<Chunk>> + Send + 'static
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let chunk_size = self.chunk_size as usize;
        let blob_size = self.blob_size;
        let should_pad = self.kind() != BlobKind::Page;
        let mut encoder = ChunkEncoder::new(self.encryption.as_ref(), should_pad);

        async_stream::try_stream! {
            let mut offset = 0u64;
            let mut consumed = 0u64;
            // Source bytes whose encoded output has not been emitted yet
            let mut pending = 0u64;

            loop {
                let mut data: Vec<u8> = Vec::with_capacity(chunk_size);

                // Buffer until we hit the end of the source or have a whole chunk
                loop {
                    let mut read_size = chunk_size - data.len();
                    if let Some(size) = blob_size {
                        let left = size.saturating_sub(consumed + data.len() as u64);
                        read_size = read_size.min(left as usize);
                    }
                    if read_size == 0 {
                        break;
                    }

                    let start = data.len();
                    data.resize(start + read_size, 0);
                    let n = source.read(&mut data[start..]).await?;
                    data.truncate(start + n);
                    if n == 0 {
                        break;
                    }
                }

                consumed += data.len() as u64;
                pending += data.len() as u64;

                if data.len() == chunk_size {
                    let payload = encoder.update(data);
                    if payload.is_empty() {
                        continue;
                    }
                    let len = payload.len() as u64;
                    yield Chunk::new(offset, Bytes::from(payload), pending);
                    offset += len;
                    pending = 0;
                } else {
                    let payload = encoder.finish(data)?;
                    if !payload.is_empty() {
                        yield Chunk::new(offset, Bytes::from(payload), pending);
                    }
                    break;
                }
            }
        }
    }

    /// Split a seekable stream into `(block id, window)` pairs.
    ///
    /// The length is the known blob size, or measured from the stream's
    /// current position to its end. Blocks are `chunk_size` long except the last.
    pub fn get_substream_blocks<S>(
        &self,
        stream: &SharedStream<S>,
    ) -> BlobResult<impl Iterator<Item = BlobResult<(BlockId, SubStream<S>)>>>
    where
        S: Read + Seek,
    {
        let start = stream
            .position()
            .map_err(|_| BlobError::not_seekable("stream"))?;
        let length = match self.blob_size {
            Some(size) => size,
            None => stream
                .remaining_len()
                .map_err(|_| BlobError::not_seekable("stream"))?,
        };

        let chunk_size = self.chunk_size;
        let blocks = length.div_ceil(chunk_size);
        let last_block_size = match length % chunk_size {
            0 => chunk_size,
            rest => rest,
        };

        let stream = stream.clone();
        Ok((0..blocks).map(move |i| {
            let size = if i == blocks - 1 { last_block_size } else { chunk_size };
            let window = stream.substream(start + i * chunk_size, size)?;
            Ok((BlockId::from_index(i as usize), window))
        }))
    }

    /// Upload one chunk and record its progress
    pub async fn process_chunk(&self, chunk: Chunk) -> BlobResult<ChunkReceipt> {
        debug!(
            blob = %self.location,
            offset = chunk.offset,
            len = chunk.data.len(),
            "uploading chunk"
        );
        let receipt = self.upload_chunk(chunk.offset, chunk.data).await?;
        self.progress.advance(chunk.source_len);
        Ok(receipt)
    }

    /// Read one substream window and stage it as a block
    pub async fn process_substream_block<S>(
        &self,
        block_id: BlockId,
        mut block: SubStream<S>,
    ) -> BlobResult<ChunkReceipt>
    where
        S: Read + Seek + Send + 'static,
    {
        if !matches!(self.kind, KindState::Block) {
            return Err(BlobError::invalid(format!(
                "substream uploads are only supported for block blobs, not {} blobs",
                self.kind()
            )));
        }

        let expected = block.len();
        let data = tokio::task::spawn_blocking(move || {
            let mut data = Vec::with_capacity(expected as usize);
            block.read_to_end(&mut data).map(|_| data)
        })
        .await??;

        if data.len() as u64 != expected {
            return Err(BlobError::from(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "block {} ended after {} of {} bytes",
                    block_id,
                    data.len(),
                    expected
                ),
            )));
        }

        debug!(blob = %self.location, block_id = %block_id, len = expected, "uploading substream block");
        let data = Bytes::from(data);
        let conditions = self.conditions(&data);
        self.store
            .put_block(&self.location, &block_id, data, &conditions)
            .await?;

        self.progress.advance(expected);
        Ok(ChunkReceipt::Block(block_id))
    }

    fn conditions(&self, data: &[u8]) -> ChunkConditions {
        ChunkConditions::new()
            .with_lease(self.lease_id.clone())
            .with_timeout(self.timeout)
            .with_content_md5(self.validate_content.then(|| content_md5(data)))
    }

    async fn upload_chunk(&self, offset: u64, data: Bytes) -> BlobResult<ChunkReceipt> {
        let len = data.len() as u64;
        let conditions = self.conditions(&data);

        match &self.kind {
            KindState::Block => {
                let block_id = BlockId::from_offset(offset);
                self.store
                    .put_block(&self.location, &block_id, data, &conditions)
                    .await?;
                Ok(ChunkReceipt::Block(block_id))
            }
            KindState::Page { if_match } => {
                let end = offset + len - 1;
                let conditions = conditions.with_if_match(if_match.lock().clone());
                let response = self
                    .store
                    .put_page(&self.location, offset, end, data, &conditions)
                    .await?;

                if !self.parallel {
                    *if_match.lock() = response.etag.clone();
                }
                *self.properties.lock() = response.properties();
                Ok(ChunkReceipt::Page { start: offset, end })
            }
            KindState::Append {
                maxsize_condition,
                first_offset,
            } => {
                let base = *first_offset.lock();
                let conditions = conditions
                    .with_maxsize(*maxsize_condition)
                    .with_appendpos(base.map(|base| base + offset));
                let response = self
                    .store
                    .append_block(&self.location, data, &conditions)
                    .await?;

                let appended_at = response.append_offset.ok_or_else(|| {
                    BlobError::upload_failed("append response did not include an append offset")
                })?;
                if base.is_none() {
                    *first_offset.lock() = Some(appended_at);
                }
                *self.properties.lock() = response.properties();
                Ok(ChunkReceipt::Append {
                    offset: appended_at,
                    len,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryChunkStore;
    use std::io::{self, Cursor, SeekFrom};

    /// Reads fine but cannot report or change its position
    struct Unseekable;

    impl Read for Unseekable {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Seek for Unseekable {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "pipe"))
        }
    }

    fn block_uploader(blob_size: Option<u64>) -> ChunkUploader {
        ChunkUploader::new(
            Arc::new(MemoryChunkStore::new()),
            BlobLocation::new("audio", "clip.wav"),
            BlobKind::Block,
            &UploadConfig::new().with_block_size(4),
            blob_size,
            None,
        )
    }

    #[test]
    fn test_substream_blocks_need_seekable_stream() {
        let uploader = block_uploader(None);
        let blocks = uploader.get_substream_blocks(&SharedStream::new(Unseekable));
        assert!(matches!(blocks, Err(BlobError::NotSeekable { .. })));
    }

    #[test]
    fn test_substream_blocks_need_position_even_with_known_size() {
        let uploader = block_uploader(Some(8));
        let blocks = uploader.get_substream_blocks(&SharedStream::new(Unseekable));
        assert!(matches!(blocks, Err(BlobError::NotSeekable { .. })));
    }

    #[test]
    fn test_substream_blocks_cover_remaining_length() {
        let uploader = block_uploader(None);
        let blocks: Vec<_> = uploader
            .get_substream_blocks(&SharedStream::new(Cursor::new(b"0123456789".to_vec())))
            .unwrap()
            .collect::<BlobResult<_>>()
            .unwrap();

        let lens: Vec<u64> = blocks.iter().map(|(_, window)| window.len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert_eq!(blocks[2].0, BlockId::from_index(2));
    }

    #[test]
    fn test_progress_callback_can_read_tracker() {
        let slot: Arc<Mutex<Option<Arc<ProgressTracker>>>> = Arc::new(Mutex::new(None));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let reader = slot.clone();
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |done, _total| {
            if let Some(tracker) = reader.lock().as_ref() {
                sink.lock().push((done, tracker.done()));
            }
        });
        let tracker = Arc::new(ProgressTracker::new(Some(callback), Some(10)));
        *slot.lock() = Some(tracker.clone());

        tracker.advance(4);
        tracker.advance(6);

        assert_eq!(*seen.lock(), vec![(4, 4), (10, 10)]);
        assert_eq!(tracker.done(), 10);
    }
}
