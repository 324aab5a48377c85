use futures_core::Stream;
use futures_util::StreamExt;
use std::future::Future;
use std::io::{Read, Seek};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn, Span};

use crate::substream::SharedStream;
use crate::uploader::ChunkUploader;
use crate::{
    BlobError, BlobKind, BlobLocation, BlobResult, ChunkReceipt, ChunkStore, ChunkedUpload,
    ProgressCallback, UploadConfig, UploadId,
};

/// Drives a [`ChunkUploader`] sequentially or with bounded parallelism
pub struct ChunkedUploadCoordinator {
    store: Arc<dyn ChunkStore>,
    config: UploadConfig,
}

impl ChunkedUploadCoordinator {
    pub fn new<S: ChunkStore + 'static>(store: S, config: UploadConfig) -> Self {
        Self::with_shared_store(Arc::new(store), config)
    }

    pub fn with_shared_store(store: Arc<dyn ChunkStore>, config: UploadConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Read `source` chunk by chunk and upload every chunk to `location`.
    ///
    /// Receipts come back in source order regardless of completion order.
    /// The first failure aborts every in-flight upload and is returned;
    /// there is no partial result.
    #[instrument(
        skip(self, source, progress),
        fields(blob = %location, kind = %kind, upload_id = tracing::field::Empty)
    )]
    pub async fn upload_blob_chunks<R>(
        &self,
        location: BlobLocation,
        kind: BlobKind,
        source: R,
        blob_size: Option<u64>,
        progress: Option<ProgressCallback>,
    ) -> BlobResult<ChunkedUpload>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.config.validate()?;
        let upload_id = start_span();

        let uploader = Arc::new(ChunkUploader::new(
            self.store.clone(),
            location,
            kind,
            &self.config,
            blob_size,
            progress,
        ));
        uploader.progress().start();

        let chunks = uploader.get_chunk_streams(source);
        let result = if uploader.is_parallel() {
            let worker = uploader.clone();
            run_bounded(chunks, self.config.max_connections, move |chunk| {
                let worker = worker.clone();
                async move { worker.process_chunk(chunk).await }
            })
            .await
        } else {
            run_sequential(chunks, |chunk| uploader.process_chunk(chunk)).await
        };

        finish(upload_id, &uploader, result)
    }

    /// Upload a seekable stream as block-blob blocks, each worker re-reading
    /// its own window of the shared stream.
    #[instrument(
        skip(self, stream, progress),
        fields(blob = %location, upload_id = tracing::field::Empty)
    )]
    pub async fn upload_blob_substream_blocks<S>(
        &self,
        location: BlobLocation,
        stream: SharedStream<S>,
        blob_size: Option<u64>,
        progress: Option<ProgressCallback>,
    ) -> BlobResult<ChunkedUpload>
    where
        S: Read + Seek + Send + 'static,
    {
        self.config.validate()?;
        if self.config.encryption.is_some() {
            return Err(BlobError::invalid(
                "content encryption is not supported for substream uploads",
            ));
        }
        let upload_id = start_span();

        let uploader = Arc::new(ChunkUploader::new(
            self.store.clone(),
            location,
            BlobKind::Block,
            &self.config,
            blob_size,
            progress,
        ));
        uploader.progress().start();

        let blocks = futures_util::stream::iter(uploader.get_substream_blocks(&stream)?);
        let result = if uploader.is_parallel() {
            let worker = uploader.clone();
            run_bounded(blocks, self.config.max_connections, move |(block_id, window)| {
                let worker = worker.clone();
                async move { worker.process_substream_block(block_id, window).await }
            })
            .await
        } else {
            run_sequential(blocks, |(block_id, window)| {
                uploader.process_substream_block(block_id, window)
            })
            .await
        };

        finish(upload_id, &uploader, result)
    }
}

/// Fresh id for this upload, recorded on the current span
fn start_span() -> UploadId {
    let upload_id = UploadId::new();
    Span::current().record("upload_id", tracing::field::display(&upload_id));
    upload_id
}

fn finish(
    upload_id: UploadId,
    uploader: &ChunkUploader,
    result: BlobResult<Vec<ChunkReceipt>>,
) -> BlobResult<ChunkedUpload> {
    match result {
        Ok(receipts) => {
            let bytes_uploaded = uploader.progress().done();
            info!(
                chunks = receipts.len(),
                bytes = bytes_uploaded,
                parallel = uploader.is_parallel(),
                "chunked upload finished"
            );
            Ok(ChunkedUpload {
                upload_id,
                receipts,
                properties: uploader.properties(),
                bytes_uploaded,
            })
        }
        Err(err) => {
            warn!(error = %err, "chunked upload failed");
            Err(err)
        }
    }
}

/// One unit at a time, in source order
async fn run_sequential<T, P, F, Fut>(items: P, mut process: F) -> BlobResult<Vec<ChunkReceipt>>
where
    P: Stream<Item = BlobResult<T>>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = BlobResult<ChunkReceipt>>,
{
    let mut items = std::pin::pin!(items);
    let mut receipts = Vec::new();
    while let Some(item) = items.next().await {
        receipts.push(process(item?).await?);
    }
    Ok(receipts)
}

/// A single producer feeds `workers` upload tasks through a one-slot channel,
/// so at most one unit is buffered ahead of the busy workers. All tasks share
/// one group: the first error aborts the rest.
async fn run_bounded<T, P, F, Fut>(
    items: P,
    workers: usize,
    process: F,
) -> BlobResult<Vec<ChunkReceipt>>
where
    T: Send + 'static,
    P: Stream<Item = BlobResult<T>> + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BlobResult<ChunkReceipt>> + Send,
{
    let (tx, rx) = mpsc::channel::<(usize, T)>(1);
    let rx = Arc::new(Mutex::new(rx));
    let process = Arc::new(process);
    let mut tasks: JoinSet<BlobResult<Vec<(usize, ChunkReceipt)>>> = JoinSet::new();

    tasks.spawn(async move {
        let mut items = std::pin::pin!(items);
        let mut index = 0;
        while let Some(item) = items.next().await {
            // Receivers only go away when the group is being torn down
            if tx.send((index, item?)).await.is_err() {
                break;
            }
            index += 1;
        }
        Ok(Vec::new())
    });

    for _ in 0..workers {
        let rx = rx.clone();
        let process = process.clone();
        tasks.spawn(async move {
            let mut done = Vec::new();
            loop {
                let next = rx.lock().await.recv().await;
                let Some((index, item)) = next else {
                    break;
                };
                done.push((index, (*process)(item).await?));
            }
            Ok(done)
        });
    }

    let mut indexed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let done = match joined {
            Ok(done) => done,
            Err(err) => Err(BlobError::from(err)),
        };
        match done {
            Ok(done) => indexed.extend(done),
            Err(err) => {
                tasks.abort_all();
                return Err(err);
            }
        }
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, receipt)| receipt).collect())
}
