//! Batch scheduler
//!
//! Splits assets into fixed-size chunks. Transfers inside a chunk run
//! concurrently; chunks run strictly one after another with a pause in
//! between to stay under the media store's rate limit.

use super::{NormalizedAsset, Transfer, UploadError, UploadResult};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Unit of a relay call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// One relay call per file. Failures are isolated per file.
    #[default]
    PerFile,
    /// One relay call per chunk. The relay is all-or-nothing, so a failure
    /// fails every file in the chunk.
    PerBatch,
}

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub mode: TransferMode,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 5,
            inter_batch_delay: Duration::from_secs(1),
            mode: TransferMode::PerFile,
        }
    }
}

/// Split `items` into consecutive chunks of at most `batch_size`.
///
/// A `batch_size` of zero is treated as one.
pub fn partition<T>(items: &[T], batch_size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(batch_size.max(1))
}

/// Receives scheduler events. All methods default to no-ops.
///
/// `chunk_settled` runs after every chunk and before the inter-batch pause;
/// cancelling the run's token there stops the remaining chunks.
#[async_trait::async_trait]
pub trait BatchObserver: Send {
    fn transfer_started(&mut self, _index: usize, _name: &str) {}

    fn transfer_settled(&mut self, _result: &UploadResult) {}

    async fn chunk_settled(&mut self, _results: &[UploadResult], _remaining: usize) {}
}

impl BatchObserver for () {}

/// Runs chunked transfers through a [`Transfer`]
pub struct BatchScheduler {
    transfer: Arc<dyn Transfer>,
    options: BatchOptions,
}

impl BatchScheduler {
    pub fn new(transfer: Arc<dyn Transfer>, options: BatchOptions) -> Self {
        Self { transfer, options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Transfer every asset, returning one result per asset ordered by index.
    ///
    /// Once `cancel` fires, chunks that have not started are skipped; a chunk
    /// already in flight always runs to completion.
    #[tracing::instrument(
        name = "upload.run_batches",
        skip_all,
        fields(
            assets = assets.len(),
            batch_size = self.options.batch_size,
            mode = ?self.options.mode
        )
    )]
    pub async fn run_batches(
        &self,
        assets: &[NormalizedAsset],
        cancel: &CancellationToken,
        observer: &mut dyn BatchObserver,
    ) -> Vec<UploadResult> {
        let chunks: Vec<&[NormalizedAsset]> = partition(assets, self.options.batch_size).collect();
        let total_chunks = chunks.len();
        let mut results = Vec::with_capacity(assets.len());
        let mut offset = 0;

        for (chunk_no, chunk) in chunks.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(
                    skipped = assets.len() - offset,
                    "Run cancelled, skipping remaining chunks"
                );
                break;
            }

            tracing::debug!(chunk = chunk_no + 1, of = total_chunks, files = chunk.len(), "Starting chunk");
            for (i, asset) in chunk.iter().enumerate() {
                observer.transfer_started(offset + i, &asset.name);
            }

            let mut chunk_results = match self.options.mode {
                TransferMode::PerFile => self.run_per_file(chunk, offset, observer).await,
                TransferMode::PerBatch => self.run_per_batch(chunk, offset, observer).await,
            };
            chunk_results.sort_by_key(|r| r.index);

            offset += chunk.len();
            let remaining = assets.len() - offset;
            observer.chunk_settled(&chunk_results, remaining).await;
            results.extend(chunk_results);

            if chunk_no + 1 < total_chunks && !cancel.is_cancelled() {
                tracing::debug!(
                    delay_ms = self.options.inter_batch_delay.as_millis() as u64,
                    "Pausing between chunks"
                );
                tokio::time::sleep(self.options.inter_batch_delay).await;
            }
        }

        for (i, asset) in assets.iter().enumerate().skip(offset) {
            let result = UploadResult::new(i, &asset.name, Err(UploadError::Skipped));
            observer.transfer_settled(&result);
            results.push(result);
        }

        results
    }

    async fn run_per_file(
        &self,
        chunk: &[NormalizedAsset],
        offset: usize,
        observer: &mut dyn BatchObserver,
    ) -> Vec<UploadResult> {
        let transfer = &self.transfer;
        let mut pending: FuturesUnordered<_> = chunk
            .iter()
            .enumerate()
            .map(|(i, asset)| async move { (offset + i, asset, transfer.send(asset).await) })
            .collect();

        let mut settled = Vec::with_capacity(chunk.len());
        while let Some((index, asset, outcome)) = pending.next().await {
            let result = UploadResult::new(index, &asset.name, outcome);
            observer.transfer_settled(&result);
            settled.push(result);
        }
        settled
    }

    async fn run_per_batch(
        &self,
        chunk: &[NormalizedAsset],
        offset: usize,
        observer: &mut dyn BatchObserver,
    ) -> Vec<UploadResult> {
        let outcomes: Vec<Result<String, UploadError>> = match self.transfer.send_batch(chunk).await {
            Ok(urls) if urls.len() == chunk.len() => urls.into_iter().map(Ok).collect(),
            Ok(urls) => {
                let err = UploadError::ResponseContract(format!(
                    "expected {} URLs, relay returned {}",
                    chunk.len(),
                    urls.len()
                ));
                vec![Err(err); chunk.len()]
            }
            Err(e) => vec![Err(e); chunk.len()],
        };

        chunk
            .iter()
            .zip(outcomes)
            .enumerate()
            .map(|(i, (asset, outcome))| {
                let result = UploadResult::new(offset + i, &asset.name, outcome);
                observer.transfer_settled(&result);
                result
            })
            .collect()
    }
}
