//! Follows a CometBFT node and feeds finalized blocks to an event sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use wavesexchange_log::{debug, error, info};

use crate::db::Deadline;
use crate::error::{Error, Result};
use crate::indexer::EventSinkIndexer;

pub mod rpc;

use self::rpc::{FetchedBlock, RpcClient};

#[derive(Clone, Debug)]
pub struct Config {
    pub rpc_url: String,
    pub start_height: i64,
    pub poll_delay: Duration,
}

/// Source of finalized blocks.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn latest_height(&self) -> Result<i64>;

    async fn fetch_block(&self, height: i64) -> Result<FetchedBlock>;
}

#[async_trait]
impl BlockSource for RpcClient {
    async fn latest_height(&self) -> Result<i64> {
        RpcClient::latest_height(self).await
    }

    async fn fetch_block(&self, height: i64) -> Result<FetchedBlock> {
        RpcClient::fetch_block(self, height).await
    }
}

pub struct Syncer<B> {
    source: B,
    sink: Arc<dyn EventSinkIndexer>,
    start_height: i64,
    poll_delay: Duration,
    ingest_timeout: Duration,
    /// Next height to index. Advanced only after both the block and its
    /// transactions are committed.
    next_height: Mutex<Option<i64>>,
}

impl<B: BlockSource> Syncer<B> {
    pub fn new(
        source: B,
        sink: Arc<dyn EventSinkIndexer>,
        config: &Config,
        ingest_timeout: Duration,
    ) -> Self {
        Self {
            source,
            sink,
            start_height: config.start_height,
            poll_delay: config.poll_delay,
            ingest_timeout,
            next_height: Mutex::new(None),
        }
    }

    pub async fn run(self) -> Result<()> {
        info!(
            "starting {} syncer from height {}",
            self.sink.module_name(),
            self.start_height
        );

        loop {
            match self.sync_once().await {
                Ok(0) => {}
                Ok(count) => debug!("synced {} blocks", count),
                Err(err) => error!("sync failed: {}", err),
            }
            tokio::time::sleep(self.poll_delay).await;
        }
    }

    /// Indexes every height between the cursor and the node's tip. Returns
    /// the number of heights processed.
    ///
    /// The cursor starts at the last indexed height itself: its transactions
    /// may be missing if the previous run stopped between the two writes.
    pub async fn sync_once(&self) -> Result<u64> {
        let mut cursor = self.next_height.lock().await;
        let next = match *cursor {
            Some(next) => next,
            None => {
                let seed = match self.sink.get_latest_height().await {
                    Ok(height) => height.max(self.start_height),
                    Err(Error::NoBlocksIndexed) => self.start_height,
                    Err(err) => return Err(err),
                };
                *cursor = Some(seed);
                seed
            }
        };
        let tip = self.source.latest_height().await?;

        let mut processed = 0;
        for height in next..=tip {
            let block = self.source.fetch_block(height).await?;
            self.index(block).await?;
            *cursor = Some(height + 1);
            processed += 1;
        }

        Ok(processed)
    }

    async fn index(&self, block: FetchedBlock) -> Result<()> {
        let deadline = Deadline::after(self.ingest_timeout);
        let tx_count = block.txs.len();

        self.sink
            .index_block(block.height, block.events, &deadline)
            .await?;
        self.sink
            .index_transactions(block.height, block.txs, &deadline)
            .await?;

        info!("indexed block {} with {} txs", block.height, tx_count);
        Ok(())
    }
}
