use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use wavesexchange_log::debug;

use super::{
    ingest, search, EventSelector, EventSinkIndexer, IndexerConfig, Module, SearchResults, TxInput,
};
use crate::abci::{Event, TxRecord};
use crate::db::{Deadline, EventStore, EventStoreOperations, NewBlock};
use crate::error::{Error, Result};
use crate::metrics::{self, INDEXED_BLOCKS, INDEXED_TXS, SEARCH_REQUESTS};
use crate::query::{self, compiler};
use crate::streaming::{self, IndexObserver};

struct SinkCore<S> {
    store: S,
    config: IndexerConfig,
    selector: EventSelector,
    observers: Vec<Arc<dyn IndexObserver>>,
}

impl<S> SinkCore<S>
where
    S: EventStore + Send + Sync + 'static,
{
    fn new(store: S, config: IndexerConfig, selector: EventSelector) -> Self {
        Self {
            store,
            config,
            selector,
            observers: vec![],
        }
    }

    async fn index_block(&self, height: i64, events: Vec<Event>, deadline: &Deadline) -> Result<()> {
        let block = NewBlock {
            height,
            chain_id: self.config.chain_id.clone(),
            created_at: Utc::now(),
        };
        let selector = self.selector;
        let index_events = self.config.index_block_events;

        let fresh = self
            .store
            .transaction(deadline, move |ops| {
                ingest::index_block(ops, &block, &events, selector, index_events)
            })
            .await?;

        if fresh {
            INDEXED_BLOCKS.inc();
            metrics::observe_height(height);
        }

        Ok(())
    }

    async fn index_transactions(
        &self,
        height: i64,
        txs: Vec<TxInput>,
        deadline: &Deadline,
    ) -> Result<()> {
        let chain_id = self.config.chain_id.clone();
        let selector = self.selector;
        let tx_deadline = deadline.clone();

        let fresh = self
            .store
            .transaction(deadline, move |ops| {
                ingest::index_transactions(ops, height, &chain_id, &txs, selector, &tx_deadline)
            })
            .await?;

        debug!("indexed {} new txs at height {}", fresh.len(), height);
        INDEXED_TXS.inc_by(fresh.len() as u64);
        streaming::notify_all(&self.observers, &fresh);

        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        limit: Option<u32>,
        deadline: &Deadline,
    ) -> Result<SearchResults> {
        let result = self.run_search(query, limit, deadline).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        SEARCH_REQUESTS.with_label_values(&[outcome]).inc();
        result
    }

    async fn run_search(
        &self,
        query: &str,
        limit: Option<u32>,
        deadline: &Deadline,
    ) -> Result<SearchResults> {
        let conditions = query::parse(query)?;
        let options = compiler::CompileOptions {
            limit: compiler::effective_limit(limit),
            default_window_heights: self.config.default_window_heights,
        };

        let rows = self
            .store
            .transaction(deadline, move |ops| {
                search::run_search(ops, conditions, &options)
            })
            .await?;

        let txs = rows
            .into_iter()
            .map(search::assemble)
            .collect::<Result<Vec<_>>>()?;

        Ok(SearchResults {
            total_count: txs.len() as u64,
            txs,
        })
    }

    async fn get_by_hash(&self, hash: &str, deadline: &Deadline) -> Result<TxRecord> {
        let hash = search::normalize_hash(hash)?;
        let lookup = hash.clone();

        let stored = self
            .store
            .transaction(deadline, move |ops| ops.tx_result_by_hash(&lookup))
            .await?;

        match stored {
            Some(stored) => search::assemble(stored),
            None => Err(Error::TxNotFound(hash)),
        }
    }

    async fn get_latest_height(&self) -> Result<i64> {
        self.store
            .execute(|ops| ops.latest_block_height())
            .await?
            .ok_or(Error::NoBlocksIndexed)
    }
}

macro_rules! event_sink {
    ($(#[$meta:meta])* $name:ident, $module:literal, $selector:expr) => {
        $(#[$meta])*
        pub struct $name<S> {
            core: SinkCore<S>,
        }

        impl<S> $name<S>
        where
            S: EventStore + Send + Sync + 'static,
        {
            pub fn new(store: S, config: IndexerConfig) -> Self {
                Self {
                    core: SinkCore::new(store, config, $selector),
                }
            }

            pub fn with_observer(mut self, observer: Arc<dyn IndexObserver>) -> Self {
                self.core.observers.push(observer);
                self
            }
        }

        #[async_trait]
        impl<S> EventSinkIndexer for $name<S>
        where
            S: EventStore + Send + Sync + 'static,
        {
            fn module_name(&self) -> &'static str {
                $module
            }

            async fn index_block(
                &self,
                height: i64,
                events: Vec<Event>,
                deadline: &Deadline,
            ) -> Result<()> {
                self.core.index_block(height, events, deadline).await
            }

            async fn index_transactions(
                &self,
                height: i64,
                txs: Vec<TxInput>,
                deadline: &Deadline,
            ) -> Result<()> {
                self.core.index_transactions(height, txs, deadline).await
            }

            async fn search(
                &self,
                query: &str,
                limit: Option<u32>,
                deadline: &Deadline,
            ) -> Result<SearchResults> {
                self.core.search(query, limit, deadline).await
            }

            async fn get_by_hash(&self, hash: &str, deadline: &Deadline) -> Result<TxRecord> {
                self.core.get_by_hash(hash, deadline).await
            }

            async fn get_latest_height(&self) -> Result<i64> {
                self.core.get_latest_height().await
            }
        }
    };
}

event_sink!(
    /// Indexes every non-empty execution-result event.
    TxEventSink,
    "tx",
    EventSelector::All
);

event_sink!(
    /// Indexes only `wasm` and `wasm-*` events, plus the `tx.hash` and
    /// `tx.height` meta attributes of every transaction.
    WasmEventSink,
    "wasm",
    EventSelector::Wasm
);

pub fn new_event_sink<S>(
    store: S,
    config: IndexerConfig,
    observers: Vec<Arc<dyn IndexObserver>>,
) -> Arc<dyn EventSinkIndexer>
where
    S: EventStore + Send + Sync + 'static,
{
    match config.module {
        Module::Tx => Arc::new(
            observers
                .into_iter()
                .fold(TxEventSink::new(store, config), |sink, o| {
                    sink.with_observer(o)
                }),
        ),
        Module::Wasm => Arc::new(
            observers
                .into_iter()
                .fold(WasmEventSink::new(store, config), |sink, o| {
                    sink.with_observer(o)
                }),
        ),
    }
}
