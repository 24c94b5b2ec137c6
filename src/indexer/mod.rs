//! Event sink indexers: ingestion of blocks/transactions and tag search.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::abci::{Event, ExecTxResult, TxRecord};
use crate::db::Deadline;
use crate::error::{Error, Result};

pub mod attributes;
pub mod ingest;
pub mod search;
mod sink;

#[cfg(test)]
mod tests;

pub use self::sink::{new_event_sink, TxEventSink, WasmEventSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    Tx,
    Wasm,
}

#[derive(Clone, Debug)]
pub struct IndexerConfig {
    pub chain_id: String,
    pub module: Module,
    pub default_window_heights: i64,
    pub index_block_events: bool,
    pub ingest_timeout: Duration,
    pub search_timeout: Duration,
}

impl IndexerConfig {
    pub fn ingest_deadline(&self) -> Deadline {
        Deadline::after(self.ingest_timeout)
    }

    pub fn search_deadline(&self) -> Deadline {
        Deadline::after(self.search_timeout)
    }
}

/// Which execution-result events a sink persists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSelector {
    All,
    Wasm,
}

impl EventSelector {
    pub fn accepts(&self, event_type: &str) -> bool {
        match self {
            EventSelector::All => true,
            EventSelector::Wasm => event_type == "wasm" || event_type.starts_with("wasm-"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TxInput {
    pub index: u32,
    pub tx: Vec<u8>,
    pub result: ExecTxResult,
    pub time: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchResults {
    pub txs: Vec<TxRecord>,
    pub total_count: u64,
}

#[async_trait]
pub trait EventSinkIndexer: Send + Sync {
    fn module_name(&self) -> &'static str;

    async fn index_block(&self, height: i64, events: Vec<Event>, deadline: &Deadline)
        -> Result<()>;

    /// Requires the block at `height` to be indexed already.
    async fn index_transactions(
        &self,
        height: i64,
        txs: Vec<TxInput>,
        deadline: &Deadline,
    ) -> Result<()>;

    async fn search(
        &self,
        query: &str,
        limit: Option<u32>,
        deadline: &Deadline,
    ) -> Result<SearchResults>;

    async fn get_by_hash(&self, hash: &str, deadline: &Deadline) -> Result<TxRecord>;

    async fn get_latest_height(&self) -> Result<i64>;

    /// Search entry point of the HTTP surface: a non-empty `hash` takes
    /// precedence over `query`.
    async fn tx_search(
        &self,
        query: &str,
        limit: Option<u32>,
        hash: Option<&str>,
        deadline: &Deadline,
    ) -> Result<SearchResults> {
        match hash.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hash) => {
                let tx = self.get_by_hash(hash, deadline).await?;
                Ok(SearchResults {
                    txs: vec![tx],
                    total_count: 1,
                })
            }
            None => self.search(query, limit, deadline).await,
        }
    }

    async fn has_block(&self, _height: i64) -> Result<bool> {
        Err(Error::Unsupported("hasBlock"))
    }

    async fn search_blocks(&self, _query: &str) -> Result<Vec<i64>> {
        Err(Error::Unsupported("block search"))
    }
}
