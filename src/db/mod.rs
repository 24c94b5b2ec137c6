//! Event store: four append-only tables (blocks, tx results, events, attributes).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{Insertable, Queryable, QueryableByName};

use crate::error::{Error, Result};
use crate::query::compiler::CompiledQuery;
use crate::schema::{attributes, blocks, events, tx_results};

pub mod pool;
pub mod repo;

#[cfg(test)]
pub mod memory;

pub use self::repo::PostgresEventStore;

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = blocks)]
pub struct NewBlock {
    pub height: i64,
    pub chain_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = tx_results)]
pub struct NewTxResult {
    pub block_id: i64,
    pub height: i64,
    pub index: i32,
    pub created_at: DateTime<Utc>,
    pub tx_hash: String,
    pub tx_result: Vec<u8>,
}

/// `tx_id == None` marks a block-level event.
#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = events)]
pub struct NewEvent {
    pub block_id: i64,
    pub tx_id: Option<i64>,
    pub event_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Insertable)]
#[diesel(table_name = attributes)]
pub struct NewAttribute {
    pub event_id: i64,
    pub key: String,
    pub composite_key: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Queryable, QueryableByName)]
#[diesel(table_name = tx_results)]
pub struct StoredTxResult {
    pub rowid: i64,
    pub height: i64,
    pub created_at: DateTime<Utc>,
    pub tx_hash: String,
    pub tx_result: Vec<u8>,
}

/// Result of an `INSERT .. ON CONFLICT DO NOTHING RETURNING rowid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    AlreadyExists,
}

impl InsertOutcome {
    pub fn from_returning(rowid: Option<i64>) -> Self {
        match rowid {
            Some(id) => InsertOutcome::Inserted(id),
            None => InsertOutcome::AlreadyExists,
        }
    }
}

/// Time limit and/or cancellation flag attached to a store transaction.
///
/// Checked before the unit of work starts and again right before commit, so
/// an expired call always rolls back. On Postgres the remaining time is also
/// applied as `statement_timeout` for the transaction.
#[derive(Clone, Debug, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl Deadline {
    pub fn none() -> Self {
        Deadline::default()
    }

    pub fn after(timeout: Duration) -> Self {
        Deadline {
            at: Instant::now().checked_add(timeout),
            cancelled: None,
        }
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        let cancelled = self
            .cancelled
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false);
        cancelled || self.remaining() == Some(Duration::ZERO)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            Err(Error::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
pub trait EventStore {
    type Operations: EventStoreOperations;

    /// Execute some operations on a pooled connection without creating a database transaction.
    async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Self::Operations) -> Result<R> + Send + 'static,
        R: Send + 'static;

    /// Execute some operations within a database transaction.
    ///
    /// Commits when `f` succeeds and the deadline still holds, otherwise rolls
    /// back and returns the error produced by `f` (or `DeadlineExceeded`).
    async fn transaction<F, R>(&self, deadline: &Deadline, f: F) -> Result<R>
    where
        F: FnOnce(&mut Self::Operations) -> Result<R> + Send + 'static,
        R: Send + 'static;
}

pub trait EventStoreOperations {
    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<()>;

    fn insert_block(&mut self, block: &NewBlock) -> Result<InsertOutcome>;

    fn find_block_id(&mut self, height: i64, chain_id: &str) -> Result<Option<i64>>;

    fn insert_tx_result(&mut self, tx_result: &NewTxResult) -> Result<InsertOutcome>;

    fn insert_event(&mut self, event: &NewEvent) -> Result<i64>;

    /// Inserts a single attribute in isolation: a failure here must leave the
    /// enclosing transaction usable.
    fn insert_attribute(&mut self, attribute: &NewAttribute) -> Result<()>;

    fn latest_block_height(&mut self) -> Result<Option<i64>>;

    fn tx_result_by_hash(&mut self, tx_hash: &str) -> Result<Option<StoredTxResult>>;

    fn search_tx_results(&mut self, query: &CompiledQuery) -> Result<Vec<StoredTxResult>>;
}
