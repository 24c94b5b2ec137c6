//! In-memory event store for tests.
//!
//! Mirrors the Postgres constraints (unique block per height and chain,
//! unique tx per block and index, unique attribute key per event) and
//! evaluates [`CompiledQuery`] the same way the generated SQL does.
//! Transactions work on a copy of the state that replaces the original only
//! on commit.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};

use super::{
    Deadline, EventStore, EventStoreOperations, InsertOutcome, NewAttribute, NewBlock, NewEvent,
    NewTxResult, StoredTxResult,
};
use crate::error::{Error, Result};
use crate::query::compiler::{CandidateTable, CompiledQuery};
use crate::query::{Operand, Operator};

#[derive(Clone, Debug)]
struct BlockRow {
    rowid: i64,
    block: NewBlock,
}

#[derive(Clone, Debug)]
struct TxRow {
    rowid: i64,
    tx: NewTxResult,
}

#[derive(Clone, Debug)]
struct EventRow {
    rowid: i64,
    event: NewEvent,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    blocks: Vec<BlockRow>,
    tx_results: Vec<TxRow>,
    events: Vec<EventRow>,
    attributes: Vec<NewAttribute>,
    last_rowid: i64,
    failing_keys: HashSet<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowCounts {
    pub blocks: usize,
    pub tx_results: usize,
    pub events: usize,
    pub attributes: usize,
}

#[derive(Clone, Default)]
pub struct MemoryEventStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn counts(&self) -> RowCounts {
        self.with_state(|s| RowCounts {
            blocks: s.blocks.len(),
            tx_results: s.tx_results.len(),
            events: s.events.len(),
            attributes: s.attributes.len(),
        })
    }

    pub fn attribute_values(&self, composite_key: &str) -> Vec<String> {
        self.with_state(|s| {
            s.attributes
                .iter()
                .filter(|a| a.composite_key == composite_key)
                .map(|a| a.value.clone())
                .collect()
        })
    }

    pub fn block_event_types(&self) -> Vec<String> {
        self.with_state(|s| {
            s.events
                .iter()
                .filter(|e| e.event.tx_id.is_none())
                .map(|e| e.event.event_type.clone())
                .collect()
        })
    }

    /// Makes every insert of an attribute with this composite key fail.
    pub fn fail_attribute(&self, composite_key: &str) {
        self.with_state(|s| {
            s.failing_keys.insert(composite_key.to_owned());
        })
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    type Operations = MemoryState;

    async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut MemoryState) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.with_state(f)
    }

    async fn transaction<F, R>(&self, deadline: &Deadline, f: F) -> Result<R>
    where
        F: FnOnce(&mut MemoryState) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        deadline.check()?;
        self.with_state(|state| {
            let mut working = state.clone();
            if let Some(remaining) = deadline.remaining() {
                working.set_statement_timeout(remaining)?;
            }
            let value = f(&mut working)?;
            deadline.check()?;
            *state = working;
            Ok(value)
        })
    }
}

impl MemoryState {
    fn next_rowid(&mut self) -> i64 {
        self.last_rowid += 1;
        self.last_rowid
    }
}

fn accepts(op: Operator, ord: Ordering) -> bool {
    match op {
        Operator::Eq => ord == Ordering::Equal,
        Operator::Lt => ord == Ordering::Less,
        Operator::Leq => ord != Ordering::Greater,
        Operator::Gt => ord == Ordering::Greater,
        Operator::Geq => ord != Ordering::Less,
    }
}

fn stored_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Strings compare bytewise, the same ordering as the `COLLATE "C"` range
/// filters in the compiled SQL.
fn candidate_matches(candidate: &CandidateTable, composite_key: &str, value: &str) -> bool {
    if candidate.composite_key != composite_key {
        return false;
    }
    let ord = match &candidate.arg {
        Operand::String(s) => Some(value.cmp(s.as_str())),
        Operand::Number(n) => BigDecimal::from_str(value)
            .ok()
            .filter(|_| value.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '.'))
            .map(|v| v.cmp(n)),
        Operand::Time(t) => stored_time(value).map(|v| v.cmp(t)),
    };
    ord.map(|ord| accepts(candidate.op, ord)).unwrap_or(false)
}

impl EventStoreOperations for MemoryState {
    fn set_statement_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn insert_block(&mut self, block: &NewBlock) -> Result<InsertOutcome> {
        if self
            .blocks
            .iter()
            .any(|b| b.block.height == block.height && b.block.chain_id == block.chain_id)
        {
            return Ok(InsertOutcome::AlreadyExists);
        }
        let rowid = self.next_rowid();
        self.blocks.push(BlockRow {
            rowid,
            block: block.clone(),
        });
        Ok(InsertOutcome::Inserted(rowid))
    }

    fn find_block_id(&mut self, height: i64, chain_id: &str) -> Result<Option<i64>> {
        Ok(self
            .blocks
            .iter()
            .find(|b| b.block.height == height && b.block.chain_id == chain_id)
            .map(|b| b.rowid))
    }

    fn insert_tx_result(&mut self, tx_result: &NewTxResult) -> Result<InsertOutcome> {
        if self
            .tx_results
            .iter()
            .any(|t| t.tx.block_id == tx_result.block_id && t.tx.index == tx_result.index)
        {
            return Ok(InsertOutcome::AlreadyExists);
        }
        let rowid = self.next_rowid();
        self.tx_results.push(TxRow {
            rowid,
            tx: tx_result.clone(),
        });
        Ok(InsertOutcome::Inserted(rowid))
    }

    fn insert_event(&mut self, event: &NewEvent) -> Result<i64> {
        let rowid = self.next_rowid();
        self.events.push(EventRow {
            rowid,
            event: event.clone(),
        });
        Ok(rowid)
    }

    fn insert_attribute(&mut self, attribute: &NewAttribute) -> Result<()> {
        if self.failing_keys.contains(&attribute.composite_key) {
            return Err(Error::DbError(diesel::result::Error::RollbackTransaction));
        }
        if !self
            .attributes
            .iter()
            .any(|a| a.event_id == attribute.event_id && a.key == attribute.key)
        {
            self.attributes.push(attribute.clone());
        }
        Ok(())
    }

    fn latest_block_height(&mut self) -> Result<Option<i64>> {
        Ok(self.blocks.iter().map(|b| b.block.height).max())
    }

    fn tx_result_by_hash(&mut self, tx_hash: &str) -> Result<Option<StoredTxResult>> {
        Ok(self
            .tx_results
            .iter()
            .filter(|t| t.tx.tx_hash == tx_hash)
            .max_by_key(|t| t.rowid)
            .map(to_stored))
    }

    fn search_tx_results(&mut self, query: &CompiledQuery) -> Result<Vec<StoredTxResult>> {
        let mut heights: Vec<&TxRow> = self
            .tx_results
            .iter()
            .filter(|t| query.height.contains(t.tx.height))
            .collect();
        heights.sort_by(|a, b| b.tx.height.cmp(&a.tx.height).then(b.rowid.cmp(&a.rowid)));
        heights.truncate(query.limit as usize);
        let filtered_heights: HashSet<i64> = heights.iter().map(|t| t.rowid).collect();

        let event_attributes: Vec<(i64, &NewAttribute)> = self
            .events
            .iter()
            .filter_map(|e| e.event.tx_id.map(|tx_id| (tx_id, e.rowid)))
            .filter(|(tx_id, _)| filtered_heights.contains(tx_id))
            .flat_map(|(tx_id, event_id)| {
                self.attributes
                    .iter()
                    .filter(move |a| a.event_id == event_id)
                    .map(move |a| (tx_id, a))
            })
            .collect();

        let tx_ids: BTreeSet<i64> = if query.candidates.is_empty() {
            event_attributes.iter().map(|(tx_id, _)| *tx_id).collect()
        } else {
            query
                .candidates
                .iter()
                .map(|candidate| {
                    event_attributes
                        .iter()
                        .filter(|(_, a)| candidate_matches(candidate, &a.composite_key, &a.value))
                        .map(|(tx_id, _)| *tx_id)
                        .collect::<BTreeSet<i64>>()
                })
                .reduce(|acc, set| acc.intersection(&set).copied().collect())
                .unwrap_or_default()
        };

        Ok(tx_ids
            .iter()
            .rev()
            .take(query.limit as usize)
            .filter_map(|id| self.tx_results.iter().find(|t| t.rowid == *id))
            .map(to_stored)
            .collect())
    }
}

fn to_stored(row: &TxRow) -> StoredTxResult {
    StoredTxResult {
        rowid: row.rowid,
        height: row.tx.height,
        created_at: row.tx.created_at,
        tx_hash: row.tx.tx_hash.clone(),
        tx_result: row.tx.tx_result.clone(),
    }
}
