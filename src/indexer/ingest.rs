//! Idempotent ingestion of blocks and transaction results.
//!
//! Everything here runs on [`EventStoreOperations`] inside a single store
//! transaction opened by the caller. A conflicting block or tx row means the
//! data was already indexed and is treated as success.

use std::convert::TryFrom;

use chrono::Utc;
use wavesexchange_log::{debug, warn};

use super::attributes::{self, AttributeDecision};
use super::{EventSelector, TxInput};
use crate::abci::{self, Event, TxResult};
use crate::db::{
    Deadline, EventStoreOperations, InsertOutcome, NewAttribute, NewBlock, NewEvent, NewTxResult,
};
use crate::error::{Error, Result};
use crate::metrics::{DROPPED_ATTRIBUTES, DUPLICATE_TXS};
use crate::query::{TX_HASH_TAG, TX_HEIGHT_TAG};
use crate::streaming::IndexedTx;

/// Inserts the block row and, when it is new and `index_events` is set, its
/// block-level events. Returns whether the block was freshly inserted.
pub fn index_block<O>(
    ops: &mut O,
    block: &NewBlock,
    events: &[Event],
    selector: EventSelector,
    index_events: bool,
) -> Result<bool>
where
    O: EventStoreOperations + ?Sized,
{
    match ops.insert_block(block)? {
        InsertOutcome::AlreadyExists => {
            debug!(
                "block {} of {} already indexed",
                block.height, block.chain_id
            );
            Ok(false)
        }
        InsertOutcome::Inserted(block_id) => {
            if index_events {
                insert_events(ops, block_id, None, events, selector)?;
            }
            debug!("indexed block {} of {}", block.height, block.chain_id);
            Ok(true)
        }
    }
}

/// Indexes `txs` of the block at `height`, in order.
///
/// Returns the freshly inserted transactions; duplicates are skipped.
pub fn index_transactions<O>(
    ops: &mut O,
    height: i64,
    chain_id: &str,
    txs: &[TxInput],
    selector: EventSelector,
    deadline: &Deadline,
) -> Result<Vec<IndexedTx>>
where
    O: EventStoreOperations + ?Sized,
{
    let mut fresh = Vec::with_capacity(txs.len());

    for tx in txs {
        let indexed = deadline
            .check()
            .and_then(|_| index_transaction(ops, height, chain_id, tx, selector))
            .map_err(|e| Error::tx_indexing(height, tx.index, e))?;

        if let Some(indexed) = indexed {
            fresh.push(indexed);
        }
    }

    Ok(fresh)
}

fn index_transaction<O>(
    ops: &mut O,
    height: i64,
    chain_id: &str,
    tx: &TxInput,
    selector: EventSelector,
) -> Result<Option<IndexedTx>>
where
    O: EventStoreOperations + ?Sized,
{
    let block_id = ops
        .find_block_id(height, chain_id)?
        .ok_or_else(|| Error::BlockNotIndexed {
            height,
            chain_id: chain_id.to_owned(),
        })?;

    let index = i32::try_from(tx.index).map_err(|_| Error::TxIndexOutOfRange(tx.index))?;
    let tx_hash = abci::tx_hash(&tx.tx);
    let blob = TxResult {
        height,
        index: tx.index,
        tx: tx.tx.clone(),
        result: Some(tx.result.clone()),
        time: Some(abci::timestamp_from_datetime(&tx.time)),
    }
    .to_blob()?;

    let new_tx = NewTxResult {
        block_id,
        height,
        index,
        created_at: Utc::now(),
        tx_hash: tx_hash.clone(),
        tx_result: blob,
    };

    let tx_id = match ops.insert_tx_result(&new_tx)? {
        InsertOutcome::Inserted(tx_id) => tx_id,
        InsertOutcome::AlreadyExists => {
            debug!("tx {} at {}/{} already indexed", tx_hash, height, tx.index);
            DUPLICATE_TXS.inc();
            return Ok(None);
        }
    };

    let selected: Vec<Event> = tx
        .result
        .events
        .iter()
        .filter(|e| selector.accepts(&e.r#type))
        .cloned()
        .collect();

    let mut events = vec![
        attributes::make_indexed_event(TX_HASH_TAG, tx_hash.clone()),
        attributes::make_indexed_event(TX_HEIGHT_TAG, height.to_string()),
    ];
    events.extend(selected.iter().cloned());

    insert_events(ops, block_id, Some(tx_id), &events, EventSelector::All)?;

    Ok(Some(IndexedTx {
        height,
        index: tx.index,
        hash: tx_hash,
        events: selected,
    }))
}

/// Inserts events and their indexable attributes.
///
/// Events with an empty type are skipped. Attributes that are dropped or fail
/// to insert are logged and do not fail the call.
fn insert_events<O>(
    ops: &mut O,
    block_id: i64,
    tx_id: Option<i64>,
    events: &[Event],
    selector: EventSelector,
) -> Result<()>
where
    O: EventStoreOperations + ?Sized,
{
    for event in events {
        if event.r#type.is_empty() || !selector.accepts(&event.r#type) {
            continue;
        }

        let event_id = ops.insert_event(&NewEvent {
            block_id,
            tx_id,
            event_type: event.r#type.clone(),
        })?;

        for attribute in &event.attributes {
            match attributes::prepare(&event.r#type, attribute) {
                AttributeDecision::NotIndexed => {}
                AttributeDecision::Drop {
                    composite_key,
                    reason,
                } => {
                    warn!("dropping attribute {}: {}", composite_key, reason);
                    DROPPED_ATTRIBUTES.inc();
                }
                AttributeDecision::Index(prepared) => {
                    let composite_key = prepared.composite_key.clone();
                    let row = NewAttribute {
                        event_id,
                        key: prepared.key,
                        composite_key: prepared.composite_key,
                        value: prepared.value,
                    };
                    if let Err(err) = ops.insert_attribute(&row) {
                        warn!("dropping attribute {}: {}", composite_key, err);
                        DROPPED_ATTRIBUTES.inc();
                    }
                }
            }
        }
    }

    Ok(())
}
