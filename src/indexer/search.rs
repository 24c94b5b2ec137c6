use crate::abci::{self, TxRecord, TxResult};
use crate::db::{EventStoreOperations, StoredTxResult};
use crate::error::{Error, Result};
use crate::query::compiler::{self, CompileOptions};
use crate::query::Condition;

const TX_HASH_LEN: usize = 32;

/// Compiles and runs a search; an empty store yields no rows.
pub fn run_search<O>(
    ops: &mut O,
    conditions: Vec<Condition>,
    options: &CompileOptions,
) -> Result<Vec<StoredTxResult>>
where
    O: EventStoreOperations + ?Sized,
{
    match compiler::compile(conditions, options, || ops.latest_block_height())? {
        Some(query) => ops.search_tx_results(&query),
        None => Ok(vec![]),
    }
}

/// Decodes a stored row into the caller-facing record.
pub fn assemble(stored: StoredTxResult) -> Result<TxRecord> {
    let hash = hex::decode(&stored.tx_hash)?;
    let tx_result = TxResult::from_blob(&stored.tx_result)?;

    Ok(TxRecord {
        hash,
        height: stored.height,
        index: tx_result.index,
        timestamp: tx_result.time.as_ref().and_then(abci::timestamp_to_rfc3339),
        tx_result: tx_result.result.unwrap_or_default(),
        tx: tx_result.tx,
        indexed_at: stored.created_at,
    })
}

/// Validates a hex tx hash (optionally `0x`-prefixed) and returns it in the
/// stored upper-case form.
pub fn normalize_hash(hash: &str) -> Result<String> {
    let trimmed = hash.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    match hex::decode(hex_part) {
        Ok(bytes) if bytes.len() == TX_HASH_LEN => Ok(hex_part.to_ascii_uppercase()),
        _ => Err(Error::InvalidTxHash(hash.to_owned())),
    }
}
