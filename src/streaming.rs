//! Post-commit notification of freshly indexed transactions.
//!
//! Observers run after the store transaction has committed; their failures
//! are logged and never affect ingestion.

use std::sync::Arc;

use tokio::sync::mpsc;
use wavesexchange_log::{debug, info, warn};

use crate::abci::Event;
use crate::error::{Error, Result};
use crate::metrics::STREAMED_TXS;

#[derive(Clone, Debug, PartialEq)]
pub struct IndexedTx {
    pub height: i64,
    pub index: u32,
    pub hash: String,
    pub events: Vec<Event>,
}

pub trait IndexObserver: Send + Sync {
    fn on_indexed(&self, tx: &IndexedTx) -> Result<()>;
}

pub fn notify_all(observers: &[Arc<dyn IndexObserver>], txs: &[IndexedTx]) {
    for observer in observers {
        for tx in txs {
            if let Err(err) = observer.on_indexed(tx) {
                warn!(
                    "observer failed for tx {} at height {}: {}",
                    tx.hash, tx.height, err
                );
            }
        }
    }
}

/// Forwards indexed transactions into a bounded channel without waiting.
pub struct ChannelObserver {
    tx: mpsc::Sender<IndexedTx>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<IndexedTx>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<IndexedTx>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl IndexObserver for ChannelObserver {
    fn on_indexed(&self, tx: &IndexedTx) -> Result<()> {
        self.tx
            .try_send(tx.clone())
            .map_err(|e| Error::ObserverError(e.to_string()))
    }
}

/// Drains the notification channel until every sender is dropped. Returns
/// the number of transactions received.
pub async fn consume_indexed(mut rx: mpsc::Receiver<IndexedTx>) -> u64 {
    info!("starting indexed txs consumer");
    let mut received = 0;
    while let Some(tx) = rx.recv().await {
        debug!("indexed tx {} at {}/{}", tx.hash, tx.height, tx.index);
        STREAMED_TXS.inc();
        received += 1;
    }
    received
}
