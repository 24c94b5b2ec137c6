use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref INDEXED_BLOCKS: IntCounter =
        IntCounter::new("IndexedBlocks", "blocks inserted into the event store")
            .expect("can't create indexed_blocks metrics");
    pub static ref INDEXED_TXS: IntCounter =
        IntCounter::new("IndexedTxs", "transactions inserted into the event store")
            .expect("can't create indexed_txs metrics");
    pub static ref DUPLICATE_TXS: IntCounter = IntCounter::new(
        "DuplicateTxs",
        "already indexed transactions skipped on re-delivery"
    )
    .expect("can't create duplicate_txs metrics");
    pub static ref DROPPED_ATTRIBUTES: IntCounter = IntCounter::new(
        "DroppedAttributes",
        "indexable attributes that were not stored"
    )
    .expect("can't create dropped_attributes metrics");
    pub static ref SEARCH_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("SearchRequests", "search requests per outcome"),
        &["outcome"]
    )
    .expect("can't create search_requests metrics");
    pub static ref STREAMED_TXS: IntCounter = IntCounter::new(
        "StreamedTxs",
        "indexed transactions taken off the notification channel"
    )
    .expect("can't create streamed_txs metrics");
    pub static ref LAST_INDEXED_HEIGHT: IntGauge =
        IntGauge::new("LastIndexedHeight", "highest indexed block height")
            .expect("can't create last_indexed_height metrics");
}

pub fn register_metrics() {
    REGISTRY
        .register(Box::new(INDEXED_BLOCKS.clone()))
        .expect("can't register indexed_blocks metrics");

    REGISTRY
        .register(Box::new(INDEXED_TXS.clone()))
        .expect("can't register indexed_txs metrics");

    REGISTRY
        .register(Box::new(DUPLICATE_TXS.clone()))
        .expect("can't register duplicate_txs metrics");

    REGISTRY
        .register(Box::new(DROPPED_ATTRIBUTES.clone()))
        .expect("can't register dropped_attributes metrics");

    REGISTRY
        .register(Box::new(SEARCH_REQUESTS.clone()))
        .expect("can't register search_requests metrics");

    REGISTRY
        .register(Box::new(STREAMED_TXS.clone()))
        .expect("can't register streamed_txs metrics");

    REGISTRY
        .register(Box::new(LAST_INDEXED_HEIGHT.clone()))
        .expect("can't register last_indexed_height metrics");
}

pub fn observe_height(height: i64) {
    if height > LAST_INDEXED_HEIGHT.get() {
        LAST_INDEXED_HEIGHT.set(height);
    }
}
