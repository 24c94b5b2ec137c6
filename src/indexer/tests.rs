use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use super::*;
use crate::abci::{tx_hash, EventAttribute};
use crate::db::memory::{MemoryEventStore, RowCounts};
use crate::indexer::attributes::MAX_ATTRIBUTE_VALUE_LEN;
use crate::streaming::ChannelObserver;

const CHAIN_ID: &str = "test-chain";

fn config(module: Module) -> IndexerConfig {
    IndexerConfig {
        chain_id: CHAIN_ID.to_owned(),
        module,
        default_window_heights: 10,
        index_block_events: true,
        ingest_timeout: Duration::from_secs(30),
        search_timeout: Duration::from_secs(10),
    }
}

fn tx_sink(store: &MemoryEventStore) -> TxEventSink<MemoryEventStore> {
    TxEventSink::new(store.clone(), config(Module::Tx))
}

fn event(event_type: &str, attrs: &[(&str, &str)]) -> Event {
    Event::new(
        event_type,
        attrs
            .iter()
            .map(|(k, v)| EventAttribute::indexed(*k, *v))
            .collect(),
    )
}

fn tx(index: u32, raw: &str, events: Vec<Event>) -> TxInput {
    TxInput {
        index,
        tx: raw.as_bytes().to_vec(),
        result: ExecTxResult {
            code: 0,
            log: "ok".to_owned(),
            gas_wanted: 200,
            gas_used: 100,
            events,
            ..Default::default()
        },
        time: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
    }
}

fn transfer_tx(index: u32, raw: &str, amount: &str) -> TxInput {
    tx(index, raw, vec![event("transfer", &[("amount", amount)])])
}

fn no_deadline() -> Deadline {
    Deadline::none()
}

async fn index_height(sink: &dyn EventSinkIndexer, height: i64, txs: Vec<TxInput>) {
    sink.index_block(height, vec![], &no_deadline()).await.unwrap();
    sink.index_transactions(height, txs, &no_deadline())
        .await
        .unwrap();
}

fn heights(results: &SearchResults) -> Vec<i64> {
    results.txs.iter().map(|t| t.height).collect()
}

#[tokio::test]
async fn transfer_scenario_end_to_end() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    let input = transfer_tx(0, "send 100uatom", "100uatom");

    index_height(&sink, 10, vec![input.clone()]).await;
    let counts = store.counts();

    let results = sink
        .search("transfer.amount = '100uatom'", Some(10), &no_deadline())
        .await
        .unwrap();
    assert_eq!(results.total_count, 1);
    let found = &results.txs[0];
    assert_eq!(found.height, 10);
    assert_eq!(found.index, 0);
    assert_eq!(found.tx, input.tx);
    assert_eq!(found.tx_result, input.result);
    assert_eq!(found.timestamp.as_deref(), Some("2024-01-02T03:04:05Z"));

    let hash = tx_hash(&input.tx);
    assert_eq!(hex::encode_upper(&found.hash), hash);

    let by_hash = sink.get_by_hash(&hash, &no_deadline()).await.unwrap();
    assert_eq!(&by_hash, found);

    index_height(&sink, 10, vec![input]).await;
    assert_eq!(store.counts(), counts);
}

#[tokio::test]
async fn repeated_ingestion_keeps_row_counts() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    let block_events = vec![event("mint", &[("amount", "5")])];
    let txs = vec![
        transfer_tx(0, "a", "1"),
        transfer_tx(1, "b", "2"),
    ];

    for _ in 0..2 {
        sink.index_block(7, block_events.clone(), &no_deadline())
            .await
            .unwrap();
        sink.index_transactions(7, txs.clone(), &no_deadline())
            .await
            .unwrap();
    }

    assert_eq!(
        store.counts(),
        RowCounts {
            blocks: 1,
            tx_results: 2,
            // per tx: tx.hash, tx.height, transfer; plus one block event
            events: 7,
            attributes: 7,
        }
    );
}

#[tokio::test]
async fn transactions_require_their_block() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);

    let err = sink
        .index_transactions(5, vec![transfer_tx(0, "a", "1")], &no_deadline())
        .await
        .unwrap_err();

    match err {
        Error::TxIndexing {
            height,
            index,
            source,
        } => {
            assert_eq!((height, index), (5, 0));
            assert!(matches!(*source, Error::BlockNotIndexed { height: 5, .. }));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(store.counts().tx_results, 0);
}

#[tokio::test]
async fn failed_batch_rolls_back_earlier_transactions() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    sink.index_block(1, vec![], &no_deadline()).await.unwrap();

    let out_of_range = TxInput {
        index: u32::MAX,
        ..transfer_tx(0, "b", "2")
    };
    let result = sink
        .index_transactions(1, vec![transfer_tx(0, "a", "1"), out_of_range], &no_deadline())
        .await;

    assert!(matches!(result, Err(Error::TxIndexing { .. })));
    assert_eq!(store.counts().tx_results, 0);
    assert_eq!(store.counts().events, 0);
}

#[tokio::test]
async fn conditions_intersect() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);

    let wasm = |contract: &str, action: &str| vec![event("wasm", &[("contract", contract), ("action", action)])];
    index_height(
        &sink,
        3,
        vec![
            tx(0, "t0", wasm("X", "W")),
            tx(1, "t1", wasm("Z", "Y")),
            tx(2, "t2", wasm("X", "Y")),
            tx(3, "t3", wasm("Z", "W")),
            tx(4, "t4", vec![event("wasm", &[("contract", "X")]), event("other", &[("action", "Y")])]),
        ],
    )
    .await;

    let results = sink
        .search("wasm.contract = 'X' AND wasm.action = 'Y'", None, &no_deadline())
        .await
        .unwrap();
    assert_eq!(results.total_count, 1);
    assert_eq!(results.txs[0].tx, b"t2".to_vec());

    let contract_only = sink
        .search("wasm.contract = 'X'", None, &no_deadline())
        .await
        .unwrap();
    assert_eq!(contract_only.total_count, 3);
}

#[tokio::test]
async fn results_are_newest_first() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    for height in 1..=3 {
        index_height(
            &sink,
            height,
            vec![
                transfer_tx(0, &format!("{}-0", height), "1"),
                transfer_tx(1, &format!("{}-1", height), "1"),
            ],
        )
        .await;
    }

    let results = sink
        .search("transfer.amount = '1'", None, &no_deadline())
        .await
        .unwrap();
    let raw: Vec<_> = results
        .txs
        .iter()
        .map(|t| String::from_utf8(t.tx.clone()).unwrap())
        .collect();
    assert_eq!(raw, vec!["3-1", "3-0", "2-1", "2-0", "1-1", "1-0"]);
}

#[tokio::test]
async fn height_range_wins_over_equality() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    for height in 1..=6 {
        index_height(&sink, height, vec![transfer_tx(0, &format!("h{}", height), "1")]).await;
    }

    let ranged = sink
        .search("tx.height = 5 AND tx.height > 2", None, &no_deadline())
        .await
        .unwrap();
    assert_eq!(heights(&ranged), vec![6, 5, 4, 3]);

    let exact = sink
        .search("tx.height = 5", None, &no_deadline())
        .await
        .unwrap();
    assert_eq!(heights(&exact), vec![5]);

    let bounded = sink
        .search("tx.height >= 2 AND tx.height < 4 AND transfer.amount = '1'", None, &no_deadline())
        .await
        .unwrap();
    assert_eq!(heights(&bounded), vec![3, 2]);
}

#[tokio::test]
async fn limit_caps_results() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    index_height(
        &sink,
        1,
        (0..5).map(|i| transfer_tx(i, &format!("t{}", i), "1")).collect(),
    )
    .await;

    let limited = sink
        .search("transfer.amount = '1'", Some(2), &no_deadline())
        .await
        .unwrap();
    assert_eq!(limited.total_count, 2);

    let oversized = sink
        .search("transfer.amount = '1'", Some(1_000_000), &no_deadline())
        .await
        .unwrap();
    assert_eq!(oversized.total_count, 5);
}

#[tokio::test]
async fn empty_query_uses_trailing_window() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    for height in 1..=20 {
        index_height(&sink, height, vec![transfer_tx(0, &format!("h{}", height), "1")]).await;
    }

    let results = sink.search("", None, &no_deadline()).await.unwrap();
    assert_eq!(heights(&results), (10..=20).rev().collect::<Vec<_>>());
}

#[tokio::test]
async fn query_without_height_is_anchored_at_tip() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);

    let nothing = sink
        .search("transfer.amount = '1'", None, &no_deadline())
        .await
        .unwrap();
    assert_eq!(nothing, SearchResults::default());

    for height in 1..=15 {
        index_height(&sink, height, vec![transfer_tx(0, &format!("h{}", height), "1")]).await;
    }
    let all = sink
        .search("transfer.amount = '1'", None, &no_deadline())
        .await
        .unwrap();
    assert_eq!(all.total_count, 15);
}

#[tokio::test]
async fn numeric_conditions_skip_non_numeric_values() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    index_height(
        &sink,
        1,
        vec![
            transfer_tx(0, "a", "100"),
            transfer_tx(1, "b", "20"),
            transfer_tx(2, "c", "lots"),
            transfer_tx(3, "d", "75.5"),
        ],
    )
    .await;

    let results = sink
        .search("transfer.amount > 50", None, &no_deadline())
        .await
        .unwrap();
    let raw: Vec<_> = results.txs.iter().map(|t| t.tx.clone()).collect();
    assert_eq!(raw, vec![b"d".to_vec(), b"a".to_vec()]);
}

#[tokio::test]
async fn text_ranges_compare_bytewise() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    fn denom_tx(index: u32, raw: &str, denom: &str) -> TxInput {
        tx(index, raw, vec![event("transfer", &[("denom", denom)])])
    }
    index_height(
        &sink,
        1,
        vec![
            denom_tx(0, "a", "apple"),
            denom_tx(1, "b", "Banana"),
            denom_tx(2, "c", "cherry"),
        ],
    )
    .await;

    let results = sink
        .search("transfer.denom < 'b'", None, &no_deadline())
        .await
        .unwrap();
    let raw: Vec<_> = results.txs.iter().map(|t| t.tx.clone()).collect();
    assert_eq!(raw, vec![b"b".to_vec(), b"a".to_vec()]);
}

#[tokio::test]
async fn attribute_values_are_sanitized() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    let binary = "multi\nline\u{1}";
    let long = "x".repeat(MAX_ATTRIBUTE_VALUE_LEN + 1);

    index_height(
        &sink,
        1,
        vec![tx(
            0,
            "t",
            vec![
                event("memo", &[("text", binary)]),
                event("memo", &[("long", &long)]),
                event("block_bloom", &[("bloom", "00ff")]),
            ],
        )],
    )
    .await;

    let stored = store.attribute_values("memo.text");
    assert_eq!(stored.len(), 1);
    assert_eq!(hex::decode(&stored[0]).unwrap(), binary.as_bytes());

    assert!(store.attribute_values("memo.long").is_empty());
    assert!(store.attribute_values("block_bloom.bloom").is_empty());

    let query = format!("memo.long = '{}'", long);
    let results = sink.search(&query, None, &no_deadline()).await.unwrap();
    assert_eq!(results.total_count, 0);
}

#[tokio::test]
async fn failing_attribute_does_not_abort_ingestion() {
    let store = MemoryEventStore::new();
    store.fail_attribute("transfer.sender");
    let sink = tx_sink(&store);

    index_height(
        &sink,
        1,
        vec![tx(
            0,
            "t",
            vec![event("transfer", &[("sender", "alice"), ("amount", "1")])],
        )],
    )
    .await;

    assert!(store.attribute_values("transfer.sender").is_empty());
    let results = sink
        .search("transfer.amount = '1'", None, &no_deadline())
        .await
        .unwrap();
    assert_eq!(results.total_count, 1);
}

#[tokio::test]
async fn block_events_follow_the_block_row() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    let events = vec![event("mint", &[("amount", "5")]), event("", &[("k", "v")])];

    sink.index_block(1, events.clone(), &no_deadline())
        .await
        .unwrap();
    sink.index_block(1, events.clone(), &no_deadline())
        .await
        .unwrap();
    assert_eq!(store.block_event_types(), vec!["mint"]);

    let mut cfg = config(Module::Tx);
    cfg.index_block_events = false;
    let quiet_store = MemoryEventStore::new();
    let quiet = TxEventSink::new(quiet_store.clone(), cfg);
    quiet.index_block(1, events, &no_deadline()).await.unwrap();
    assert!(quiet_store.block_event_types().is_empty());
    assert_eq!(quiet_store.counts().blocks, 1);
}

#[tokio::test]
async fn wasm_sink_indexes_wasm_events_only() {
    let store = MemoryEventStore::new();
    let sink = WasmEventSink::new(store.clone(), config(Module::Wasm));
    assert_eq!(sink.module_name(), "wasm");

    let input = tx(
        0,
        "swap",
        vec![
            event("transfer", &[("amount", "1")]),
            event("wasm", &[("action", "swap")]),
            event("wasm-pool", &[("id", "7")]),
        ],
    );
    index_height(&sink, 2, vec![input.clone()]).await;

    let transfer = sink
        .search("transfer.amount = '1'", None, &no_deadline())
        .await
        .unwrap();
    assert_eq!(transfer.total_count, 0);

    for query in ["wasm.action = 'swap'", "wasm-pool.id = 7"] {
        let found = sink.search(query, None, &no_deadline()).await.unwrap();
        assert_eq!(found.total_count, 1, "query {}", query);
    }

    let by_meta = sink
        .search(&format!("tx.hash = '{}'", tx_hash(&input.tx)), None, &no_deadline())
        .await
        .unwrap();
    assert_eq!(by_meta.total_count, 1);
    // the stored blob keeps every event
    assert_eq!(by_meta.txs[0].tx_result.events.len(), 3);
}

#[tokio::test]
async fn observers_see_fresh_transactions_once() {
    let store = MemoryEventStore::new();
    let (observer, mut rx) = ChannelObserver::channel(10);
    let sink = tx_sink(&store).with_observer(Arc::new(observer));

    let input = transfer_tx(0, "a", "1");
    index_height(&sink, 4, vec![input.clone()]).await;
    index_height(&sink, 4, vec![input.clone()]).await;

    let indexed = rx.try_recv().unwrap();
    assert_eq!(indexed.height, 4);
    assert_eq!(indexed.hash, tx_hash(&input.tx));
    assert_eq!(indexed.events, input.result.events);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn lookups() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);

    assert!(matches!(
        sink.get_latest_height().await,
        Err(Error::NoBlocksIndexed)
    ));

    let input = transfer_tx(0, "a", "1");
    index_height(&sink, 8, vec![input.clone()]).await;
    sink.index_block(9, vec![], &no_deadline()).await.unwrap();
    assert_eq!(sink.get_latest_height().await.unwrap(), 9);

    let hash = tx_hash(&input.tx);
    let by_hash = sink
        .tx_search("ignored = 'x'", None, Some(&hash.to_ascii_lowercase()), &no_deadline())
        .await
        .unwrap();
    assert_eq!(by_hash.total_count, 1);
    assert_eq!(by_hash.txs[0].height, 8);

    let unknown = "AB".repeat(32);
    assert!(matches!(
        sink.get_by_hash(&unknown, &no_deadline()).await,
        Err(Error::TxNotFound(_))
    ));
    assert!(matches!(
        sink.get_by_hash("not-a-hash", &no_deadline()).await,
        Err(Error::InvalidTxHash(_))
    ));
}

#[tokio::test]
async fn malformed_queries_are_rejected() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);
    index_height(&sink, 1, vec![transfer_tx(0, "a", "1")]).await;

    for query in ["a.b = 'x' OR a.c = 'y'", "a.b CONTAINS 'x'", "tx.height = 'tip'"] {
        assert!(
            matches!(
                sink.search(query, None, &no_deadline()).await,
                Err(Error::InvalidQuery(_))
            ),
            "query {}",
            query
        );
    }
}

#[tokio::test]
async fn block_lookups_are_unsupported() {
    let sink = tx_sink(&MemoryEventStore::new());

    let err = sink.has_block(1).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "hasBlock is not supported via the postgres event sink"
    );

    let err = sink.search_blocks("block.height = 1").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "block search is not supported via the postgres event sink"
    );
}

#[tokio::test]
async fn expired_deadline_leaves_nothing_behind() {
    let store = MemoryEventStore::new();
    let sink = tx_sink(&store);

    let expired = Deadline::after(Duration::ZERO);
    assert!(matches!(
        sink.index_block(1, vec![], &expired).await,
        Err(Error::DeadlineExceeded)
    ));

    sink.index_block(1, vec![], &no_deadline()).await.unwrap();
    let cancelled = Deadline::none().with_cancel_flag(Arc::new(AtomicBool::new(true)));
    assert!(sink
        .index_transactions(1, vec![transfer_tx(0, "a", "1")], &cancelled)
        .await
        .is_err());
    assert_eq!(store.counts().tx_results, 0);

    // retry after a timeout is safe
    sink.index_transactions(1, vec![transfer_tx(0, "a", "1")], &no_deadline())
        .await
        .unwrap();
    assert_eq!(store.counts().tx_results, 1);
}

#[tokio::test]
async fn sink_is_selected_by_module() {
    let tx = new_event_sink(MemoryEventStore::new(), config(Module::Tx), vec![]);
    let wasm = new_event_sink(MemoryEventStore::new(), config(Module::Wasm), vec![]);
    assert_eq!(tx.module_name(), "tx");
    assert_eq!(wasm.module_name(), "wasm");
}
