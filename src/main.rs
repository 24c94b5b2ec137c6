use std::sync::Arc;

use tx_event_indexer::db::{pool, PostgresEventStore};
use tx_event_indexer::error::Error;
use tx_event_indexer::indexer::new_event_sink;
use tx_event_indexer::streaming::{consume_indexed, ChannelObserver, IndexObserver};
use tx_event_indexer::sync::{rpc::RpcClient, Syncer};
use tx_event_indexer::{api, config, metrics};
use wavesexchange_log::{error, info};

fn main() -> Result<(), Error> {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let result = rt.block_on(tokio_main());
    rt.shutdown_timeout(std::time::Duration::from_millis(1));
    result
}

async fn tokio_main() -> Result<(), Error> {
    metrics::register_metrics();

    let postgres_config = config::load_postgres()?;
    let indexer_config = config::load_indexer()?;
    let server_config = config::load_api()?;
    let sync_config = config::load_sync()?;

    info!(
        "indexing chain {} with the {:?} sink",
        indexer_config.chain_id, indexer_config.module
    );

    let db_pool = pool::new(&postgres_config)?;
    let store = PostgresEventStore::new(db_pool);

    // random channel buffer size
    let (observer, indexed_rx) = ChannelObserver::channel(1000);
    let observers: Vec<Arc<dyn IndexObserver>> = vec![Arc::new(observer)];

    let indexed_handle = tokio::spawn(consume_indexed(indexed_rx));

    let search_timeout = indexer_config.search_timeout;
    let ingest_timeout = indexer_config.ingest_timeout;
    let sink = new_event_sink(store, indexer_config, observers);

    let syncer_handle = match sync_config {
        Some(sync_config) => {
            let client = RpcClient::new(sync_config.rpc_url.clone())?;
            let syncer = Syncer::new(client, sink.clone(), &sync_config, ingest_timeout);
            tokio::spawn(async move {
                if let Err(error) = syncer.run().await {
                    error!("syncer returned an error: {:?}", error);
                }
            })
        }
        None => {
            info!("SYNC__RPC_URL is not set, running search only");
            tokio::spawn(futures::future::pending::<()>())
        }
    };

    let api_handle =
        tokio::spawn(async move { api::start(server_config.port, sink, search_timeout).await });
    let metrics_handle =
        tokio::spawn(async move { api::start_metrics(server_config.metrics_port).await });

    tokio::select! {
        _ = syncer_handle => {}
        _ = indexed_handle => {}
        result = metrics_handle => {
            result?;
        }
        result = api_handle => {
            result?;
        }
    }

    Ok(())
}
