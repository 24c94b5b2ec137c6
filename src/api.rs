//! HTTP surface: tx search and lookups, plus the metrics server.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};
use wavesexchange_log::{debug, error, info};
use wavesexchange_warp::endpoints::StatsWarpBuilder;

use crate::abci::{Event, TxRecord};
use crate::db::Deadline;
use crate::error::{Error, Result};
use crate::indexer::{EventSinkIndexer, SearchResults};
use crate::metrics::*;

pub struct Config {
    pub port: u16,
    pub metrics_port: u16,
}

#[derive(Debug, Deserialize)]
struct TxSearchParams {
    #[serde(default)]
    query: String,
    limit: Option<u32>,
    hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxParams {
    hash: String,
}

#[derive(Serialize)]
struct TxSearchView {
    txs: Vec<TxView>,
    total_count: u64,
}

#[derive(Serialize)]
struct TxView {
    hash: String,
    height: i64,
    index: u32,
    tx_result: TxResultView,
    tx: String,
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct TxResultView {
    code: u32,
    data: String,
    log: String,
    info: String,
    gas_wanted: String,
    gas_used: String,
    events: Vec<EventView>,
    codespace: String,
}

#[derive(Serialize)]
struct EventView {
    #[serde(rename = "type")]
    event_type: String,
    attributes: Vec<AttributeView>,
}

#[derive(Serialize)]
struct AttributeView {
    key: String,
    value: String,
    index: bool,
}

#[derive(Serialize)]
struct LatestHeightView {
    height: i64,
}

#[derive(Serialize)]
struct ErrorView {
    error: String,
}

impl From<&Event> for EventView {
    fn from(event: &Event) -> Self {
        EventView {
            event_type: event.r#type.clone(),
            attributes: event
                .attributes
                .iter()
                .map(|a| AttributeView {
                    key: a.key.clone(),
                    value: a.value.clone(),
                    index: a.index,
                })
                .collect(),
        }
    }
}

impl From<TxRecord> for TxView {
    fn from(record: TxRecord) -> Self {
        let result = record.tx_result;
        TxView {
            hash: hex::encode_upper(&record.hash),
            height: record.height,
            index: record.index,
            tx_result: TxResultView {
                code: result.code,
                data: STANDARD.encode(&result.data),
                log: result.log,
                info: result.info,
                gas_wanted: result.gas_wanted.to_string(),
                gas_used: result.gas_used.to_string(),
                events: result.events.iter().map(EventView::from).collect(),
                codespace: result.codespace,
            },
            tx: STANDARD.encode(&record.tx),
            timestamp: record.timestamp,
        }
    }
}

impl From<SearchResults> for TxSearchView {
    fn from(results: SearchResults) -> Self {
        TxSearchView {
            total_count: results.total_count,
            txs: results.txs.into_iter().map(TxView::from).collect(),
        }
    }
}

fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::InvalidQuery(_) | Error::InvalidTxHash(_) => StatusCode::BAD_REQUEST,
        Error::TxNotFound(_) | Error::NoBlocksIndexed => StatusCode::NOT_FOUND,
        Error::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        Error::DeadlineExceeded => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    warp::reply::with_status(warp::reply::json(&ErrorView { error: message }), status)
        .into_response()
}

fn to_response<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => warp::reply::json(&body).into_response(),
        Err(err) => {
            let status = status_of(&err);
            if status.is_server_error() {
                error!("request failed: {}", err);
            } else {
                debug!("request rejected: {}", err);
            }
            error_response(status, err.to_string())
        }
    }
}

async fn tx_search(
    params: TxSearchParams,
    sink: Arc<dyn EventSinkIndexer>,
    timeout: Duration,
) -> std::result::Result<Response, Infallible> {
    debug!("tx_search {:?}", params);
    let result = sink
        .tx_search(
            &params.query,
            params.limit,
            params.hash.as_deref(),
            &Deadline::after(timeout),
        )
        .await
        .map(TxSearchView::from);

    Ok(to_response(result))
}

async fn tx_by_hash(
    params: TxParams,
    sink: Arc<dyn EventSinkIndexer>,
    timeout: Duration,
) -> std::result::Result<Response, Infallible> {
    let result = sink
        .get_by_hash(&params.hash, &Deadline::after(timeout))
        .await
        .map(TxView::from);

    Ok(to_response(result))
}

async fn latest_height(
    sink: Arc<dyn EventSinkIndexer>,
) -> std::result::Result<Response, Infallible> {
    let result = sink
        .get_latest_height()
        .await
        .map(|height| LatestHeightView { height });

    Ok(to_response(result))
}

async fn handle_rejection(rejection: Rejection) -> std::result::Result<Response, Infallible> {
    let response = if rejection.is_not_found() {
        error_response(StatusCode::NOT_FOUND, "not found".to_owned())
    } else if let Some(err) = rejection.find::<warp::reject::InvalidQuery>() {
        error_response(StatusCode::BAD_REQUEST, err.to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed".to_owned(),
        )
    } else {
        error!("unhandled rejection: {:?}", rejection);
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".to_owned(),
        )
    };

    Ok(response)
}

pub fn routes(
    sink: Arc<dyn EventSinkIndexer>,
    search_timeout: Duration,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_sink = warp::any().map(move || sink.clone());
    let with_timeout = warp::any().map(move || search_timeout);

    let search_route = warp::path!("tx_search")
        .and(warp::get())
        .and(warp::query::<TxSearchParams>())
        .and(with_sink.clone())
        .and(with_timeout.clone())
        .and_then(tx_search);

    let tx_route = warp::path!("tx")
        .and(warp::get())
        .and(warp::query::<TxParams>())
        .and(with_sink.clone())
        .and(with_timeout)
        .and_then(tx_by_hash);

    let height_route = warp::path!("latest_height")
        .and(warp::get())
        .and(with_sink)
        .and_then(latest_height);

    search_route
        .or(tx_route)
        .or(height_route)
        .recover(handle_rejection)
}

pub async fn start(port: u16, sink: Arc<dyn EventSinkIndexer>, search_timeout: Duration) {
    info!("Starting web server at 0.0.0.0:{}", port);
    warp::serve(routes(sink, search_timeout))
        .run(([0, 0, 0, 0], port))
        .await;
}

pub async fn start_metrics(port: u16) {
    info!("Starting metrics server at 0.0.0.0:{}", port);
    StatsWarpBuilder::no_main_instance()
        .add_metric(INDEXED_BLOCKS.clone())
        .add_metric(INDEXED_TXS.clone())
        .add_metric(DUPLICATE_TXS.clone())
        .add_metric(DROPPED_ATTRIBUTES.clone())
        .add_metric(SEARCH_REQUESTS.clone())
        .add_metric(STREAMED_TXS.clone())
        .add_metric(LAST_INDEXED_HEIGHT.clone())
        .run(port)
        .await;
}
