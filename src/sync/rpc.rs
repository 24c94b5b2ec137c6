//! Minimal CometBFT JSON-RPC client (HTTP GET endpoints).

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use wavesexchange_log::debug;

use crate::abci::{Event, EventAttribute, ExecTxResult};
use crate::error::{Error, Result};
use crate::indexer::TxInput;

#[derive(Deserialize)]
struct Response<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: String,
}

/// Integers are string-encoded in CometBFT responses.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntField {
    Str(String),
    Num(i64),
}

impl IntField {
    fn value(&self) -> Result<i64> {
        match self {
            IntField::Num(n) => Ok(*n),
            IntField::Str(s) if s.is_empty() => Ok(0),
            IntField::Str(s) => s
                .parse()
                .map_err(|_| Error::RpcError(format!("invalid integer {:?}", s))),
        }
    }
}

impl Default for IntField {
    fn default() -> Self {
        IntField::Num(0)
    }
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    latest_block_height: IntField,
}

#[derive(Deserialize)]
struct BlockResult {
    block: RpcBlock,
}

#[derive(Deserialize)]
struct RpcBlock {
    header: RpcHeader,
    data: RpcBlockData,
}

#[derive(Deserialize)]
struct RpcHeader {
    height: IntField,
    time: String,
}

#[derive(Deserialize)]
struct RpcBlockData {
    #[serde(default)]
    txs: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct BlockResultsResult {
    #[serde(default)]
    txs_results: Option<Vec<RpcTxResult>>,
    #[serde(default)]
    begin_block_events: Option<Vec<RpcEvent>>,
    #[serde(default)]
    end_block_events: Option<Vec<RpcEvent>>,
    #[serde(default)]
    finalize_block_events: Option<Vec<RpcEvent>>,
}

#[derive(Deserialize)]
struct RpcTxResult {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    log: String,
    #[serde(default)]
    info: String,
    #[serde(default)]
    gas_wanted: IntField,
    #[serde(default)]
    gas_used: IntField,
    #[serde(default)]
    events: Vec<RpcEvent>,
    #[serde(default)]
    codespace: String,
}

#[derive(Deserialize)]
struct RpcEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    attributes: Vec<RpcAttribute>,
}

#[derive(Deserialize)]
struct RpcAttribute {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    index: bool,
}

impl From<RpcEvent> for Event {
    fn from(event: RpcEvent) -> Self {
        Event {
            r#type: event.event_type,
            attributes: event
                .attributes
                .into_iter()
                .map(|a| EventAttribute {
                    key: a.key,
                    value: a.value.unwrap_or_default(),
                    index: a.index,
                })
                .collect(),
        }
    }
}

impl RpcTxResult {
    fn into_exec_result(self) -> Result<ExecTxResult> {
        let data = match self.data.as_deref() {
            None | Some("") => vec![],
            Some(data) => STANDARD.decode(data)?,
        };

        Ok(ExecTxResult {
            code: self.code,
            data,
            log: self.log,
            info: self.info,
            gas_wanted: self.gas_wanted.value()?,
            gas_used: self.gas_used.value()?,
            events: self.events.into_iter().map(Event::from).collect(),
            codespace: self.codespace,
        })
    }
}

/// Everything needed to index one height.
#[derive(Debug)]
pub struct FetchedBlock {
    pub height: i64,
    pub events: Vec<Event>,
    pub txs: Vec<TxInput>,
}

fn parse_response<T: DeserializeOwned>(body: &str) -> Result<T> {
    let response: Response<T> = serde_json::from_str(body)?;
    match (response.result, response.error) {
        (_, Some(err)) => Err(Error::RpcError(format!("{} {}", err.message, err.data))),
        (Some(result), None) => Ok(result),
        (None, None) => Err(Error::RpcError("empty response".to_owned())),
    }
}

fn assemble_block(block: BlockResult, results: BlockResultsResult) -> Result<FetchedBlock> {
    let height = block.block.header.height.value()?;
    let time = DateTime::parse_from_rfc3339(&block.block.header.time)
        .map_err(|e| Error::RpcError(format!("invalid block time: {}", e)))?
        .with_timezone(&Utc);

    let raw_txs = block.block.data.txs.unwrap_or_default();
    let tx_results = results.txs_results.unwrap_or_default();
    if raw_txs.len() != tx_results.len() {
        return Err(Error::RpcError(format!(
            "block {} has {} txs but {} results",
            height,
            raw_txs.len(),
            tx_results.len()
        )));
    }

    let txs = raw_txs
        .iter()
        .zip(tx_results)
        .enumerate()
        .map(|(index, (raw, result))| {
            Ok(TxInput {
                index: index as u32,
                tx: STANDARD.decode(raw)?,
                result: result.into_exec_result()?,
                time,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let events = [
        results.begin_block_events,
        results.end_block_events,
        results.finalize_block_events,
    ]
    .into_iter()
    .flatten()
    .flatten()
    .map(Event::from)
    .collect();

    Ok(FetchedBlock {
        height,
        events,
        txs,
    })
}

#[derive(Clone)]
pub struct RpcClient {
    base_url: String,
    http_client: Client,
}

impl RpcClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            http_client: ClientBuilder::new()
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(30))
                .build()?,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = reqwest::Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|e| Error::RpcError(format!("invalid url: {}", e)))?;

        let res = self.http_client.get(url.clone()).send().await?;
        let status = res.status();
        let text = res.text().await?;
        debug!("url = {}, status = {}", url, status);

        parse_response(&text)
    }

    pub async fn latest_height(&self) -> Result<i64> {
        let status: StatusResult = self.get("status").await?;
        status.sync_info.latest_block_height.value()
    }

    pub async fn fetch_block(&self, height: i64) -> Result<FetchedBlock> {
        let block_path = format!("block?height={}", height);
        let results_path = format!("block_results?height={}", height);
        let (block, results) = futures::try_join!(
            self.get::<BlockResult>(&block_path),
            self.get::<BlockResultsResult>(&results_path),
        )?;

        assemble_block(block, results)
    }
}
