//! Execution-result types as they are stored in `tx_results.tx_result`.
//!
//! Field numbers follow the ABCI `TxResult`/`ExecTxResult` protobuf layout, so
//! blobs written by other ABCI-compatible indexers decode as well.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use prost::Message;
use sha2::{Digest, Sha256};

use crate::error::Result;

#[derive(Clone, PartialEq, Message)]
pub struct EventAttribute {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
    #[prost(bool, tag = "3")]
    pub index: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct Event {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(message, repeated, tag = "2")]
    pub attributes: Vec<EventAttribute>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ExecTxResult {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(string, tag = "3")]
    pub log: String,
    #[prost(string, tag = "4")]
    pub info: String,
    #[prost(int64, tag = "5")]
    pub gas_wanted: i64,
    #[prost(int64, tag = "6")]
    pub gas_used: i64,
    #[prost(message, repeated, tag = "7")]
    pub events: Vec<Event>,
    #[prost(string, tag = "8")]
    pub codespace: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TxResult {
    #[prost(int64, tag = "1")]
    pub height: i64,
    #[prost(uint32, tag = "2")]
    pub index: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub tx: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub result: Option<ExecTxResult>,
    #[prost(message, optional, tag = "5")]
    pub time: Option<prost_types::Timestamp>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, attributes: Vec<EventAttribute>) -> Self {
        Event {
            r#type: event_type.into(),
            attributes,
        }
    }
}

impl EventAttribute {
    pub fn indexed(key: impl Into<String>, value: impl Into<String>) -> Self {
        EventAttribute {
            key: key.into(),
            value: value.into(),
            index: true,
        }
    }
}

impl TxResult {
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        Ok(TxResult::decode(blob)?)
    }
}

/// A transaction as returned to search callers.
#[derive(Clone, Debug, PartialEq)]
pub struct TxRecord {
    pub hash: Vec<u8>,
    pub height: i64,
    pub index: u32,
    pub tx_result: ExecTxResult,
    pub tx: Vec<u8>,
    /// Block time, RFC 3339.
    pub timestamp: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

/// Upper-case hex of the SHA-256 of the raw transaction bytes.
pub fn tx_hash(raw_tx: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(raw_tx))
}

pub fn timestamp_from_datetime(time: &DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: time.timestamp(),
        nanos: time.timestamp_subsec_nanos() as i32,
    }
}

pub fn timestamp_to_rfc3339(ts: &prost_types::Timestamp) -> Option<String> {
    Utc.timestamp_opt(ts.seconds, ts.nanos.max(0) as u32)
        .single()
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Secs, true))
}
