pub type Result<T> = std::result::Result<T, Error>;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ConfigLoadError: {0}")]
    ConfigLoadError(#[from] envy::Error),
    #[error("InvalidConfig: {0}")]
    InvalidConfig(String),
    #[error("JoinError: {0}")]
    JoinError(#[from] tokio::task::JoinError),
    #[error("PgPoolCreateError: {0}")]
    PgPoolCreateError(#[from] crate::db::pool::PgPoolCreateError),
    #[error("PgPoolRuntimeError: {0}")]
    PgPoolRuntimeError(#[from] crate::db::pool::PgPoolRuntimeError),
    #[error("PgPoolSyncCallError: {0}")]
    PgPoolSyncCallError(#[from] crate::db::pool::PgPoolSyncCallError),
    #[error("DbError: {0}")]
    DbError(#[from] diesel::result::Error),
    #[error("ProtobufDecodeError: {0}")]
    ProtobufDecodeError(#[from] prost::DecodeError),
    #[error("ProtobufEncodeError: {0}")]
    ProtobufEncodeError(#[from] prost::EncodeError),
    #[error("HexDecodeError: {0}")]
    HexDecodeError(#[from] hex::FromHexError),
    #[error("Base64DecodeError: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),
    #[error("SerdeJsonError: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("ReqwestError: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("RpcError: {0}")]
    RpcError(String),
    #[error("BlockNotIndexed: no block at height {height} for chain {chain_id}")]
    BlockNotIndexed { height: i64, chain_id: String },
    #[error("TxIndexingError at height {height}, index {index}: {source}")]
    TxIndexing {
        height: i64,
        index: u32,
        #[source]
        source: Box<Error>,
    },
    #[error("InvalidQuery: {0}")]
    InvalidQuery(String),
    #[error("InvalidTxHash: {0}")]
    InvalidTxHash(String),
    #[error("TxNotFound: {0}")]
    TxNotFound(String),
    #[error("NoBlocksIndexed")]
    NoBlocksIndexed,
    #[error("{0} is not supported via the postgres event sink")]
    Unsupported(&'static str),
    #[error("DeadlineExceeded")]
    DeadlineExceeded,
    #[error("TxIndexOutOfRange: {0}")]
    TxIndexOutOfRange(u32),
    #[error("ObserverError: {0}")]
    ObserverError(String),
}

impl Error {
    pub fn tx_indexing(height: i64, index: u32, source: Error) -> Self {
        Error::TxIndexing {
            height,
            index,
            source: Box::new(source),
        }
    }
}
