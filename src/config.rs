use crate::error::Error;
use crate::indexer::{IndexerConfig, Module};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::time::Duration;

fn default_pg_port() -> u16 {
    5432
}

fn default_pool_size() -> u32 {
    4
}

fn default_module() -> Module {
    Module::Tx
}

fn default_window_heights() -> i64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_ingest_timeout() -> u64 {
    30
}

fn default_search_timeout() -> u64 {
    10
}

fn default_api_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_start_height() -> i64 {
    1
}

fn default_poll_delay() -> u64 {
    1000
}

#[derive(Clone, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl PostgresConfig {
    /// Credentials are percent-encoded, so passwords may contain `@`, `/` or `:`.
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            utf8_percent_encode(&self.user, NON_ALPHANUMERIC),
            utf8_percent_encode(&self.password, NON_ALPHANUMERIC),
            self.host,
            self.port,
            self.database
        )
    }
}

#[derive(Deserialize)]
struct FlatIndexerConfig {
    pub chain_id: String,
    #[serde(default = "default_module")]
    pub module: Module,
    #[serde(default = "default_window_heights")]
    pub default_window_heights: i64,
    #[serde(default = "default_true")]
    pub index_block_events: bool,
    #[serde(default = "default_ingest_timeout")]
    pub ingest_timeout_secs: u64,
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
}

#[derive(Deserialize)]
struct FlatApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Deserialize)]
struct FlatSyncConfig {
    pub rpc_url: String,
    #[serde(default = "default_start_height")]
    pub start_height: i64,
    #[serde(default = "default_poll_delay")]
    pub poll_delay_ms: u64,
}

pub fn load_postgres() -> Result<PostgresConfig, Error> {
    let config = envy::prefixed("POSTGRES__").from_env::<PostgresConfig>()?;

    for (name, value) in [
        ("POSTGRES__HOST", &config.host),
        ("POSTGRES__DATABASE", &config.database),
        ("POSTGRES__USER", &config.user),
    ] {
        if value.trim().is_empty() {
            return Err(Error::InvalidConfig(format!("{} must not be empty", name)));
        }
    }

    Ok(config)
}

pub fn load_indexer() -> Result<IndexerConfig, Error> {
    let flat_config = envy::prefixed("INDEXER__").from_env::<FlatIndexerConfig>()?;

    if flat_config.chain_id.trim().is_empty() {
        return Err(Error::InvalidConfig(
            "INDEXER__CHAIN_ID must not be empty".to_owned(),
        ));
    }

    Ok(IndexerConfig {
        chain_id: flat_config.chain_id,
        module: flat_config.module,
        default_window_heights: flat_config.default_window_heights.max(0),
        index_block_events: flat_config.index_block_events,
        ingest_timeout: Duration::from_secs(flat_config.ingest_timeout_secs),
        search_timeout: Duration::from_secs(flat_config.search_timeout_secs),
    })
}

pub fn load_api() -> Result<crate::api::Config, Error> {
    let flat_config = envy::prefixed("API__").from_env::<FlatApiConfig>()?;

    Ok(crate::api::Config {
        port: flat_config.port,
        metrics_port: flat_config.metrics_port,
    })
}

/// Syncer is optional: returns `None` unless `SYNC__RPC_URL` is set.
pub fn load_sync() -> Result<Option<crate::sync::Config>, Error> {
    if std::env::var("SYNC__RPC_URL").is_err() {
        return Ok(None);
    }

    let flat_config = envy::prefixed("SYNC__").from_env::<FlatSyncConfig>()?;

    Ok(Some(crate::sync::Config {
        rpc_url: flat_config.rpc_url.trim_end_matches('/').to_owned(),
        start_height: flat_config.start_height.max(1),
        poll_delay: Duration::from_millis(flat_config.poll_delay_ms),
    }))
}
