pub mod abci;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod indexer;
pub mod metrics;
pub mod query;
pub mod schema;
pub mod streaming;
pub mod sync;

pub use error::Error;
