use deadpool_diesel::postgres::{Connection, InteractError, Manager, Pool, Runtime};

use crate::{config::PostgresConfig, error::Error};

pub use deadpool::managed::BuildError;

pub type PgPool = Pool;
pub type PooledPgConnection = Connection;
pub type PgPoolCreateError = BuildError<deadpool_diesel::Error>;
pub type PgPoolRuntimeError = deadpool::managed::PoolError<deadpool_diesel::Error>;

pub fn new(config: &PostgresConfig) -> Result<PgPool, Error> {
    from_url(config.connection_url(), config.pool_size as usize)
}

pub fn from_url(db_url: impl Into<String>, max_size: usize) -> Result<PgPool, Error> {
    let manager = Manager::new(db_url.into(), Runtime::Tokio1);

    let pool = Pool::builder(manager).max_size(max_size).build()?;

    Ok(pool)
}

#[derive(Debug)]
pub struct PgPoolSyncCallError(std::sync::Mutex<InteractError>);

impl From<InteractError> for PgPoolSyncCallError {
    fn from(err: InteractError) -> Self {
        PgPoolSyncCallError(std::sync::Mutex::new(err))
    }
}

impl std::fmt::Display for PgPoolSyncCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.lock() {
            Ok(err) => write!(f, "{}", err),
            Err(_) => write!(f, "interact error (poisoned)"),
        }
    }
}

impl std::error::Error for PgPoolSyncCallError {}

impl From<InteractError> for crate::Error {
    fn from(err: InteractError) -> Self {
        crate::Error::PgPoolSyncCallError(err.into())
    }
}
