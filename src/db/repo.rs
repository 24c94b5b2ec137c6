use std::time::Duration;

use async_trait::async_trait;
use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Numeric, Text, Timestamptz};
use wavesexchange_log::{error, timer};

use super::pool::{PgPool, PooledPgConnection};
use super::{
    Deadline, EventStore, EventStoreOperations, InsertOutcome, NewAttribute, NewBlock, NewEvent,
    NewTxResult, StoredTxResult,
};
use crate::error::Result;
use crate::query::compiler::{BindValue, CompiledQuery};
use crate::schema::{attributes, blocks, events, tx_results};

/// Event store backed by Postgres.
///
/// Can be cloned freely, no need to wrap in `Arc`.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<PooledPgConnection> {
        let conn = self.pool.get().await?;
        Ok(conn)
    }
}

/// Runs `f` inside a database transaction.
///
/// On failure the transaction is rolled back and the error returned by `f` is
/// propagated; a failed rollback is only logged.
fn run_in_transaction<R, F>(conn: &mut PgConnection, deadline: &Deadline, f: F) -> Result<R>
where
    F: FnOnce(&mut PgConnection) -> Result<R>,
{
    AnsiTransactionManager::begin_transaction(conn)?;

    let result: Result<R> = (|| {
        if let Some(remaining) = deadline.remaining() {
            conn.set_statement_timeout(remaining)?;
        }
        let value = f(conn)?;
        deadline.check()?;
        Ok(value)
    })();

    match result {
        Ok(value) => {
            AnsiTransactionManager::commit_transaction(conn)?;
            Ok(value)
        }
        Err(err) => {
            error!("transaction rolled back: {}", err);
            if let Err(rollback_err) = AnsiTransactionManager::rollback_transaction(conn) {
                error!("rollback failed: {}", rollback_err);
            }
            Err(err)
        }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    type Operations = PgConnection;

    async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut PgConnection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.get_conn().await?;
        conn.interact(|conn| f(conn)).await?
    }

    async fn transaction<F, R>(&self, deadline: &Deadline, f: F) -> Result<R>
    where
        F: FnOnce(&mut PgConnection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        deadline.check()?;
        let deadline = deadline.clone();
        let conn = self.get_conn().await?;
        conn.interact(move |conn| run_in_transaction(conn, &deadline, f))
            .await?
    }
}

impl EventStoreOperations for PgConnection {
    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<()> {
        timer!("set_statement_timeout()", verbose);

        // 0 would disable the timeout altogether
        let millis = timeout.as_millis().clamp(1, i32::MAX as u128);
        diesel::sql_query(format!("SET LOCAL statement_timeout = {}", millis)).execute(self)?;

        Ok(())
    }

    fn insert_block(&mut self, block: &NewBlock) -> Result<InsertOutcome> {
        timer!("insert_block()", verbose);

        let rowid = diesel::insert_into(blocks::table)
            .values(block)
            .on_conflict_do_nothing()
            .returning(blocks::rowid)
            .get_result::<i64>(self)
            .optional()?;

        Ok(InsertOutcome::from_returning(rowid))
    }

    fn find_block_id(&mut self, height: i64, chain_id: &str) -> Result<Option<i64>> {
        timer!("find_block_id()", verbose);

        Ok(blocks::table
            .select(blocks::rowid)
            .filter(blocks::height.eq(height))
            .filter(blocks::chain_id.eq(chain_id))
            .first(self)
            .optional()?)
    }

    fn insert_tx_result(&mut self, tx_result: &NewTxResult) -> Result<InsertOutcome> {
        timer!("insert_tx_result()", verbose);

        let rowid = diesel::insert_into(tx_results::table)
            .values(tx_result)
            .on_conflict_do_nothing()
            .returning(tx_results::rowid)
            .get_result::<i64>(self)
            .optional()?;

        Ok(InsertOutcome::from_returning(rowid))
    }

    fn insert_event(&mut self, event: &NewEvent) -> Result<i64> {
        timer!("insert_event()", verbose);

        Ok(diesel::insert_into(events::table)
            .values(event)
            .returning(events::rowid)
            .get_result(self)?)
    }

    fn insert_attribute(&mut self, attribute: &NewAttribute) -> Result<()> {
        timer!("insert_attribute()", verbose);

        // savepoint, so a failed insert does not poison the outer transaction
        self.transaction(|conn| {
            diesel::insert_into(attributes::table)
                .values(attribute)
                .on_conflict_do_nothing()
                .execute(conn)
                .map(|_| ())
        })?;

        Ok(())
    }

    fn latest_block_height(&mut self) -> Result<Option<i64>> {
        timer!("latest_block_height()", verbose);

        Ok(blocks::table
            .select(blocks::height)
            .order(blocks::height.desc())
            .first(self)
            .optional()?)
    }

    fn tx_result_by_hash(&mut self, tx_hash: &str) -> Result<Option<StoredTxResult>> {
        timer!("tx_result_by_hash()", verbose);

        Ok(tx_results::table
            .select((
                tx_results::rowid,
                tx_results::height,
                tx_results::created_at,
                tx_results::tx_hash,
                tx_results::tx_result,
            ))
            .filter(tx_results::tx_hash.eq(tx_hash))
            .order(tx_results::rowid.desc())
            .first(self)
            .optional()?)
    }

    fn search_tx_results(&mut self, query: &CompiledQuery) -> Result<Vec<StoredTxResult>> {
        timer!("search_tx_results()", verbose);

        let statement = query.to_sql();
        let mut sql = diesel::sql_query(statement.text).into_boxed::<Pg>();
        for bind in statement.binds {
            sql = match bind {
                BindValue::BigInt(v) => sql.bind::<BigInt, _>(v),
                BindValue::Text(v) => sql.bind::<Text, _>(v),
                BindValue::Numeric(v) => sql.bind::<Numeric, _>(v),
                BindValue::Timestamp(v) => sql.bind::<Timestamptz, _>(v),
            };
        }

        Ok(sql.load::<StoredTxResult>(self)?)
    }
}
