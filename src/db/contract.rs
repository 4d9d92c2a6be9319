//! Backend-neutral contracts for connections, transactions and result sets.
//!
//! Each backend adapter implements these traits independently; application
//! code is written against them and never touches a driver directly.

use crate::db::context::Context;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, Record};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bound on the rollback issued by [`run_in_transaction`] after a failure.
///
/// The caller's context may already be cancelled at that point, so the
/// rollback gets its own deadline.
pub const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Forward-only cursor over a multi-row result.
///
/// Dropping the cursor releases the underlying result stream; [`Cursor::close`]
/// does the same explicitly.
pub trait Cursor: Send {
    /// Advance to the next row. Returns `Ok(false)` once the result is exhausted.
    fn next(&mut self) -> impl Future<Output = DbResult<bool>> + Send;

    /// The row the cursor is positioned on, if any.
    fn record(&self) -> Option<&Record>;

    /// Decode the current row positionally. See [`Record::scan`].
    fn scan<T: DeserializeOwned>(&self) -> DbResult<T> {
        self.current()?.scan()
    }

    /// Decode the current row by column name. See [`Record::decode`].
    fn decode<T: DeserializeOwned>(&self) -> DbResult<T> {
        self.current()?.decode()
    }

    fn current(&self) -> DbResult<&Record> {
        self.record()
            .ok_or_else(|| DbError::decode("cursor is not positioned on a row"))
    }

    /// Release the cursor.
    fn close(self)
    where
        Self: Sized,
    {
        drop(self);
    }

    /// Drain the remaining rows and release the cursor.
    fn collect_records(mut self) -> impl Future<Output = DbResult<Vec<Record>>> + Send
    where
        Self: Sized,
    {
        async move {
            let mut records = Vec::new();
            while self.next().await? {
                records.push(self.current()?.clone());
            }
            self.close();
            Ok(records)
        }
    }
}

/// Result of a single-row query.
///
/// Errors, including "no rows", surface only when the row is decoded.
#[derive(Debug)]
pub struct Row {
    outcome: DbResult<Option<Record>>,
}

impl Row {
    pub fn new(outcome: DbResult<Option<Record>>) -> Self {
        Self { outcome }
    }

    /// Take the row, failing with [`DbError::NoRows`] if nothing matched.
    pub fn into_record(self) -> DbResult<Record> {
        self.outcome?.ok_or(DbError::NoRows)
    }

    /// Decode the row positionally. See [`Record::scan`].
    pub fn scan<T: DeserializeOwned>(self) -> DbResult<T> {
        self.into_record()?.scan()
    }

    /// Decode the row by column name. See [`Record::decode`].
    pub fn decode<T: DeserializeOwned>(self) -> DbResult<T> {
        self.into_record()?.decode()
    }
}

/// A live link to a database engine.
///
/// Implementations are cheap to clone handles onto a shared pool or driver
/// handle and may be used from many tasks at once.
pub trait Connection: Send + Sync {
    type Cursor<'c>: Cursor + 'c
    where
        Self: 'c;
    type Tx: Transaction;
    /// Backend-specific native handle returned by [`Connection::raw_connection`].
    type Raw<'a>
    where
        Self: 'a;

    /// Bounded round trip to the server.
    fn ping<'c>(&'c self, ctx: &'c Context) -> impl Future<Output = DbResult<()>> + Send + 'c;

    /// Run a statement returning zero or more rows.
    ///
    /// Statement errors are reported here, before a cursor is handed out.
    fn query<'c>(
        &'c self,
        ctx: &'c Context,
        sql: &'c str,
        args: &'c [QueryParam],
    ) -> impl Future<Output = DbResult<Self::Cursor<'c>>> + Send + 'c;

    /// Run a statement expected to return at most one row.
    ///
    /// Extra rows are ignored.
    fn query_row<'c>(
        &'c self,
        ctx: &'c Context,
        sql: &'c str,
        args: &'c [QueryParam],
    ) -> impl Future<Output = Row> + Send + 'c;

    /// Run a write or DDL statement and return the number of affected rows.
    fn exec<'c>(
        &'c self,
        ctx: &'c Context,
        sql: &'c str,
        args: &'c [QueryParam],
    ) -> impl Future<Output = DbResult<u64>> + Send + 'c;

    fn begin<'c>(&'c self, ctx: &'c Context) -> impl Future<Output = DbResult<Self::Tx>> + Send + 'c;

    /// Release every resource held by the connection. Safe to call twice.
    fn close(&self) -> impl Future<Output = ()> + Send + '_;

    /// Escape hatch to the native driver object.
    ///
    /// Code using it is tied to one backend.
    fn raw_connection(&self) -> Self::Raw<'_>;
}

/// A unit of work opened by [`Connection::begin`].
///
/// `commit` and `rollback` consume the transaction, so exactly one of them can
/// run. A transaction dropped without either is rolled back by the adapter.
pub trait Transaction: Send {
    type Cursor<'t>: Cursor + 't
    where
        Self: 't;

    fn query<'t>(
        &'t mut self,
        ctx: &'t Context,
        sql: &'t str,
        args: &'t [QueryParam],
    ) -> impl Future<Output = DbResult<Self::Cursor<'t>>> + Send + 't;

    fn query_row<'t>(
        &'t mut self,
        ctx: &'t Context,
        sql: &'t str,
        args: &'t [QueryParam],
    ) -> impl Future<Output = Row> + Send + 't;

    fn exec<'t>(
        &'t mut self,
        ctx: &'t Context,
        sql: &'t str,
        args: &'t [QueryParam],
    ) -> impl Future<Output = DbResult<u64>> + Send + 't;

    fn commit(self, ctx: &Context) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(self, ctx: &Context) -> impl Future<Output = DbResult<()>> + Send;
}

/// Run `work` inside a transaction.
///
/// Commits when `work` returns `Ok` and rolls back when it returns `Err`.
/// If the future is dropped or `work` panics, the transaction is dropped and
/// the adapter rolls it back.
pub async fn run_in_transaction<C, F, R>(conn: &C, ctx: &Context, work: F) -> DbResult<R>
where
    C: Connection,
    F: for<'t> FnOnce(&'t mut C::Tx, &'t Context) -> BoxFuture<'t, DbResult<R>>,
{
    let mut tx = conn.begin(ctx).await?;

    match work(&mut tx, ctx).await {
        Ok(value) => {
            tx.commit(ctx).await?;
            Ok(value)
        }
        Err(err) => {
            let cleanup = Context::with_timeout(ROLLBACK_TIMEOUT);
            match tx.rollback(&cleanup).await {
                Ok(()) => Err(err),
                Err(rollback_err) => {
                    warn!(
                        error = %err,
                        rollback_error = %rollback_err,
                        "Rollback failed after aborted unit of work"
                    );
                    Err(DbError::transaction(format!(
                        "{}; rollback also failed: {}",
                        err, rollback_err
                    )))
                }
            }
        }
    }
}
