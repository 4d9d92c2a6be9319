//! Pool-based adapter for PostgreSQL.
//!
//! Every operation delegates to sqlx's native `PgPool`, which checks out
//! physical connections on its own. Native rows and transactions are wrapped
//! in the shared contracts without changing their behaviour.

use crate::config::DatabaseConfig;
use crate::db::context::Context;
use crate::db::contract::{Connection, Cursor, Row, Transaction};
use crate::db::dsn;
use crate::db::params::postgres_query;
use crate::db::probe::liveness_probe;
use crate::db::types::RowToRecord;
use crate::error::DbResult;
use crate::models::{QueryParam, Record};
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Connection as _, Executor, PgConnection, PgPool, Postgres};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// PostgreSQL connection backed by a native pool.
#[derive(Debug, Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
    masked_dsn: String,
}

impl PostgresDatabase {
    /// Open a pool from configuration and verify it with the liveness probe.
    pub async fn open(config: &DatabaseConfig) -> DbResult<Self> {
        let dsn = dsn::postgres(config)?;
        Self::connect(&dsn).await
    }

    /// Open a pool from a DSN and verify it with the liveness probe.
    ///
    /// The pool is closed again if the probe fails.
    pub async fn connect(dsn: &str) -> DbResult<Self> {
        let masked_dsn = dsn::masked(dsn);
        info!(dsn = %masked_dsn, "Opening PostgreSQL pool");

        let options = PgConnectOptions::from_str(dsn)?;
        let pool = PgPoolOptions::new().connect_lazy_with(options);
        let db = Self { pool, masked_dsn };

        if let Err(err) = liveness_probe(&db, &db.masked_dsn).await {
            db.pool.close().await;
            return Err(err);
        }

        info!(dsn = %db.masked_dsn, "Connected to PostgreSQL");
        Ok(db)
    }

    pub fn masked_dsn(&self) -> &str {
        &self.masked_dsn
    }

    /// Connections currently held by the pool (idle and in use).
    pub fn pool_size(&self) -> u32 {
        self.pool.size()
    }
}

impl Connection for PostgresDatabase {
    type Cursor<'c> = PgCursor<'c>;
    type Tx = PgTransaction;
    type Raw<'a> = &'a PgPool;

    async fn ping<'c>(&'c self, ctx: &'c Context) -> DbResult<()> {
        ctx.run("ping", async {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await
        })
        .await
    }

    async fn query<'c>(
        &'c self,
        ctx: &'c Context,
        sql: &'c str,
        args: &'c [QueryParam],
    ) -> DbResult<PgCursor<'c>> {
        debug!(sql = %sql, params = args.len(), "Executing query");
        // Always prepared: rows then arrive in binary format whatever the arguments
        let stream = postgres_query(sql, args).fetch(&self.pool);
        PgCursor::open(ctx, stream).await
    }

    async fn query_row<'c>(
        &'c self,
        ctx: &'c Context,
        sql: &'c str,
        args: &'c [QueryParam],
    ) -> Row {
        debug!(sql = %sql, params = args.len(), "Executing single-row query");
        let row = ctx
            .run("query_row", postgres_query(sql, args).fetch_optional(&self.pool))
            .await;
        Row::new(row.and_then(|row| row.as_ref().map(RowToRecord::to_record).transpose()))
    }

    async fn exec<'c>(
        &'c self,
        ctx: &'c Context,
        sql: &'c str,
        args: &'c [QueryParam],
    ) -> DbResult<u64> {
        debug!(sql = %sql, params = args.len(), "Executing statement");
        let result = if args.is_empty() {
            ctx.run("exec", self.pool.execute(sql)).await?
        } else {
            ctx.run("exec", postgres_query(sql, args).execute(&self.pool))
                .await?
        };
        Ok(result.rows_affected())
    }

    async fn begin<'c>(&'c self, ctx: &'c Context) -> DbResult<PgTransaction> {
        let tx = ctx.run("begin", self.pool.begin()).await?;
        let id = Uuid::new_v4();
        debug!(tx_id = %id, "PostgreSQL transaction started");
        Ok(PgTransaction { tx, id })
    }

    async fn close(&self) {
        if self.pool.is_closed() {
            return;
        }
        info!(dsn = %self.masked_dsn, "Closing PostgreSQL pool");
        self.pool.close().await;
    }

    fn raw_connection(&self) -> &PgPool {
        &self.pool
    }
}

/// Forward-only cursor over a PostgreSQL result stream.
pub struct PgCursor<'c> {
    ctx: &'c Context,
    stream: BoxStream<'c, Result<PgRow, sqlx::Error>>,
    pending: Option<PgRow>,
    current: Option<Record>,
    exhausted: bool,
}

impl<'c> PgCursor<'c> {
    /// Pull the first row so statement errors surface before a cursor exists.
    async fn open(
        ctx: &'c Context,
        mut stream: BoxStream<'c, Result<PgRow, sqlx::Error>>,
    ) -> DbResult<Self> {
        let first = ctx.run("query", stream.try_next()).await?;
        Ok(Self {
            ctx,
            stream,
            exhausted: first.is_none(),
            pending: first,
            current: None,
        })
    }
}

impl Cursor for PgCursor<'_> {
    async fn next(&mut self) -> DbResult<bool> {
        let row = match self.pending.take() {
            Some(row) => Some(row),
            None if self.exhausted => None,
            None => {
                self.current = None;
                self.ctx.run("fetch row", self.stream.try_next()).await?
            }
        };

        match row {
            Some(row) => {
                self.current = Some(row.to_record()?);
                Ok(true)
            }
            None => {
                self.exhausted = true;
                self.current = None;
                Ok(false)
            }
        }
    }

    fn record(&self) -> Option<&Record> {
        self.current.as_ref()
    }
}

/// PostgreSQL transaction holding one pooled connection until it ends.
///
/// Dropping it without commit or rollback returns the connection to the pool
/// with a rollback queued.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    id: Uuid,
}

impl PgTransaction {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

impl Transaction for PgTransaction {
    type Cursor<'t> = PgCursor<'t>;

    async fn query<'t>(
        &'t mut self,
        ctx: &'t Context,
        sql: &'t str,
        args: &'t [QueryParam],
    ) -> DbResult<PgCursor<'t>> {
        debug!(tx_id = %self.id, sql = %sql, params = args.len(), "Executing query in transaction");
        let stream = postgres_query(sql, args).fetch(self.conn());
        PgCursor::open(ctx, stream).await
    }

    async fn query_row<'t>(
        &'t mut self,
        ctx: &'t Context,
        sql: &'t str,
        args: &'t [QueryParam],
    ) -> Row {
        debug!(tx_id = %self.id, sql = %sql, params = args.len(), "Executing single-row query in transaction");
        let row = ctx
            .run("query_row", postgres_query(sql, args).fetch_optional(self.conn()))
            .await;
        Row::new(row.and_then(|row| row.as_ref().map(RowToRecord::to_record).transpose()))
    }

    async fn exec<'t>(
        &'t mut self,
        ctx: &'t Context,
        sql: &'t str,
        args: &'t [QueryParam],
    ) -> DbResult<u64> {
        debug!(tx_id = %self.id, sql = %sql, params = args.len(), "Executing statement in transaction");
        let conn = self.conn();
        let result = if args.is_empty() {
            ctx.run("exec", conn.execute(sql)).await?
        } else {
            ctx.run("exec", postgres_query(sql, args).execute(conn)).await?
        };
        Ok(result.rows_affected())
    }

    async fn commit(self, ctx: &Context) -> DbResult<()> {
        let id = self.id;
        ctx.run("commit", self.tx.commit()).await?;
        debug!(tx_id = %id, "PostgreSQL transaction committed");
        Ok(())
    }

    async fn rollback(self, ctx: &Context) -> DbResult<()> {
        let id = self.id;
        ctx.run("rollback", self.tx.rollback()).await?;
        debug!(tx_id = %id, "PostgreSQL transaction rolled back");
        Ok(())
    }
}
