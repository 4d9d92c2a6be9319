//! Handle-based adapter over sqlx's generic `Any` driver.
//!
//! The adapter opens one driver handle through the generic entry point and
//! relies on it for locking and connection reuse. Configuration opens MySQL;
//! [`GenericDatabase::connect`] accepts any DSN an installed driver understands.

use crate::config::DatabaseConfig;
use crate::db::context::Context;
use crate::db::contract::{Connection, Cursor, Row, Transaction};
use crate::db::dsn;
use crate::db::params::any_query;
use crate::db::probe::liveness_probe;
use crate::db::types::RowToRecord;
use crate::error::DbResult;
use crate::models::{QueryParam, Record};
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyConnection, AnyPool, Connection as _, Executor};
use tracing::{debug, info};
use uuid::Uuid;

/// Connection reached through the generic SQL driver interface.
#[derive(Debug, Clone)]
pub struct GenericDatabase {
    handle: AnyPool,
    driver: String,
    masked_dsn: String,
}

impl GenericDatabase {
    /// Open a MySQL handle from configuration and verify it with the liveness probe.
    pub async fn open(config: &DatabaseConfig) -> DbResult<Self> {
        let dsn = dsn::mysql(config)?;
        Self::connect(&dsn).await
    }

    /// Open a handle for any DSN supported by the generic driver.
    ///
    /// The handle is closed again if the liveness probe fails.
    pub async fn connect(dsn: &str) -> DbResult<Self> {
        sqlx::any::install_default_drivers();

        let masked_dsn = dsn::masked(dsn);
        let driver = dsn
            .split_once(':')
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default();
        info!(dsn = %masked_dsn, driver = %driver, "Opening generic driver handle");

        let handle = AnyPoolOptions::new().connect_lazy(dsn)?;
        let db = Self {
            handle,
            driver,
            masked_dsn,
        };

        if let Err(err) = liveness_probe(&db, &db.masked_dsn).await {
            db.handle.close().await;
            return Err(err);
        }

        info!(dsn = %db.masked_dsn, driver = %db.driver, "Connected through generic driver");
        Ok(db)
    }

    /// DSN scheme the handle was opened with (e.g. "mysql").
    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn masked_dsn(&self) -> &str {
        &self.masked_dsn
    }
}

impl Connection for GenericDatabase {
    type Cursor<'c> = AnyCursor<'c>;
    type Tx = AnyTransaction;
    type Raw<'a> = &'a AnyPool;

    async fn ping<'c>(&'c self, ctx: &'c Context) -> DbResult<()> {
        ctx.run("ping", async {
            let mut conn = self.handle.acquire().await?;
            conn.ping().await
        })
        .await
    }

    async fn query<'c>(
        &'c self,
        ctx: &'c Context,
        sql: &'c str,
        args: &'c [QueryParam],
    ) -> DbResult<AnyCursor<'c>> {
        debug!(sql = %sql, params = args.len(), "Executing query");
        let stream = if args.is_empty() {
            self.handle.fetch(sql)
        } else {
            any_query(sql, args).fetch(&self.handle)
        };
        AnyCursor::open(ctx, stream).await
    }

    async fn query_row<'c>(
        &'c self,
        ctx: &'c Context,
        sql: &'c str,
        args: &'c [QueryParam],
    ) -> Row {
        debug!(sql = %sql, params = args.len(), "Executing single-row query");
        let row = ctx
            .run("query_row", any_query(sql, args).fetch_optional(&self.handle))
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
            ctx.run("exec", self.handle.execute(sql)).await?
        } else {
            ctx.run("exec", any_query(sql, args).execute(&self.handle))
                .await?
        };
        Ok(result.rows_affected())
    }

    async fn begin<'c>(&'c self, ctx: &'c Context) -> DbResult<AnyTransaction> {
        let tx = ctx.run("begin", self.handle.begin()).await?;
        let id = Uuid::new_v4();
        debug!(tx_id = %id, driver = %self.driver, "Transaction started");
        Ok(AnyTransaction { tx, id })
    }

    async fn close(&self) {
        if self.handle.is_closed() {
            return;
        }
        info!(dsn = %self.masked_dsn, "Closing generic driver handle");
        self.handle.close().await;
    }

    fn raw_connection(&self) -> &AnyPool {
        &self.handle
    }
}

/// Forward-only cursor over a generic-driver result stream.
pub struct AnyCursor<'c> {
    ctx: &'c Context,
    stream: BoxStream<'c, Result<AnyRow, sqlx::Error>>,
    pending: Option<AnyRow>,
    current: Option<Record>,
    exhausted: bool,
}

impl<'c> AnyCursor<'c> {
    async fn open(
        ctx: &'c Context,
        mut stream: BoxStream<'c, Result<AnyRow, sqlx::Error>>,
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

impl Cursor for AnyCursor<'_> {
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

/// Transaction on the generic handle. Dropped unfinished, it is rolled back.
pub struct AnyTransaction {
    tx: sqlx::Transaction<'static, Any>,
    id: Uuid,
}

impl AnyTransaction {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn conn(&mut self) -> &mut AnyConnection {
        &mut self.tx
    }
}

impl Transaction for AnyTransaction {
    type Cursor<'t> = AnyCursor<'t>;

    async fn query<'t>(
        &'t mut self,
        ctx: &'t Context,
        sql: &'t str,
        args: &'t [QueryParam],
    ) -> DbResult<AnyCursor<'t>> {
        debug!(tx_id = %self.id, sql = %sql, params = args.len(), "Executing query in transaction");
        let conn = self.conn();
        let stream = if args.is_empty() {
            conn.fetch(sql)
        } else {
            any_query(sql, args).fetch(conn)
        };
        AnyCursor::open(ctx, stream).await
    }

    async fn query_row<'t>(
        &'t mut self,
        ctx: &'t Context,
        sql: &'t str,
        args: &'t [QueryParam],
    ) -> Row {
        debug!(tx_id = %self.id, sql = %sql, params = args.len(), "Executing single-row query in transaction");
        let row = ctx
            .run("query_row", any_query(sql, args).fetch_optional(self.conn()))
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
            ctx.run("exec", any_query(sql, args).execute(conn)).await?
        };
        Ok(result.rows_affected())
    }

    async fn commit(self, ctx: &Context) -> DbResult<()> {
        let id = self.id;
        ctx.run("commit", self.tx.commit()).await?;
        debug!(tx_id = %id, "Transaction committed");
        Ok(())
    }

    async fn rollback(self, ctx: &Context) -> DbResult<()> {
        let id = self.id;
        ctx.run("rollback", self.tx.rollback()).await?;
        debug!(tx_id = %id, "Transaction rolled back");
        Ok(())
    }
}
