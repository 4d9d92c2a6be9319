//! Process-wide database registry.
//!
//! Startup opens exactly one backend from validated configuration and stores
//! it here. The slot is written once; afterwards it is only read, so lookups
//! need no locking.

use crate::config::DatabaseConfig;
use crate::db::context::Context;
use crate::db::contract::{Connection, Cursor, Row, Transaction};
use crate::db::generic::{AnyCursor, AnyTransaction, GenericDatabase};
use crate::db::postgres::{PgCursor, PgTransaction, PostgresDatabase};
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, QueryParam, Record};
use sqlx::{AnyPool, PgPool};
use std::sync::OnceLock;
use tracing::{info, warn};
use uuid::Uuid;

static DATABASE: OnceLock<Database> = OnceLock::new();

/// The active backend, selected by the configured backend tag.
#[derive(Debug, Clone)]
pub enum Database {
    Postgres(PostgresDatabase),
    Generic(GenericDatabase),
}

impl Database {
    /// Validate `config` and open the backend its tag names.
    ///
    /// Nothing is opened when validation fails.
    pub async fn open(config: &DatabaseConfig) -> DbResult<Self> {
        config.validate()?;
        let backend = config.backend_kind()?;
        info!(backend = %backend, host = %config.host, port = config.port, "Opening database");

        match backend {
            BackendKind::Postgres => PostgresDatabase::open(config).await.map(Self::Postgres),
            BackendKind::MySql => GenericDatabase::open(config).await.map(Self::Generic),
        }
    }

    /// Backend kind, if the generic handle was opened for a configured backend.
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            Database::Postgres(_) => Some(BackendKind::Postgres),
            Database::Generic(db) => db.driver().parse().ok(),
        }
    }

    /// Driver name for logging (e.g. "postgres", "mysql", "sqlite").
    pub fn driver_name(&self) -> &str {
        match self {
            Database::Postgres(_) => BackendKind::Postgres.tag(),
            Database::Generic(db) => db.driver(),
        }
    }

    pub fn masked_dsn(&self) -> &str {
        impl_db_dispatch!(Database: self, db => db.masked_dsn())
    }
}

impl Connection for Database {
    type Cursor<'c> = DatabaseCursor<'c>;
    type Tx = DatabaseTransaction;
    type Raw<'a> = RawConnection<'a>;

    async fn ping<'c>(&'c self, ctx: &'c Context) -> DbResult<()> {
        impl_db_dispatch!(Database: self, db => db.ping(ctx).await)
    }

    async fn query<'c>(
        &'c self,
        ctx: &'c Context,
        sql: &'c str,
        args: &'c [QueryParam],
    ) -> DbResult<DatabaseCursor<'c>> {
        impl_db_dispatch!(Database: self, {
            Postgres(db) => db.query(ctx, sql, args).await.map(DatabaseCursor::Postgres),
            Generic(db) => db.query(ctx, sql, args).await.map(DatabaseCursor::Generic),
        })
    }

    async fn query_row<'c>(
        &'c self,
        ctx: &'c Context,
        sql: &'c str,
        args: &'c [QueryParam],
    ) -> Row {
        impl_db_dispatch!(Database: self, db => db.query_row(ctx, sql, args).await)
    }

    async fn exec<'c>(
        &'c self,
        ctx: &'c Context,
        sql: &'c str,
        args: &'c [QueryParam],
    ) -> DbResult<u64> {
        impl_db_dispatch!(Database: self, db => db.exec(ctx, sql, args).await)
    }

    async fn begin<'c>(&'c self, ctx: &'c Context) -> DbResult<DatabaseTransaction> {
        impl_db_dispatch!(Database: self, {
            Postgres(db) => db.begin(ctx).await.map(DatabaseTransaction::Postgres),
            Generic(db) => db.begin(ctx).await.map(DatabaseTransaction::Generic),
        })
    }

    async fn close(&self) {
        impl_db_dispatch!(Database: self, db => db.close().await)
    }

    fn raw_connection(&self) -> RawConnection<'_> {
        impl_db_dispatch!(Database: self, {
            Postgres(db) => RawConnection::Postgres(db.raw_connection()),
            Generic(db) => RawConnection::Generic(db.raw_connection()),
        })
    }
}

/// Cursor returned by [`Database`].
pub enum DatabaseCursor<'c> {
    Postgres(PgCursor<'c>),
    Generic(AnyCursor<'c>),
}

impl Cursor for DatabaseCursor<'_> {
    async fn next(&mut self) -> DbResult<bool> {
        impl_db_dispatch!(DatabaseCursor: self, cursor => cursor.next().await)
    }

    fn record(&self) -> Option<&Record> {
        impl_db_dispatch!(DatabaseCursor: self, cursor => cursor.record())
    }
}

/// Transaction returned by [`Database`].
pub enum DatabaseTransaction {
    Postgres(PgTransaction),
    Generic(AnyTransaction),
}

impl DatabaseTransaction {
    pub fn id(&self) -> Uuid {
        impl_db_dispatch!(DatabaseTransaction: self, tx => tx.id())
    }
}

impl Transaction for DatabaseTransaction {
    type Cursor<'t> = DatabaseCursor<'t>;

    async fn query<'t>(
        &'t mut self,
        ctx: &'t Context,
        sql: &'t str,
        args: &'t [QueryParam],
    ) -> DbResult<DatabaseCursor<'t>> {
        impl_db_dispatch!(DatabaseTransaction: self, {
            Postgres(tx) => tx.query(ctx, sql, args).await.map(DatabaseCursor::Postgres),
            Generic(tx) => tx.query(ctx, sql, args).await.map(DatabaseCursor::Generic),
        })
    }

    async fn query_row<'t>(
        &'t mut self,
        ctx: &'t Context,
        sql: &'t str,
        args: &'t [QueryParam],
    ) -> Row {
        impl_db_dispatch!(DatabaseTransaction: self, tx => tx.query_row(ctx, sql, args).await)
    }

    async fn exec<'t>(
        &'t mut self,
        ctx: &'t Context,
        sql: &'t str,
        args: &'t [QueryParam],
    ) -> DbResult<u64> {
        impl_db_dispatch!(DatabaseTransaction: self, tx => tx.exec(ctx, sql, args).await)
    }

    async fn commit(self, ctx: &Context) -> DbResult<()> {
        impl_db_dispatch!(DatabaseTransaction: self, tx => tx.commit(ctx).await)
    }

    async fn rollback(self, ctx: &Context) -> DbResult<()> {
        impl_db_dispatch!(DatabaseTransaction: self, tx => tx.rollback(ctx).await)
    }
}

/// Native driver object behind a [`Database`].
#[derive(Debug, Clone, Copy)]
pub enum RawConnection<'a> {
    Postgres(&'a PgPool),
    Generic(&'a AnyPool),
}

impl<'a> RawConnection<'a> {
    pub fn as_postgres(self) -> Option<&'a PgPool> {
        match self {
            RawConnection::Postgres(pool) => Some(pool),
            RawConnection::Generic(_) => None,
        }
    }

    pub fn as_generic(self) -> Option<&'a AnyPool> {
        match self {
            RawConnection::Generic(handle) => Some(handle),
            RawConnection::Postgres(_) => None,
        }
    }
}

/// Open the configured backend and register it.
///
/// On failure the registry stays unset.
pub async fn init(config: &DatabaseConfig) -> DbResult<&'static Database> {
    let db = Database::open(config).await?;
    set_database(db).await
}

/// Register an already opened database.
///
/// The slot can only be filled once. A second database is closed and
/// rejected.
pub async fn set_database(db: Database) -> DbResult<&'static Database> {
    if let Err(rejected) = DATABASE.set(db) {
        warn!(dsn = %rejected.masked_dsn(), "Database already registered, closing the new one");
        rejected.close().await;
        return Err(DbError::configuration("a database is already registered"));
    }

    let db = DATABASE
        .get()
        .ok_or_else(|| DbError::internal("database registry is empty after registration"))?;
    info!(driver = %db.driver_name(), dsn = %db.masked_dsn(), "Database registered");
    Ok(db)
}

/// The registered database, if startup has completed.
pub fn get_database() -> Option<&'static Database> {
    DATABASE.get()
}

/// The registered database, or a configuration error before startup.
pub fn database() -> DbResult<&'static Database> {
    get_database().ok_or_else(|| DbError::configuration("no database has been registered"))
}

/// Close the registered database, if any.
///
/// The slot keeps the closed database; operations on it fail afterwards.
pub async fn shutdown() {
    if let Some(db) = DATABASE.get() {
        info!(driver = %db.driver_name(), "Shutting down database");
        db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_rejects_unknown_backend() {
        let config = DatabaseConfig::new("localhost", 1521, "t", "t", "t", "oracle");
        let err = Database::open(&config).await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_open_rejects_incomplete_config() {
        let config = DatabaseConfig::new("", 5432, "t", "t", "t", "postgres");
        let err = Database::open(&config).await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_generic_backend_reporting() {
        let db = Database::Generic(GenericDatabase::connect("sqlite::memory:").await.unwrap());
        assert_eq!(db.driver_name(), "sqlite");
        assert_eq!(db.backend(), None);
        assert!(db.raw_connection().as_generic().is_some());
        assert!(db.raw_connection().as_postgres().is_none());
        db.close().await;
    }
}
