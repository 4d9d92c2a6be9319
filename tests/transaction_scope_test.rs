//! Tests for the scoped transaction helper and cursor release.
//!
//! An in-memory backend counts commits, rollbacks and open cursors so the
//! scope discipline can be checked without a server.

use db_access::db::{Connection, Context, Cursor, Row, Transaction, run_in_transaction};
use db_access::{DbError, DbResult, QueryParam, Record};
use futures_util::FutureExt;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    begun: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    open_cursors: AtomicUsize,
}

impl Counters {
    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
struct MemoryDb {
    counters: Arc<Counters>,
    rows: i64,
    fail_rollback: bool,
}

impl MemoryDb {
    fn with_rows(rows: i64) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    fn cursor(&self) -> MemoryCursor {
        self.counters.open_cursors.fetch_add(1, Ordering::SeqCst);
        MemoryCursor {
            counters: self.counters.clone(),
            total: self.rows,
            position: 0,
            current: None,
        }
    }

    fn commits(&self) -> usize {
        Counters::get(&self.counters.commits)
    }

    fn rollbacks(&self) -> usize {
        Counters::get(&self.counters.rollbacks)
    }

    fn open_cursors(&self) -> usize {
        Counters::get(&self.counters.open_cursors)
    }
}

fn single(value: i64) -> Row {
    Row::new(Ok(Some(Record::new(vec!["n".to_string()], vec![json!(value)]))))
}

impl Connection for MemoryDb {
    type Cursor<'c> = MemoryCursor;
    type Tx = MemoryTx;
    type Raw<'a> = &'a Counters;

    async fn ping<'c>(&'c self, ctx: &'c Context) -> DbResult<()> {
        ctx.check("ping")
    }

    async fn query<'c>(
        &'c self,
        ctx: &'c Context,
        _sql: &'c str,
        _args: &'c [QueryParam],
    ) -> DbResult<MemoryCursor> {
        ctx.check("query")?;
        Ok(self.cursor())
    }

    async fn query_row<'c>(
        &'c self,
        _ctx: &'c Context,
        _sql: &'c str,
        _args: &'c [QueryParam],
    ) -> Row {
        single(self.rows)
    }

    async fn exec<'c>(
        &'c self,
        ctx: &'c Context,
        _sql: &'c str,
        _args: &'c [QueryParam],
    ) -> DbResult<u64> {
        ctx.check("exec")?;
        Ok(1)
    }

    async fn begin<'c>(&'c self, ctx: &'c Context) -> DbResult<MemoryTx> {
        ctx.check("begin")?;
        self.counters.begun.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTx {
            db: self.clone(),
            finished: false,
        })
    }

    async fn close(&self) {}

    fn raw_connection(&self) -> &Counters {
        &self.counters
    }
}

struct MemoryCursor {
    counters: Arc<Counters>,
    total: i64,
    position: i64,
    current: Option<Record>,
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.counters.open_cursors.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Cursor for MemoryCursor {
    async fn next(&mut self) -> DbResult<bool> {
        if self.position >= self.total {
            self.current = None;
            return Ok(false);
        }
        self.position += 1;
        self.current = Some(Record::new(
            vec!["n".to_string()],
            vec![json!(self.position)],
        ));
        Ok(true)
    }

    fn record(&self) -> Option<&Record> {
        self.current.as_ref()
    }
}

struct MemoryTx {
    db: MemoryDb,
    finished: bool,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        // Unfinished transactions are rolled back when released
        if !self.finished {
            self.db.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Transaction for MemoryTx {
    type Cursor<'t> = MemoryCursor;

    async fn query<'t>(
        &'t mut self,
        ctx: &'t Context,
        _sql: &'t str,
        _args: &'t [QueryParam],
    ) -> DbResult<MemoryCursor> {
        ctx.check("query")?;
        Ok(self.db.cursor())
    }

    async fn query_row<'t>(
        &'t mut self,
        _ctx: &'t Context,
        _sql: &'t str,
        _args: &'t [QueryParam],
    ) -> Row {
        single(self.db.rows)
    }

    async fn exec<'t>(
        &'t mut self,
        ctx: &'t Context,
        _sql: &'t str,
        _args: &'t [QueryParam],
    ) -> DbResult<u64> {
        ctx.check("exec")?;
        Ok(1)
    }

    async fn commit(mut self, ctx: &Context) -> DbResult<()> {
        ctx.check("commit")?;
        self.finished = true;
        self.db.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(mut self, _ctx: &Context) -> DbResult<()> {
        self.finished = true;
        if self.db.fail_rollback {
            return Err(DbError::transaction("rollback refused"));
        }
        self.db.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn sum_rows(tx: &mut MemoryTx, ctx: &Context) -> DbResult<i64> {
    let mut cursor = tx.query(ctx, "SELECT n FROM numbers", &[]).await?;
    let mut sum = 0;
    while cursor.next().await? {
        sum += cursor.scan::<i64>()?;
    }
    Ok(sum)
}

async fn first_row(tx: &mut MemoryTx, ctx: &Context) -> DbResult<i64> {
    let mut cursor = tx.query(ctx, "SELECT n FROM numbers", &[]).await?;
    if cursor.next().await? {
        return cursor.scan();
    }
    Err(DbError::NoRows)
}

async fn write_then_fail(tx: &mut MemoryTx, ctx: &Context) -> DbResult<()> {
    tx.exec(ctx, "UPDATE numbers SET n = n + 1", &[]).await?;
    Err(DbError::database("constraint violated", Some("23505".to_string())))
}

async fn write_then_panic(tx: &mut MemoryTx, ctx: &Context) -> DbResult<()> {
    tx.exec(ctx, "UPDATE numbers SET n = n + 1", &[]).await?;
    panic!("unit of work failed");
}

async fn write_then_hang(tx: &mut MemoryTx, ctx: &Context) -> DbResult<()> {
    tx.exec(ctx, "UPDATE numbers SET n = n + 1", &[]).await?;
    std::future::pending().await
}

#[tokio::test]
async fn test_commits_only_on_success() {
    let db = MemoryDb::with_rows(4);
    let ctx = Context::background();

    let sum = run_in_transaction(&db, &ctx, |tx, ctx| sum_rows(tx, ctx).boxed())
        .await
        .unwrap();

    assert_eq!(sum, 10);
    assert_eq!(db.commits(), 1);
    assert_eq!(db.rollbacks(), 0);
    assert_eq!(db.open_cursors(), 0);
}

#[tokio::test]
async fn test_rolls_back_on_error() {
    let db = MemoryDb::default();
    let ctx = Context::background();

    let err = run_in_transaction(&db, &ctx, |tx, ctx| write_then_fail(tx, ctx).boxed())
        .await
        .unwrap_err();

    assert_eq!(err.sql_state(), Some("23505"));
    assert_eq!(db.commits(), 0);
    assert_eq!(db.rollbacks(), 1);
}

#[tokio::test]
async fn test_early_return_releases_cursor() {
    let db = MemoryDb::with_rows(100);
    let ctx = Context::background();

    let first = run_in_transaction(&db, &ctx, |tx, ctx| first_row(tx, ctx).boxed())
        .await
        .unwrap();

    assert_eq!(first, 1);
    assert_eq!(db.open_cursors(), 0);
    assert_eq!(db.commits(), 1);
}

#[tokio::test]
async fn test_empty_result_is_error_and_rolls_back() {
    let db = MemoryDb::with_rows(0);
    let ctx = Context::background();

    let err = run_in_transaction(&db, &ctx, |tx, ctx| first_row(tx, ctx).boxed())
        .await
        .unwrap_err();

    assert!(err.is_no_rows());
    assert_eq!(db.open_cursors(), 0);
    assert_eq!(db.commits(), 0);
    assert_eq!(db.rollbacks(), 1);
}

#[tokio::test]
async fn test_panic_rolls_back() {
    let db = MemoryDb::default();
    let task_db = db.clone();

    let joined = tokio::spawn(async move {
        let ctx = Context::background();
        run_in_transaction(&task_db, &ctx, |tx, ctx| write_then_panic(tx, ctx).boxed()).await
    })
    .await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(db.commits(), 0);
    assert_eq!(db.rollbacks(), 1);
}

#[tokio::test]
async fn test_cancelled_context_rolls_back() {
    let db = MemoryDb::default();
    let (ctx, handle) = Context::background().with_cancel();

    let err = run_in_transaction(&db, &ctx, |tx, ctx| {
        async move {
            tx.exec(ctx, "UPDATE numbers SET n = 0", &[]).await?;
            handle.cancel();
            tx.exec(ctx, "UPDATE numbers SET n = 1", &[]).await
        }
        .boxed()
    })
    .await
    .unwrap_err();

    // The cleanup rollback runs on its own context, so it still happens
    assert!(matches!(err, DbError::Cancelled { .. }));
    assert_eq!(db.commits(), 0);
    assert_eq!(db.rollbacks(), 1);
}

#[tokio::test]
async fn test_dropped_future_rolls_back() {
    let db = MemoryDb::default();
    let ctx = Context::background();

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        run_in_transaction(&db, &ctx, |tx, ctx| write_then_hang(tx, ctx).boxed()),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(db.commits(), 0);
    assert_eq!(db.rollbacks(), 1);
}

#[tokio::test]
async fn test_failed_rollback_reports_both_errors() {
    let db = MemoryDb {
        fail_rollback: true,
        ..MemoryDb::default()
    };
    let ctx = Context::background();

    let err = run_in_transaction(&db, &ctx, |tx, ctx| write_then_fail(tx, ctx).boxed())
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Transaction { .. }));
    let message = err.to_string();
    assert!(message.contains("constraint violated"));
    assert!(message.contains("rollback refused"));
    assert_eq!(db.commits(), 0);
}

#[tokio::test]
async fn test_begin_failure_skips_work() {
    let db = MemoryDb::default();
    let (ctx, handle) = Context::background().with_cancel();
    handle.cancel();

    let err = run_in_transaction(&db, &ctx, |tx, ctx| write_then_fail(tx, ctx).boxed())
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Cancelled { .. }));
    assert_eq!(Counters::get(&db.raw_connection().begun), 0);
    assert_eq!(db.rollbacks(), 0);
}

#[tokio::test]
async fn test_cursors_released_outside_transactions() {
    let db = MemoryDb::with_rows(3);
    let ctx = Context::background();

    let first = db.query(&ctx, "SELECT n FROM numbers", &[]).await.unwrap();
    let second = db.query(&ctx, "SELECT n FROM numbers", &[]).await.unwrap();
    assert_eq!(db.open_cursors(), 2);

    first.close();
    let records = second.collect_records().await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(db.open_cursors(), 0);

    let n: i64 = db.query_row(&ctx, "SELECT n", &[]).await.scan().unwrap();
    assert_eq!(n, 3);
}
