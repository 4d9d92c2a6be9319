//! Integration tests for the process-wide registry.
//!
//! The registry slot is global to the test binary, so the whole lifecycle is
//! exercised in one sequential test.

use db_access::db::registry;
use db_access::db::{Connection, Context, Database, GenericDatabase};
use db_access::{DatabaseConfig, DbError};
use tempfile::NamedTempFile;

async fn sqlite_database(file: &NamedTempFile) -> Database {
    let dsn = format!("sqlite:{}?mode=rwc", file.path().to_str().unwrap());
    Database::Generic(GenericDatabase::connect(&dsn).await.unwrap())
}

#[tokio::test]
async fn test_registry_lifecycle() {
    // Unknown backend tag: configuration error, nothing registered
    let config = DatabaseConfig::new("localhost", 1521, "t", "t", "t", "oracle");
    let err = registry::init(&config).await.unwrap_err();
    assert!(matches!(err, DbError::Configuration { .. }));
    assert!(err.to_string().contains("oracle"));
    assert!(registry::get_database().is_none());
    assert!(registry::database().is_err());

    // Shutdown before registration is a no-op
    registry::shutdown().await;

    // First registration wins
    let first_file = NamedTempFile::new().unwrap();
    let db = registry::set_database(sqlite_database(&first_file).await)
        .await
        .unwrap();
    assert_eq!(db.driver_name(), "sqlite");

    let ctx = Context::background();
    let registered = registry::get_database().unwrap();
    registered
        .exec(&ctx, "CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
        .await
        .unwrap();
    registered
        .exec(&ctx, "INSERT INTO t (id) VALUES (1)", &[])
        .await
        .unwrap();

    // A second registration is rejected and closed; the first stays active
    let second_file = NamedTempFile::new().unwrap();
    let second = sqlite_database(&second_file).await;
    let raw = second.raw_connection().as_generic().unwrap().clone();
    let err = registry::set_database(second).await.unwrap_err();
    assert!(matches!(err, DbError::Configuration { .. }));
    assert!(raw.is_closed());

    let count: i64 = registry::database()
        .unwrap()
        .query_row(&ctx, "SELECT COUNT(*) FROM t", &[])
        .await
        .scan()
        .unwrap();
    assert_eq!(count, 1);

    // Shutdown closes the registered database; the slot stays filled
    registry::shutdown().await;
    assert!(registry::get_database().is_some());
    let err = registry::get_database()
        .unwrap()
        .exec(&ctx, "INSERT INTO t (id) VALUES (2)", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));

    // Shutdown twice is harmless
    registry::shutdown().await;
}
