//! Database access layer.
//!
//! This library hides PostgreSQL and MySQL behind one set of connection,
//! transaction and cursor contracts, and keeps the active connection in a
//! process-wide registry.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, DatabaseConfig};
pub use db::{Connection, Context, Cursor, Database, Row, Transaction};
pub use error::{DbError, DbResult};
pub use models::{BackendKind, QueryParam, Record};
