//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Backend-neutral connection, transaction and cursor contracts
//! - Pool-based PostgreSQL adapter
//! - Handle-based adapter over the generic driver
//! - Process-wide registry of the active connection
//! - Parameter binding and row decoding
//! - Deadlines and cancellation via `Context`

pub mod context;
pub mod contract;
pub mod dsn;
pub mod generic;
#[macro_use]
pub mod macros;
pub mod params;
pub mod postgres;
mod probe;
pub mod registry;
pub mod types;

pub use context::{CancelHandle, Context};
pub use contract::{Connection, Cursor, ROLLBACK_TIMEOUT, Row, Transaction, run_in_transaction};
pub use generic::{AnyCursor, AnyTransaction, GenericDatabase};
pub use postgres::{PgCursor, PgTransaction, PostgresDatabase};
pub use registry::{
    Database, DatabaseCursor, DatabaseTransaction, RawConnection, get_database, set_database,
};
