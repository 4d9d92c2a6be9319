//! Data models shared by every backend adapter.

pub mod connection;
pub mod query;

pub use connection::BackendKind;
pub use query::{QueryParam, Record};
