//! Connection-related data models.
//!
//! This module defines the backend tag that selects an adapter at startup.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// PostgreSQL through its native connection pool.
    Postgres,
    /// MySQL (includes MariaDB) through the generic SQL driver.
    MySql,
}

impl BackendKind {
    /// All tags accepted by [`BackendKind::from_str`].
    pub const TAGS: [&'static str; 2] = ["postgres", "mysql"];

    /// Configuration tag for this backend.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }

    /// Get the display name for this backend.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
        }
    }

    /// True when the adapter owns a native pool rather than a generic handle.
    pub fn is_pooled(&self) -> bool {
        matches!(self, Self::Postgres)
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::MySql => 3306,
        }
    }
}

impl FromStr for BackendKind {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            other => Err(DbError::configuration(format!(
                "unrecognized database backend '{}'; valid options are {:?}",
                other,
                Self::TAGS
            ))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
