//! Configuration handling for the database access layer.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use crate::error::{DbError, DbResult};
use crate::models::BackendKind;
use clap::{Args, Parser};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for the liveness probe run when a connection is constructed.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Settings needed to open the process-wide connection.
///
/// `backend` stays a free-form tag so an unknown value is reported by the
/// registry constructor as a configuration error rather than by the parser.
#[derive(Clone, Args, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database server host
    #[arg(long = "db-host", env = "DB_HOST", default_value = "localhost")]
    pub host: String,

    /// Database server port
    #[arg(long = "db-port", env = "DB_PORT")]
    pub port: u16,

    /// Database user
    #[arg(long = "db-user", env = "DB_USER")]
    pub user: String,

    /// Database password (sensitive - never logged)
    #[arg(long = "db-password", env = "DB_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Database name
    #[arg(long = "db-name", env = "DB_NAME")]
    pub name: String,

    /// Backend tag: "postgres" (native pool) or "mysql" (generic driver)
    #[arg(long = "db-backend", env = "DB_BACKEND", default_value = "postgres")]
    pub backend: String,
}

impl DatabaseConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            name: name.into(),
            backend: backend.into(),
        }
    }

    /// Resolve the backend tag.
    pub fn backend_kind(&self) -> DbResult<BackendKind> {
        self.backend.parse()
    }

    /// Validate the configuration and return a configuration error if invalid.
    ///
    /// Required fields must be non-empty and the port non-zero. Any other
    /// port is accepted.
    pub fn validate(&self) -> DbResult<()> {
        let missing: Vec<&str> = [
            ("host", self.host.is_empty()),
            ("user", self.user.is_empty()),
            ("password", self.password.is_empty()),
            ("name", self.name.is_empty()),
        ]
        .into_iter()
        .filter_map(|(field, empty)| empty.then_some(field))
        .collect();

        if !missing.is_empty() {
            return Err(DbError::configuration(format!(
                "database fields are required: {}",
                missing.join(", ")
            )));
        }
        if self.port == 0 {
            return Err(DbError::configuration("database port must be greater than 0"));
        }
        self.backend_kind()?;
        Ok(())
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"****")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .finish()
    }
}

/// Configuration for the db-access binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-access",
    about = "Open, verify and hold the process-wide database connection",
    version,
    author
)]
pub struct Config {
    #[command(flatten)]
    pub database: DatabaseConfig,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "DB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> DatabaseConfig {
        DatabaseConfig::new("localhost", 5432, "t", "t", "t", "postgres")
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_well_known_ports_are_accepted() {
        let mut config = valid();
        config.port = 1433;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let mut config = valid();
        config.user.clear();
        config.name.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("user, name"));
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = valid();
        config.port = 0;
        assert!(matches!(
            config.validate(),
            Err(DbError::Configuration { .. })
        ));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = valid();
        config.backend = "oracle".to_string();
        assert!(matches!(
            config.validate(),
            Err(DbError::Configuration { .. })
        ));
    }

    #[test]
    fn test_debug_masks_password() {
        let mut config = valid();
        config.password = "s3cret".to_string();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("****"));
    }

    #[test]
    fn test_parse_cli_arguments() {
        let config = Config::try_parse_from([
            "db-access",
            "--db-host",
            "db.internal",
            "--db-port",
            "3306",
            "--db-user",
            "app",
            "--db-password",
            "pw",
            "--db-name",
            "sales",
            "--db-backend",
            "mysql",
        ])
        .unwrap();
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.database.backend_kind().unwrap(), BackendKind::MySql);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_deserialize_from_json() {
        let config: DatabaseConfig = serde_json::from_str(
            r#"{"host":"h","port":5432,"user":"u","password":"p","name":"n","backend":"postgres"}"#,
        )
        .unwrap();
        assert_eq!(config.backend_kind().unwrap(), BackendKind::Postgres);
    }
}
