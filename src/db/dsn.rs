//! Data source name construction.
//!
//! DSNs are built with the `url` crate so credentials containing reserved
//! characters are percent-encoded. They carry the password and must only be
//! logged through [`masked`].

use crate::config::DatabaseConfig;
use crate::error::{DbError, DbResult};
use url::Url;

/// PostgreSQL DSN. TLS is disabled by default.
pub fn postgres(config: &DatabaseConfig) -> DbResult<String> {
    build("postgres", config, &[("sslmode", "disable")])
}

/// MySQL DSN for the generic driver. Encryption is disabled by default for
/// interoperability with servers that do not offer TLS.
pub fn mysql(config: &DatabaseConfig) -> DbResult<String> {
    build("mysql", config, &[("ssl-mode", "disabled")])
}

fn build(scheme: &str, config: &DatabaseConfig, options: &[(&str, &str)]) -> DbResult<String> {
    let invalid = |what: &str| DbError::configuration(format!("invalid database {}", what));

    let mut url = Url::parse(&format!("{}://localhost", scheme)).map_err(|_| invalid("scheme"))?;
    url.set_host(Some(&config.host))
        .map_err(|e| DbError::configuration(format!("invalid database host: {}", e)))?;
    url.set_port(Some(config.port)).map_err(|_| invalid("port"))?;
    url.set_username(&config.user).map_err(|_| invalid("user"))?;
    url.set_password(Some(&config.password))
        .map_err(|_| invalid("password"))?;
    url.path_segments_mut()
        .map_err(|_| invalid("name"))?
        .push(&config.name);
    url.query_pairs_mut().extend_pairs(options);

    Ok(url.to_string())
}

/// Display-safe version of a DSN (password masked).
pub fn masked(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) if url.password().is_some() => {
            // set_password only fails for cannot-be-a-base URLs, which have no password
            let _ = url.set_password(Some("****"));
            url.to_string()
        }
        Ok(url) => url.to_string(),
        Err(_) => "<invalid dsn>".to_string(),
    }
}
