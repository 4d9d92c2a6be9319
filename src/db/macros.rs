//! Backend dispatch macros for reducing code duplication.
//!
//! The registry wraps each adapter in an enum variant per backend. These
//! macros generate the match over those variants so every forwarding method
//! stays one readable expression. They expand at compile time with zero
//! runtime overhead.

/// Macro for generating backend dispatch match arms.
///
/// The first argument names one of the registry enums (`Database`,
/// `DatabaseCursor`, `DatabaseTransaction`). Arms can be spelled out per
/// variant, or a single body can be shared by both.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(Database: self, {
///     Postgres(db) => db.begin(ctx).await.map(DatabaseTransaction::Postgres),
///     Generic(db) => db.begin(ctx).await.map(DatabaseTransaction::Generic),
/// });
///
/// impl_db_dispatch!(Database: self, db => db.exec(ctx, sql, args).await);
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($kind:ident: $value:expr, { $($variant:ident($inner:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::registry::$kind::$variant($inner) => $body,
            )+
        }
    };
    ($kind:ident: $value:expr, $inner:ident => $body:expr) => {
        match $value {
            $crate::db::registry::$kind::Postgres($inner) => $body,
            $crate::db::registry::$kind::Generic($inner) => $body,
        }
    };
}

pub use impl_db_dispatch;

#[cfg(test)]
mod tests {
    use crate::db::registry::RawConnection;

    fn label(raw: RawConnection<'_>) -> &'static str {
        impl_db_dispatch!(RawConnection: raw, {
            Postgres(_pool) => "postgres",
            Generic(_handle) => "generic",
        })
    }

    #[tokio::test]
    async fn test_dispatch_selects_variant() {
        sqlx::any::install_default_drivers();
        let handle = sqlx::any::AnyPoolOptions::new()
            .connect_lazy("sqlite::memory:")
            .unwrap();
        assert_eq!(label(RawConnection::Generic(&handle)), "generic");
    }
}
