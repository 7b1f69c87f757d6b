//! Database connection management.

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Type alias for the database connection pool.
pub type DatabasePool = PgPool;

/// Connect with the default pool size.
pub async fn connect(database_url: &str) -> Result<DatabasePool, sqlx::Error> {
    connect_with_max(database_url, 10).await
}

/// Connect with an explicit maximum connection count.
pub async fn connect_with_max(
    database_url: &str,
    max_connections: u32,
) -> Result<DatabasePool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run pending migrations from the crate's `migrations/` directory.
pub async fn migrate(pool: &DatabasePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
