//! Database access: connection pool, row models, repositories.

pub mod connection;
pub mod models;
pub mod repositories;

pub use connection::DatabasePool;
