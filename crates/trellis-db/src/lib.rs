//! Database layer for the Trellis platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. The peer directory and the authorization
//! tables used by federation are created here.
//!
//! Migrations are compiled into the binary via `include_str!`, so the schema
//! always ships with the code that depends on it.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
