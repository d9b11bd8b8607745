//! # sqlshift
//!
//! Versioned SQL migrations for PostgreSQL on the `may` coroutine runtime.
//!
//! Migration files named `<version>_<name>.<up|down|holding|final>.sql` are
//! applied exactly once, in order, under a lock row in the `migrations` table.
//! See [`migration::Migrator`] for the protocol.

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod context;
pub mod dialect;
pub mod executor;
pub mod migration;
pub mod transaction;

#[cfg(test)]
mod test_helpers;
#[cfg(feature = "tracing")]
mod tracing_spans;

pub use config::MigrateConfig;
pub use connection::{connect, ConnectionError};
pub use context::{CancelHandle, CancelHook, CancelReason, Context, Watch};
pub use dialect::{Dialect, MySql, Postgres};
pub use executor::{DbError, Executor, PgExecutor, Row, SqlValue};
pub use migration::{MigrationError, Migrator};
