//! SQL text that varies by database engine.
//!
//! A `Dialect` only produces text; it holds no state and runs no queries.
//! Supporting another engine means adding one implementation of this trait,
//! the migrator itself does not change.

mod mysql;
mod postgres;

pub use mysql::MySql;
pub use postgres::Postgres;

use crate::migration::lock::LOCK_VERSION;
use crate::migration::repository::MIGRATIONS_TABLE;

/// Engine-specific SQL fragments used by the bookkeeping and lock code.
///
/// Only the first four methods are engine specific by nature; the statement
/// builders have defaults composed from them.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parameter marker for the 1-based `ordinal` (`$1` or `?`).
    fn placeholder(&self, ordinal: usize) -> String;

    /// Current-timestamp expression.
    fn now(&self) -> &'static str;

    /// Column type used for booleans.
    fn bool_type(&self) -> &'static str;

    /// SQLSTATE of a primary-key / unique violation.
    fn unique_violation_code(&self) -> &'static str;

    /// SQLSTATE of a reference to a column that does not exist.
    fn undefined_column_code(&self) -> &'static str;

    /// SQLSTATE of a reference to a table that does not exist.
    fn undefined_table_code(&self) -> &'static str;

    /// Binds `(version, change_log, checksum)`; the row starts out dirty.
    fn insert_migration_sql(&self) -> String {
        format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, change_log, checksum, applied_at, execution_time_s, dirty) \
             VALUES ({}, {}, {}, {}, 0, true)",
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3),
            self.now(),
        )
    }

    /// Binds `(change_log, execution_time_s, version)` and clears the dirty flag.
    fn update_migration_sql(&self) -> String {
        format!(
            "UPDATE {MIGRATIONS_TABLE} SET dirty = false, change_log = {}, execution_time_s = {} WHERE version = {}",
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3),
        )
    }

    /// Inserts the sentinel row; a unique violation means the lock is taken.
    fn lock_sql(&self) -> String {
        format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, change_log, checksum, applied_at, execution_time_s, dirty) \
             VALUES ({LOCK_VERSION}, 'locked', 'lock', {}, 0, false)",
            self.now(),
        )
    }

    fn unlock_sql(&self) -> String {
        format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = {LOCK_VERSION}")
    }

    /// Statement bounding each following statement of the current transaction
    /// to `millis`. `None` when the engine has no such setting.
    fn statement_timeout_sql(&self, _millis: u64) -> Option<String> {
        None
    }
}

/// Resolve a dialect from its configured name.
pub fn dialect_by_name(name: &str) -> Option<Box<dyn Dialect>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => Some(Box::new(Postgres)),
        "mysql" | "mariadb" => Some(Box::new(MySql)),
        _ => None,
    }
}
