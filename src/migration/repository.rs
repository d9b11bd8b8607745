//! Bookkeeping repository: the persisted `migrations` table
//!
//! The table stores one row per applied migration:
//! - Version (primary key)
//! - Change log
//! - Checksum (SHA-256 hash of the migration file)
//! - Applied timestamp
//! - Execution time in seconds
//! - Dirty flag, set while a migration is in flight

use crate::dialect::Dialect;
use crate::executor::{DbError, Executor};
use crate::migration::lock::LOCK_VERSION;
use crate::migration::{MigrationRecord, BASELINE_VERSION};
use std::collections::BTreeMap;

/// Name of the bookkeeping table
pub const MIGRATIONS_TABLE: &str = "migrations";

/// `CREATE TABLE IF NOT EXISTS` statement for the bookkeeping table
pub fn create_table_sql(dialect: &dyn Dialect) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version BIGINT PRIMARY KEY,
    change_log TEXT,
    checksum VARCHAR(64) NOT NULL,
    applied_at TIMESTAMP NOT NULL,
    execution_time_s DOUBLE PRECISION NOT NULL,
    dirty {} NOT NULL
)",
        dialect.bool_type()
    )
}

/// Create the `migrations` table if it doesn't exist
///
/// Safe to call on every startup. Two runners creating the table at the same
/// moment can make the loser's `IF NOT EXISTS` fail with a unique violation;
/// the table exists either way, so that is not an error.
pub fn ensure_table(executor: &dyn Executor, dialect: &dyn Dialect) -> Result<(), DbError> {
    match executor.execute(&create_table_sql(dialect), &[]) {
        Ok(_) => Ok(()),
        Err(e) if e.has_code(dialect.unique_violation_code()) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Returns `true` if any row is marked dirty
pub fn is_dirty(executor: &dyn Executor) -> Result<bool, DbError> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {MIGRATIONS_TABLE} WHERE dirty = true)");
    executor.query_one(&sql, &[])?.get_bool(0)
}

/// Applied `version → checksum` pairs, the lock sentinel excluded
///
/// A table created before checksums were tracked has no `checksum` column;
/// that is reported as "nothing applied yet" so such a schema upgrades without
/// manual intervention. Any other failure propagates.
pub fn get_applied(executor: &dyn Executor, dialect: &dyn Dialect) -> Result<BTreeMap<i64, String>, DbError> {
    let sql = format!("SELECT version, checksum FROM {MIGRATIONS_TABLE} WHERE version > {LOCK_VERSION}");

    let rows = match executor.query_all(&sql, &[]) {
        Ok(rows) => rows,
        Err(e) if e.has_code(dialect.undefined_column_code()) => {
            log::warn!("{MIGRATIONS_TABLE} table has no checksum column, treating it as empty");
            return Ok(BTreeMap::new());
        }
        Err(e) => return Err(e),
    };

    rows.iter()
        .map(|row| Ok((row.get_i64(0)?, row.get_string(1)?)))
        .collect()
}

/// Returns `true` if any migration past the baseline has been recorded
pub fn has_migration_beyond_baseline(executor: &dyn Executor) -> Result<bool, DbError> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {MIGRATIONS_TABLE} WHERE version > {BASELINE_VERSION})");
    executor.query_one(&sql, &[])?.get_bool(0)
}

/// All migration records in version order, the lock sentinel excluded
///
/// Falls back to an empty list on a pre-checksum table, like [`get_applied`].
pub fn list_records(executor: &dyn Executor, dialect: &dyn Dialect) -> Result<Vec<MigrationRecord>, DbError> {
    let sql = format!(
        "SELECT version, change_log, checksum, applied_at, execution_time_s, dirty \
         FROM {MIGRATIONS_TABLE} WHERE version > {LOCK_VERSION} ORDER BY version ASC"
    );

    match executor.query_all(&sql, &[]) {
        Ok(rows) => rows.iter().map(MigrationRecord::from_row).collect(),
        Err(e) if e.has_code(dialect.undefined_column_code()) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
