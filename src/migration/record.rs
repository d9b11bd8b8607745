//! `MigrationRecord` - Represents rows of the `migrations` bookkeeping table

use crate::executor::{DbError, Row};
use chrono::{DateTime, NaiveDateTime, Utc};

/// A row of the `migrations` bookkeeping table
///
/// One row exists per applied `up` (or baseline) migration. The lock sentinel
/// (version `-1`) shares the table but is never returned as a record.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    /// Migration version (primary key)
    pub version: i64,

    /// Change log recorded when the migration was applied
    pub change_log: Option<String>,

    /// `SHA-256` checksum of the migration file when it was applied
    pub checksum: String,

    /// When the migration was applied (server time, no time zone)
    pub applied_at: NaiveDateTime,

    /// Execution time in seconds
    pub execution_time_s: f64,

    /// Set while the migration is being applied
    pub dirty: bool,
}

impl MigrationRecord {
    /// Create a `MigrationRecord` from a database row
    ///
    /// Expected column order: `version`, `change_log`, `checksum`, `applied_at`,
    /// `execution_time_s`, `dirty`
    ///
    /// # Errors
    ///
    /// Returns `DbError` if a column is missing or has an unexpected type.
    pub fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            version: row.get_i64(0)?,
            change_log: row.get_opt_string(1)?,
            checksum: row.get_string(2)?,
            applied_at: row.get_timestamp(3)?,
            execution_time_s: row.get_f64(4)?,
            dirty: row.get_bool(5)?,
        })
    }

    /// `applied_at` interpreted as UTC
    #[must_use]
    pub fn applied_at_utc(&self) -> DateTime<Utc> {
        self.applied_at.and_utc()
    }
}
