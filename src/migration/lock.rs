//! Migration table-based locking
//!
//! The bookkeeping table doubles as the lock: the runner that manages to insert
//! the sentinel row (version = -1) holds it. The insert either succeeds or hits
//! the primary key, so acquisition is a single atomic statement with no
//! advisory-lock support required from the engine.

use crate::dialect::Dialect;
use crate::executor::{DbError, Executor};
use crate::migration::repository::MIGRATIONS_TABLE;

/// Reserved version number for the lock row
///
/// Never used by real migrations, whose versions are non-negative.
pub const LOCK_VERSION: i64 = -1;

/// Try to take the lock once, without waiting
///
/// # Returns
///
/// `Ok(true)` if this call inserted the sentinel row, `Ok(false)` if another
/// runner already holds it.
///
/// # Errors
///
/// Any failure other than the dialect's unique-violation code propagates.
pub fn try_lock(executor: &dyn Executor, dialect: &dyn Dialect) -> Result<bool, DbError> {
    match executor.execute(&dialect.lock_sql(), &[]) {
        Ok(_) => Ok(true),
        Err(e) if e.has_code(dialect.unique_violation_code()) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Release the lock by deleting the sentinel row
///
/// Deleting an absent row is not an error.
pub fn unlock(executor: &dyn Executor, dialect: &dyn Dialect) -> Result<(), DbError> {
    executor.execute(&dialect.unlock_sql(), &[])?;
    Ok(())
}

/// Returns `true` while some runner holds the lock
pub fn is_lock_held(executor: &dyn Executor) -> Result<bool, DbError> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {MIGRATIONS_TABLE} WHERE version = {LOCK_VERSION})");
    executor.query_one(&sql, &[])?.get_bool(0)
}

/// Lock guard that releases the lock when dropped
///
/// Release happens on every exit path, errors and panics included. A failed
/// release is logged and otherwise ignored: the sentinel then stays behind and
/// has to be deleted by hand.
pub struct LockGuard<'a> {
    executor: &'a dyn Executor,
    dialect: &'a dyn Dialect,
}

impl<'a> LockGuard<'a> {
    /// Take the lock, or return `None` if another runner holds it
    pub fn acquire(executor: &'a dyn Executor, dialect: &'a dyn Dialect) -> Result<Option<Self>, DbError> {
        if try_lock(executor, dialect)? {
            log::debug!("acquired migration lock");
            Ok(Some(Self { executor, dialect }))
        } else {
            Ok(None)
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        match unlock(self.executor, self.dialect) {
            Ok(()) => log::debug!("released migration lock"),
            Err(e) => log::warn!(
                "failed to release migration lock, delete the row with version = {LOCK_VERSION} \
                 from {MIGRATIONS_TABLE} by hand: {e}"
            ),
        }
    }
}
