//! Migration-specific error types

use crate::connection::ConnectionError;
use crate::context::CancelReason;
use crate::executor::DbError;
use crate::migration::Direction;
use std::path::PathBuf;

/// Migration-specific errors
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Another runner holds the sentinel row. Callers may retry later or skip.
    #[error("migration locked: another runner is applying migrations")]
    Locked,

    /// A previous run left a dirty row behind
    #[error(
        "database is dirty, manual repair required: inspect the schema, then clear the row \
         with dirty = true in the migrations table"
    )]
    DirtyDatabase,

    /// An applied, non-baseline migration file changed after being applied
    #[error(
        "migration checksum mismatch: version {version} has been modified after being applied \
         (recorded checksum: {recorded}, current checksum: {current})"
    )]
    ChecksumMismatch {
        version: i64,
        recorded: String,
        current: String,
    },

    /// The caller's context fired between statements
    #[error("migration run stopped: {0}")]
    Cancelled(#[from] CancelReason),

    /// The caller's context fired while a migration's transaction was open;
    /// the transaction was rolled back
    #[error("migration {version} ({direction}) interrupted and rolled back: {reason}")]
    Interrupted {
        version: i64,
        direction: Direction,
        reason: CancelReason,
    },

    /// Bookkeeping query or lock statement failed
    #[error("failed to {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: DbError,
    },

    /// A migration body or its bookkeeping failed inside its transaction
    #[error("migration {version} ({direction}) failed: {source}")]
    Execution {
        version: i64,
        direction: Direction,
        #[source]
        source: DbError,
    },

    /// A migration file could not be read
    #[error("failed to read migration file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The migrations root does not exist or is not a directory
    #[error("migrations directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// `rollback` was requested for a step without a down body
    #[error("migration {version} has no down migration to roll back with")]
    RollbackUnavailable { version: i64 },

    #[error("invalid database DSN: {0}")]
    InvalidDsn(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl MigrationError {
    pub(crate) fn database(operation: &'static str, source: DbError) -> Self {
        MigrationError::Database { operation, source }
    }

    pub(crate) fn execution(version: i64, direction: Direction, source: DbError) -> Self {
        MigrationError::Execution {
            version,
            direction,
            source,
        }
    }

    /// Another runner holds the lock; not a failure of this runner.
    pub fn is_locked(&self) -> bool {
        matches!(self, MigrationError::Locked)
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self, MigrationError::DirtyDatabase)
    }

    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, MigrationError::ChecksumMismatch { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            MigrationError::Cancelled(_) | MigrationError::Interrupted { .. }
        )
    }

    /// Version the error is about, when it concerns a single migration.
    pub fn version(&self) -> Option<i64> {
        match self {
            MigrationError::ChecksumMismatch { version, .. }
            | MigrationError::Interrupted { version, .. }
            | MigrationError::Execution { version, .. }
            | MigrationError::RollbackUnavailable { version } => Some(*version),
            _ => None,
        }
    }
}
