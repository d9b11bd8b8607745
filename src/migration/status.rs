//! Migration status tracking

use crate::migration::migrator::{decide, Decision};
use crate::migration::{Direction, Migration, MigrationRecord};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Snapshot of the source compared with the bookkeeping table
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStatus {
    /// Applied migrations (from database), in version order
    pub applied: Vec<MigrationRecord>,

    /// `up` migrations the next run would apply
    pub pending: Vec<PendingMigration>,

    /// Applied migrations whose file changed since (baseline excluded)
    pub drifted: Vec<DriftedMigration>,

    /// A dirty row exists; the next run will refuse to proceed
    pub dirty: bool,

    /// Some runner currently holds the lock
    pub locked: bool,

    /// The baseline file exists but will not run on this database
    pub baseline_skipped: bool,
}

/// Represents a pending migration (not yet applied)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMigration {
    pub version: i64,
    pub name: String,
    /// Path relative to the source root
    pub path: PathBuf,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftedMigration {
    pub version: i64,
    pub recorded: String,
    pub current: String,
}

impl MigrationStatus {
    /// Classify every `up` migration the way a run would
    pub(crate) fn build(
        migrations: &[Migration],
        applied: Vec<MigrationRecord>,
        dirty: bool,
        locked: bool,
        beyond_baseline: bool,
    ) -> Self {
        let checksums: BTreeMap<i64, String> = applied
            .iter()
            .map(|record| (record.version, record.checksum.clone()))
            .collect();

        let mut pending = Vec::new();
        let mut drifted = Vec::new();
        let mut baseline_skipped = false;

        for migration in migrations.iter().filter(|m| m.direction == Direction::Up) {
            match decide(migration, &checksums, beyond_baseline) {
                Decision::Apply => pending.push(PendingMigration {
                    version: migration.version,
                    name: migration.name.clone(),
                    path: migration.path.clone(),
                    checksum: migration.checksum.clone(),
                }),
                Decision::SkipBaseline => baseline_skipped = !checksums.contains_key(&migration.version),
                Decision::SkipApplied => {}
                Decision::Drifted { recorded } => drifted.push(DriftedMigration {
                    version: migration.version,
                    recorded,
                    current: migration.checksum.clone(),
                }),
            }
        }

        Self {
            applied,
            pending,
            drifted,
            dirty,
            locked,
            baseline_skipped,
        }
    }

    /// Check if all migrations are applied and nothing blocks a run
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty() && self.drifted.is_empty() && !self.dirty
    }

    /// Get the latest applied migration version
    #[must_use]
    pub fn latest_applied_version(&self) -> Option<i64> {
        self.applied.iter().map(|m| m.version).max()
    }

    /// Get the next pending migration version
    #[must_use]
    pub fn next_pending_version(&self) -> Option<i64> {
        self.pending.first().map(|m| m.version)
    }
}
