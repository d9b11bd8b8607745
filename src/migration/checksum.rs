//! Checksum calculation for migration files

use crate::migration::MigrationError;
use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of raw migration file content
///
/// The digest covers the whole file, comments and blank lines included, so
/// any edit is detected.
///
/// # Returns
///
/// Returns the lowercase hexadecimal SHA-256 hash of `content`
pub fn calculate_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let hash = hasher.finalize();

    format!("{:x}", hash)
}

/// Validate a recorded checksum against the current file's checksum
///
/// # Errors
///
/// Returns `MigrationError::ChecksumMismatch` naming the version and both digests.
pub fn validate_checksum(version: i64, recorded: &str, current: &str) -> Result<(), MigrationError> {
    if recorded == current {
        Ok(())
    } else {
        Err(MigrationError::ChecksumMismatch {
            version,
            recorded: recorded.to_string(),
            current: current.to_string(),
        })
    }
}
