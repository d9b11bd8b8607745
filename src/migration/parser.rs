//! Migration file name and content parsing

use crate::migration::checksum::calculate_checksum;
use crate::migration::{Direction, Migration, BASELINE_VERSION};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static FILE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)_(.+)\.(up|down|holding|final)\.sql$").expect("migration file pattern is valid")
});

/// Version, name and direction taken from a migration file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName {
    pub version: i64,
    pub name: String,
    pub direction: Direction,
}

/// Parse a migration file name
///
/// Expected format: `<version>_<name>.<up|down|holding|final>.sql`
///
/// # Example
/// - `3_create_users.up.sql` → version: 3, name: "create_users", direction: up
///
/// # Returns
///
/// `None` for names that do not match; such files are not migrations and are
/// skipped without being reported. A digit run too large for `i64` yields the
/// baseline version.
pub fn parse_file_name(file_name: &str) -> Option<FileName> {
    let caps = FILE_PATTERN.captures(file_name)?;

    let digits = caps.get(1)?.as_str();
    let version = digits.parse::<i64>().unwrap_or_else(|_| {
        log::warn!("migration file {file_name}: version {digits} is out of range, using {BASELINE_VERSION}");
        BASELINE_VERSION
    });
    let name = caps.get(2)?.as_str().to_string();
    let direction = caps.get(3)?.as_str().parse().ok()?;

    Some(FileName {
        version,
        name,
        direction,
    })
}

/// Executable body and change log of a migration file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBody {
    pub sql: String,
    pub change_log: String,
}

/// Split raw file content into its SQL batch and its change log
///
/// Line endings are normalised to `\n` and blank lines dropped. Lines starting
/// with `--` or `//` (after trimming) feed the change log with the prefix
/// stripped; every other line is kept verbatim in the SQL batch.
pub fn parse_content(raw: &[u8]) -> ParsedBody {
    let text = String::from_utf8_lossy(raw).replace("\r\n", "\n");
    let mut body = ParsedBody::default();

    for line in text.split('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(comment) = trimmed.strip_prefix("--").or_else(|| trimmed.strip_prefix("//")) {
            body.change_log.push_str(comment.trim());
            body.change_log.push('\n');
        } else {
            body.sql.push_str(line);
            body.sql.push('\n');
        }
    }

    body
}

/// Build a [`Migration`] from a file's path and raw content
///
/// Returns `None` when the file name is not a migration file name.
pub fn parse_migration(path: &Path, raw: &[u8]) -> Option<Migration> {
    let file_name = path.file_name()?.to_str()?;
    let FileName {
        version,
        name,
        direction,
    } = parse_file_name(file_name)?;
    let ParsedBody { sql, change_log } = parse_content(raw);

    Some(Migration {
        version,
        name,
        direction,
        sql,
        checksum: calculate_checksum(raw),
        change_log,
        path: path.to_path_buf(),
    })
}
