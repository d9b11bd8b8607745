//! The parsed migration file.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The reserved version of the baseline snapshot.
///
/// A baseline seeds a brand-new database only and is tolerant of later edits.
pub const BASELINE_VERSION: i64 = 0;

/// What a migration file is for, taken from its `.<direction>.sql` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Versioned, applied exactly once
    Up,
    /// Parsed and checksummed, never run by `up`
    Down,
    /// Stateless, runs before every versioned migration on each run
    Holding,
    /// Stateless, runs after every versioned migration on each run
    Final,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Holding => "holding",
            Direction::Final => "final",
        }
    }

    /// Tie-break for migrations sharing a version: holding, up, final, then the rest.
    pub fn priority(&self) -> u8 {
        match self {
            Direction::Holding => 0,
            Direction::Up => 1,
            Direction::Final => 2,
            Direction::Down => 3,
        }
    }

    /// Stateless directions carry no bookkeeping row.
    pub fn is_stateless(&self) -> bool {
        matches!(self, Direction::Holding | Direction::Final)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "holding" => Ok(Direction::Holding),
            "final" => Ok(Direction::Final),
            other => Err(format!("unknown migration direction '{other}'")),
        }
    }
}

/// A migration derived from one file on every run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Leading digit run of the file name
    pub version: i64,

    /// Name between the version and the direction suffix
    pub name: String,

    pub direction: Direction,

    /// Non-blank, non-comment lines of the file, newline-terminated
    pub sql: String,

    /// `SHA-256` hex digest of the raw file content
    pub checksum: String,

    /// Comment lines with their `--` / `//` prefix stripped
    pub change_log: String,

    /// Where the file was found, relative to the source root
    pub path: PathBuf,
}

impl Migration {
    pub fn is_baseline(&self) -> bool {
        self.version == BASELINE_VERSION
    }

    /// File name as found on disk, for messages
    pub fn file_name(&self) -> String {
        match self.path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_string(),
            None => format!("{}_{}.{}.sql", self.version, self.name, self.direction),
        }
    }
}
