//! Migration sources: where migration files come from
//!
//! A [`Source`] discovers migration files, parses them and returns them in
//! execution order: ascending version, then holding, up, final, down for files
//! sharing a version.

use crate::migration::parser::parse_migration;
use crate::migration::{Migration, MigrationError};
use std::fs;
use std::path::{Path, PathBuf};

/// Anything that can produce the ordered list of migrations
pub trait Source {
    /// # Errors
    ///
    /// Returns an error if a migration file cannot be read.
    fn migrations(&self) -> Result<Vec<Migration>, MigrationError>;
}

impl<S: Source + ?Sized> Source for &S {
    fn migrations(&self) -> Result<Vec<Migration>, MigrationError> {
        (**self).migrations()
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn migrations(&self) -> Result<Vec<Migration>, MigrationError> {
        (**self).migrations()
    }
}

/// Sort migrations into execution order
///
/// The sort is stable, so files with the same version and direction keep
/// their discovery order.
pub fn sort_migrations(migrations: &mut [Migration]) {
    migrations.sort_by_key(|m| (m.version, m.direction.priority()));
}

/// Migration files under a directory tree
///
/// Every file below `root` is considered, at any depth. Files whose names are
/// not migration file names (README, fixtures, ...) are skipped.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Source for DirectorySource {
    /// # Errors
    ///
    /// Returns errors if:
    /// - The directory doesn't exist or isn't a directory
    /// - A directory or migration file can't be read
    fn migrations(&self) -> Result<Vec<Migration>, MigrationError> {
        if !self.root.is_dir() {
            return Err(MigrationError::SourceNotFound(self.root.clone()));
        }

        let mut files = Vec::new();
        collect_files(&self.root, &mut files)?;
        // read_dir order is platform dependent
        files.sort();

        let mut migrations = Vec::new();
        for path in files {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if crate::migration::parser::parse_file_name(file_name).is_none() {
                continue;
            }

            let raw = fs::read(&path).map_err(|source| MigrationError::Io {
                path: path.clone(),
                source,
            })?;
            let relative = path.strip_prefix(&self.root).unwrap_or(path.as_path());
            if let Some(migration) = parse_migration(relative, &raw) {
                migrations.push(migration);
            }
        }

        sort_migrations(&mut migrations);
        Ok(migrations)
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), MigrationError> {
    let io_error = |source: std::io::Error| MigrationError::Io {
        path: dir.to_path_buf(),
        source,
    };

    for entry in fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        let path = entry.path();
        // file_type() does not follow links: a linked directory is never walked twice
        if entry.file_type().map_err(io_error)?.is_dir() {
            collect_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

/// Migration files held in memory
///
/// Useful for shipping migrations inside the binary:
///
/// ```rust
/// use sqlshift::migration::{Source, StaticSource};
///
/// let source = StaticSource::new([
///     ("migrations/1_users.up.sql", "CREATE TABLE users (id BIGINT PRIMARY KEY);"),
///     ("migrations/README.md", "not a migration"),
/// ]);
/// assert_eq!(source.migrations().unwrap().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl StaticSource {
    pub fn new<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<PathBuf>,
        C: AsRef<[u8]>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(path, content)| (path.into(), content.as_ref().to_vec()))
                .collect(),
        }
    }

    /// Add or replace a file
    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl AsRef<[u8]>) {
        let path = path.into();
        let content = content.as_ref().to_vec();
        match self.files.iter_mut().find(|(existing, _)| *existing == path) {
            Some(entry) => entry.1 = content,
            None => self.files.push((path, content)),
        }
    }
}

impl Source for StaticSource {
    fn migrations(&self) -> Result<Vec<Migration>, MigrationError> {
        let mut files: Vec<&(PathBuf, Vec<u8>)> = self.files.iter().collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut migrations: Vec<Migration> = files
            .into_iter()
            .filter_map(|(path, raw)| parse_migration(path, raw))
            .collect();
        sort_migrations(&mut migrations);
        Ok(migrations)
    }
}
