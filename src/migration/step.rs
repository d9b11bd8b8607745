//! Migration steps: a single versioned change that can be run and rolled back
//!
//! [`Step`] is sealed; the implementations are [`SqlStep`] (files from a
//! [`Source`](crate::migration::Source)) and [`StaticStep`] (SQL compiled into
//! the binary). Steps are invoked explicitly by callers and keep no
//! bookkeeping; [`Migrator::up`](crate::migration::Migrator::up) never rolls
//! anything back.

use crate::executor::Executor;
use crate::migration::{Direction, Migration, MigrationError};
use crate::transaction::Transaction;

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::SqlStep {}
    impl Sealed for super::StaticStep {}
}

pub trait Step: sealed::Sealed {
    fn version(&self) -> i64;

    fn change_log(&self) -> &str;

    /// Run the forward change in one transaction
    fn run(&self, executor: &dyn Executor) -> Result<(), MigrationError>;

    /// Undo the change in one transaction
    ///
    /// # Errors
    ///
    /// [`MigrationError::RollbackUnavailable`] when the step has no down body.
    fn rollback(&self, executor: &dyn Executor) -> Result<(), MigrationError>;
}

fn run_sql(executor: &dyn Executor, version: i64, direction: Direction, sql: &str) -> Result<(), MigrationError> {
    let fail = |e| MigrationError::execution(version, direction, e);

    let tx = Transaction::begin(executor).map_err(fail)?;
    if !sql.trim().is_empty() {
        // Dropping `tx` rolls back
        tx.batch_execute(sql).map_err(fail)?;
    }
    tx.commit().map_err(fail)?;

    log::info!("ran {direction} step for version {version}");
    Ok(())
}

/// An `up` file with its matching `down` file, if any
#[derive(Debug, Clone)]
pub struct SqlStep {
    up: Migration,
    down: Option<Migration>,
}

impl SqlStep {
    pub fn new(up: Migration, down: Option<Migration>) -> Self {
        Self { up, down }
    }

    pub fn up(&self) -> &Migration {
        &self.up
    }

    pub fn down(&self) -> Option<&Migration> {
        self.down.as_ref()
    }
}

impl Step for SqlStep {
    fn version(&self) -> i64 {
        self.up.version
    }

    fn change_log(&self) -> &str {
        &self.up.change_log
    }

    fn run(&self, executor: &dyn Executor) -> Result<(), MigrationError> {
        run_sql(executor, self.up.version, Direction::Up, &self.up.sql)
    }

    fn rollback(&self, executor: &dyn Executor) -> Result<(), MigrationError> {
        let down = self.down.as_ref().ok_or(MigrationError::RollbackUnavailable {
            version: self.up.version,
        })?;
        run_sql(executor, down.version, Direction::Down, &down.sql)
    }
}

/// Pair every `up` migration with the `down` migration of the same version
///
/// Holding and final files are not steps and are left out. The result keeps
/// the input order, which for a [`Source`](crate::migration::Source) is
/// ascending version.
pub fn pair_steps(migrations: Vec<Migration>) -> Vec<SqlStep> {
    let (downs, rest): (Vec<Migration>, Vec<Migration>) =
        migrations.into_iter().partition(|m| m.direction == Direction::Down);

    rest.into_iter()
        .filter(|m| m.direction == Direction::Up)
        .map(|up| {
            let down = downs.iter().find(|d| d.version == up.version).cloned();
            SqlStep::new(up, down)
        })
        .collect()
}

/// A step whose SQL is compiled into the binary
///
/// ```rust
/// use sqlshift::migration::{StaticStep, Step};
///
/// const CREATE_USERS: StaticStep = StaticStep::new(1, "CREATE TABLE users (id BIGINT PRIMARY KEY);")
///     .with_down("DROP TABLE users;")
///     .with_change_log("create users");
///
/// assert_eq!(CREATE_USERS.version(), 1);
/// assert_eq!(CREATE_USERS.change_log(), "create users");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StaticStep {
    version: i64,
    change_log: &'static str,
    up: &'static str,
    down: Option<&'static str>,
}

impl StaticStep {
    pub const fn new(version: i64, up: &'static str) -> Self {
        Self {
            version,
            change_log: "",
            up,
            down: None,
        }
    }

    pub const fn with_down(mut self, down: &'static str) -> Self {
        self.down = Some(down);
        self
    }

    pub const fn with_change_log(mut self, change_log: &'static str) -> Self {
        self.change_log = change_log;
        self
    }
}

impl Step for StaticStep {
    fn version(&self) -> i64 {
        self.version
    }

    fn change_log(&self) -> &str {
        self.change_log
    }

    fn run(&self, executor: &dyn Executor) -> Result<(), MigrationError> {
        run_sql(executor, self.version, Direction::Up, self.up)
    }

    fn rollback(&self, executor: &dyn Executor) -> Result<(), MigrationError> {
        let down = self.down.ok_or(MigrationError::RollbackUnavailable { version: self.version })?;
        run_sql(executor, self.version, Direction::Down, down)
    }
}
