//! In-memory database used by the unit tests.
//!
//! `MemoryDatabase` understands exactly the bookkeeping and lock statements the
//! crate issues against the `migrations` table. Every other statement is a
//! "user" statement: it is recorded as an effect once its transaction commits,
//! or fails with a syntax error when it contains `FAIL`.
//!
//! Connections share the table; each connection keeps its own transaction, and
//! a rollback undoes only the row changes that connection made.
//!
//! A statement registered with [`MemoryDatabase::block_until_cancelled`] blocks
//! like a statement waiting on a lock, until the connection's cancel hook fires.

use crate::context::CancelHook;
use crate::executor::{DbError, Executor, Row, SqlValue};
use crate::migration::MigrationRecord;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How long a blocked statement waits for a cancel before giving up
const BLOCK_LIMIT: Duration = Duration::from_secs(5);

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone)]
struct StoredRow {
    change_log: Option<String>,
    checksum: String,
    applied_at: NaiveDateTime,
    execution_time_s: f64,
    dirty: bool,
}

#[derive(Default)]
struct State {
    table: bool,
    legacy: bool,
    rows: BTreeMap<i64, StoredRow>,
    effects: Vec<String>,
    statements: Vec<String>,
    failures: Vec<(String, String)>,
    hooks: Vec<(String, Hook)>,
    blockers: Vec<(String, mpsc::Sender<()>)>,
    cancelled_statements: usize,
}

/// Whether the connection is inside a blocked statement, and whether a cancel arrived
#[derive(Default)]
struct Running {
    blocked: bool,
    cancel_requested: bool,
}

#[derive(Default)]
struct TxState {
    undo: Vec<(i64, Option<StoredRow>)>,
    effects: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

pub struct MemoryConnection {
    state: Arc<Mutex<State>>,
    tx: Mutex<Option<TxState>>,
    running: Arc<(Mutex<Running>, Condvar)>,
}

fn server_error(code: &str, message: impl Into<String>) -> DbError {
    DbError::Server {
        code: code.to_string(),
        message: message.into(),
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn bool_row(value: bool) -> Vec<Row> {
    vec![Row::new(vec![SqlValue::Bool(value)])]
}

fn param_i64(params: &[SqlValue], idx: usize) -> Result<i64, DbError> {
    match params.get(idx) {
        Some(SqlValue::Int(v)) => Ok(*v),
        other => Err(DbError::Conversion(format!("parameter {idx}: expected integer, got {other:?}"))),
    }
}

fn param_f64(params: &[SqlValue], idx: usize) -> Result<f64, DbError> {
    match params.get(idx) {
        Some(SqlValue::Float(v)) => Ok(*v),
        Some(SqlValue::Int(v)) => Ok(*v as f64),
        other => Err(DbError::Conversion(format!("parameter {idx}: expected float, got {other:?}"))),
    }
}

fn param_text(params: &[SqlValue], idx: usize) -> Result<Option<String>, DbError> {
    match params.get(idx) {
        Some(SqlValue::Text(v)) => Ok(Some(v.clone())),
        Some(SqlValue::Null) => Ok(None),
        other => Err(DbError::Conversion(format!("parameter {idx}: expected text, got {other:?}"))),
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            state: Arc::clone(&self.state),
            tx: Mutex::new(None),
            running: Arc::default(),
        }
    }

    /// Committed user statements, in commit order
    pub fn effects(&self) -> Vec<String> {
        self.lock().effects.clone()
    }

    /// Number of committed user statements containing `pattern`
    pub fn effect_count(&self, pattern: &str) -> usize {
        self.lock().effects.iter().filter(|e| e.contains(pattern)).count()
    }

    /// Every statement received by any connection, trimmed
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn table_exists(&self) -> bool {
        self.lock().table
    }

    /// Recorded versions, lock row excluded
    pub fn versions(&self) -> Vec<i64> {
        self.lock().rows.keys().copied().filter(|v| *v >= 0).collect()
    }

    pub fn record(&self, version: i64) -> Option<MigrationRecord> {
        self.lock().rows.get(&version).map(|row| MigrationRecord {
            version,
            change_log: row.change_log.clone(),
            checksum: row.checksum.clone(),
            applied_at: row.applied_at,
            execution_time_s: row.execution_time_s,
            dirty: row.dirty,
        })
    }

    /// Record `version` as cleanly applied, creating the table if needed
    pub fn insert_record(&self, version: i64, checksum: &str) {
        let mut state = self.lock();
        state.table = true;
        state.rows.insert(
            version,
            StoredRow {
                change_log: Some(String::new()),
                checksum: checksum.to_string(),
                applied_at: now(),
                execution_time_s: 0.0,
                dirty: false,
            },
        );
    }

    pub fn mark_dirty(&self, version: i64) {
        if let Some(row) = self.lock().rows.get_mut(&version) {
            row.dirty = true;
        }
    }

    /// Leave a lock row behind, as a crashed runner would
    pub fn insert_lock_row(&self) {
        self.insert_record(-1, "lock");
    }

    pub fn has_lock_row(&self) -> bool {
        self.lock().rows.contains_key(&-1)
    }

    /// Simulate a bookkeeping table created before checksums were tracked
    pub fn use_legacy_schema(&self) {
        let mut state = self.lock();
        state.table = true;
        state.legacy = true;
    }

    /// Fail every statement containing `pattern` with a connection error
    pub fn fail_when(&self, pattern: &str) {
        self.fail_with(pattern, "08006");
    }

    /// Fail every statement containing `pattern` with SQLSTATE `code`
    ///
    /// The most recent rule for a pattern wins.
    pub fn fail_with(&self, pattern: &str, code: &str) {
        self.lock().failures.insert(0, (pattern.to_string(), code.to_string()));
    }

    /// Run `hook` before any statement containing `pattern` is processed
    ///
    /// The hook runs without the database lock held, so it may use other
    /// connections to the same database.
    pub fn on_statement(&self, pattern: &str, hook: impl Fn() + Send + Sync + 'static) {
        self.lock().hooks.push((pattern.to_string(), Arc::new(hook)));
    }

    /// Block every statement containing `pattern` until its connection is cancelled
    ///
    /// The receiver gets a message each time such a statement starts blocking.
    /// A cancelled statement fails with SQLSTATE `57014`, as Postgres reports it.
    pub fn block_until_cancelled(&self, pattern: &str) -> mpsc::Receiver<()> {
        let (started, receiver) = mpsc::channel();
        self.lock().blockers.push((pattern.to_string(), started));
        receiver
    }

    /// Statements aborted by a cancel hook
    pub fn cancelled_statements(&self) -> usize {
        self.lock().cancelled_statements
    }
}

impl MemoryConnection {
    fn run(&self, sql: &str, params: &[SqlValue]) -> Result<(u64, Vec<Row>), DbError> {
        let statement = normalize(sql);

        let hooks: Vec<Hook> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .hooks
                .iter()
                .filter(|(pattern, _)| statement.contains(pattern.as_str()))
                .map(|(_, hook)| Arc::clone(hook))
                .collect()
        };
        for hook in hooks {
            hook();
        }

        let blocker = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state
                .blockers
                .iter()
                .find(|(pattern, _)| statement.contains(pattern.as_str()))
                .map(|(_, started)| started.clone())
        };
        if let Some(started) = blocker {
            return self.block(&statement, &started);
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());

        if let Some((_, code)) = state.failures.iter().find(|(p, _)| statement.contains(p.as_str())) {
            return Err(server_error(code, format!("injected failure while running: {statement}")));
        }
        state.statements.push(sql.trim().to_string());

        match statement.as_str() {
            "BEGIN" => {
                if tx.is_some() {
                    return Err(server_error("25001", "there is already a transaction in progress"));
                }
                *tx = Some(TxState::default());
                return Ok((0, Vec::new()));
            }
            "COMMIT" => {
                if let Some(done) = tx.take() {
                    state.effects.extend(done.effects);
                }
                return Ok((0, Vec::new()));
            }
            "ROLLBACK" => {
                if let Some(done) = tx.take() {
                    for (version, previous) in done.undo.into_iter().rev() {
                        match previous {
                            Some(row) => state.rows.insert(version, row),
                            None => state.rows.remove(&version),
                        };
                    }
                }
                return Ok((0, Vec::new()));
            }
            _ => {}
        }

        if statement.starts_with("SET ") {
            return Ok((0, Vec::new()));
        }
        if statement.starts_with("CREATE TABLE IF NOT EXISTS migrations") {
            state.table = true;
            return Ok((0, Vec::new()));
        }

        if statement.contains(" migrations") && !state.table {
            return Err(server_error("42P01", "relation \"migrations\" does not exist"));
        }

        if statement.starts_with("SELECT EXISTS(SELECT 1 FROM migrations WHERE dirty = true)") {
            return Ok((0, bool_row(state.rows.values().any(|r| r.dirty))));
        }
        if statement.starts_with("SELECT EXISTS(SELECT 1 FROM migrations WHERE version > 0)") {
            return Ok((0, bool_row(state.rows.keys().any(|v| *v > 0))));
        }
        if statement.starts_with("SELECT EXISTS(SELECT 1 FROM migrations WHERE version = -1)") {
            return Ok((0, bool_row(state.rows.contains_key(&-1))));
        }
        if statement.starts_with("SELECT version, checksum FROM migrations") {
            if state.legacy {
                return Err(server_error("42703", "column \"checksum\" does not exist"));
            }
            let rows = state
                .rows
                .iter()
                .filter(|(v, _)| **v > -1)
                .map(|(v, r)| Row::new(vec![SqlValue::Int(*v), SqlValue::Text(r.checksum.clone())]))
                .collect();
            return Ok((0, rows));
        }
        if statement.starts_with("SELECT version, change_log, checksum") {
            if state.legacy {
                return Err(server_error("42703", "column \"checksum\" does not exist"));
            }
            let rows = state
                .rows
                .iter()
                .filter(|(v, _)| **v > -1)
                .map(|(v, r)| {
                    Row::new(vec![
                        SqlValue::Int(*v),
                        r.change_log.clone().map_or(SqlValue::Null, SqlValue::Text),
                        SqlValue::Text(r.checksum.clone()),
                        SqlValue::Timestamp(r.applied_at),
                        SqlValue::Float(r.execution_time_s),
                        SqlValue::Bool(r.dirty),
                    ])
                })
                .collect();
            return Ok((0, rows));
        }

        if statement.starts_with("INSERT INTO migrations") {
            let (version, row) = if statement.contains("VALUES (-1,") {
                (
                    -1,
                    StoredRow {
                        change_log: Some("locked".to_string()),
                        checksum: "lock".to_string(),
                        applied_at: now(),
                        execution_time_s: 0.0,
                        dirty: false,
                    },
                )
            } else {
                (
                    param_i64(params, 0)?,
                    StoredRow {
                        change_log: param_text(params, 1)?,
                        checksum: param_text(params, 2)?.unwrap_or_default(),
                        applied_at: now(),
                        execution_time_s: 0.0,
                        dirty: true,
                    },
                )
            };
            if state.rows.contains_key(&version) {
                return Err(server_error(
                    "23505",
                    format!("duplicate key value violates unique constraint \"migrations_pkey\": version={version}"),
                ));
            }
            state.rows.insert(version, row);
            if let Some(tx) = tx.as_mut() {
                tx.undo.push((version, None));
            }
            return Ok((1, Vec::new()));
        }

        if statement.starts_with("UPDATE migrations SET dirty = false") {
            let change_log = param_text(params, 0)?;
            let elapsed = param_f64(params, 1)?;
            let version = param_i64(params, 2)?;
            let Some(row) = state.rows.get_mut(&version) else {
                return Ok((0, Vec::new()));
            };
            let previous = row.clone();
            row.dirty = false;
            row.change_log = change_log;
            row.execution_time_s = elapsed;
            if let Some(tx) = tx.as_mut() {
                tx.undo.push((version, Some(previous)));
            }
            return Ok((1, Vec::new()));
        }

        if statement.starts_with("DELETE FROM migrations WHERE version = -1") {
            let removed = state.rows.remove(&-1);
            if let (Some(tx), Some(previous)) = (tx.as_mut(), removed.clone()) {
                tx.undo.push((-1, Some(previous)));
            }
            return Ok((u64::from(removed.is_some()), Vec::new()));
        }

        if statement.contains("FAIL") {
            return Err(server_error("42601", format!("syntax error at or near \"FAIL\": {statement}")));
        }
        match tx.as_mut() {
            Some(tx) => tx.effects.push(sql.trim().to_string()),
            None => state.effects.push(sql.trim().to_string()),
        }
        Ok((0, Vec::new()))
    }
}

impl MemoryConnection {
    fn block(&self, statement: &str, started: &mpsc::Sender<()>) -> Result<(u64, Vec<Row>), DbError> {
        let (lock, cvar) = &*self.running;
        let mut running = lock.lock().unwrap_or_else(PoisonError::into_inner);
        running.blocked = true;
        let _ = started.send(());

        let (mut running, wait) = cvar
            .wait_timeout_while(running, BLOCK_LIMIT, |r| !r.cancel_requested)
            .unwrap_or_else(PoisonError::into_inner);
        running.blocked = false;
        running.cancel_requested = false;
        drop(running);

        if wait.timed_out() {
            return Err(DbError::Other(format!("statement was never cancelled: {statement}")));
        }
        self.state.lock().unwrap_or_else(PoisonError::into_inner).cancelled_statements += 1;
        Err(server_error("57014", "canceling statement due to user request"))
    }
}

impl Executor for MemoryConnection {
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        self.run(query, params).map(|(count, _)| count)
    }

    fn batch_execute(&self, sql: &str) -> Result<(), DbError> {
        self.run(sql, &[]).map(|_| ())
    }

    fn query_all(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        self.run(query, params).map(|(_, rows)| rows)
    }

    /// Like a Postgres cancel request, a hook fired while nothing blocks does nothing.
    fn cancel_hook(&self) -> Option<CancelHook> {
        let running = Arc::clone(&self.running);
        Some(Arc::new(move || {
            let (lock, cvar) = &*running;
            let mut running = lock.lock().unwrap_or_else(PoisonError::into_inner);
            if running.blocked {
                running.cancel_requested = true;
                cvar.notify_all();
            }
        }))
    }
}
