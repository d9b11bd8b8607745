//! Executor Module
//!
//! Provides the `Executor` trait that abstracts statement execution for the
//! migration engine, and `PgExecutor`, the implementation over `may_postgres`.
//!
//! Parameters and result rows use the small driver-neutral [`SqlValue`] type so
//! the bookkeeping code can be driven by any engine (and by in-memory fakes in
//! tests) without depending on a particular driver's row type.

use crate::context::CancelHook;
use chrono::NaiveDateTime;
use may_postgres::types::{ToSql, Type};
use may_postgres::{Client, Error as PostgresError};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use crate::tracing_spans;

/// Executor error type
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `PostgreSQL` error from `may_postgres`
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] PostgresError),
    /// Server-side error reported by a non-Postgres driver, with its SQLSTATE
    #[error("Database error [{code}]: {message}")]
    Server { code: String, message: String },
    /// Query returned an unexpected shape (row count, column count)
    #[error("Query error: {0}")]
    QueryError(String),
    /// Row value could not be converted to the requested type
    #[error("Conversion error: {0}")]
    Conversion(String),
    /// Other execution errors
    #[error("Execution error: {0}")]
    Other(String),
}

impl DbError {
    /// SQLSTATE code reported by the server, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            DbError::Postgres(e) => e.code().map(|state| state.code()),
            DbError::Server { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Returns `true` when the server reported exactly this SQLSTATE.
    pub fn has_code(&self, code: &str) -> bool {
        self.code() == Some(code)
    }
}

/// A bound parameter or a column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{b}"),
            SqlValue::Int(i) => write!(f, "{i}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Text(s) => write!(f, "'{s}'"),
            SqlValue::Timestamp(t) => write!(f, "'{t}'"),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

/// A result row, columns addressed by position
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    fn value(&self, idx: usize) -> Result<&SqlValue, DbError> {
        self.values.get(idx).ok_or_else(|| {
            DbError::Conversion(format!(
                "column index {idx} out of range (row has {} columns)",
                self.values.len()
            ))
        })
    }

    pub fn get_i64(&self, idx: usize) -> Result<i64, DbError> {
        match self.value(idx)? {
            SqlValue::Int(v) => Ok(*v),
            other => Err(DbError::Conversion(format!("column {idx}: expected integer, got {other}"))),
        }
    }

    /// Booleans may arrive as integers on engines without a native boolean type.
    pub fn get_bool(&self, idx: usize) -> Result<bool, DbError> {
        match self.value(idx)? {
            SqlValue::Bool(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v != 0),
            other => Err(DbError::Conversion(format!("column {idx}: expected boolean, got {other}"))),
        }
    }

    pub fn get_f64(&self, idx: usize) -> Result<f64, DbError> {
        match self.value(idx)? {
            SqlValue::Float(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v as f64),
            other => Err(DbError::Conversion(format!("column {idx}: expected float, got {other}"))),
        }
    }

    pub fn get_string(&self, idx: usize) -> Result<String, DbError> {
        match self.value(idx)? {
            SqlValue::Text(v) => Ok(v.clone()),
            other => Err(DbError::Conversion(format!("column {idx}: expected text, got {other}"))),
        }
    }

    pub fn get_opt_string(&self, idx: usize) -> Result<Option<String>, DbError> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            _ => self.get_string(idx).map(Some),
        }
    }

    /// Timestamps are accepted natively or as text in the common server formats.
    pub fn get_timestamp(&self, idx: usize) -> Result<NaiveDateTime, DbError> {
        match self.value(idx)? {
            SqlValue::Timestamp(t) => Ok(*t),
            SqlValue::Text(s) => parse_timestamp(s),
            other => Err(DbError::Conversion(format!("column {idx}: expected timestamp, got {other}"))),
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, DbError> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| DbError::Conversion(format!("Failed to parse timestamp '{raw}': unrecognized format")))
}

/// Trait for executing database operations
///
/// Implemented by direct connections ([`PgExecutor`]) and by
/// [`Transaction`](crate::transaction::Transaction), so bookkeeping code runs
/// the same way inside and outside a transaction.
pub trait Executor {
    /// Execute a single parameterized statement and return the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError>;

    /// Execute a batch of statements without parameters.
    ///
    /// Migration bodies hold several `;`-separated statements, so they go through
    /// this method rather than [`Executor::execute`].
    fn batch_execute(&self, sql: &str) -> Result<(), DbError>;

    /// Execute a query and return all rows.
    fn query_all(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError>;

    /// Execute a query that must return exactly one row.
    fn query_one(&self, query: &str, params: &[SqlValue]) -> Result<Row, DbError> {
        let mut rows = self.query_all(query, params)?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            n => Err(DbError::QueryError(format!("expected exactly one row, got {n}"))),
        }
    }

    /// Out-of-band abort for the statement this connection is running.
    ///
    /// `None` when the driver has no such request; a [`Context`](crate::Context)
    /// is then only honoured between statements.
    fn cancel_hook(&self) -> Option<CancelHook> {
        None
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        (**self).execute(query, params)
    }

    fn batch_execute(&self, sql: &str) -> Result<(), DbError> {
        (**self).batch_execute(sql)
    }

    fn query_all(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        (**self).query_all(query, params)
    }

    fn cancel_hook(&self) -> Option<CancelHook> {
        (**self).cancel_hook()
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        (**self).execute(query, params)
    }

    fn batch_execute(&self, sql: &str) -> Result<(), DbError> {
        (**self).batch_execute(sql)
    }

    fn query_all(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        (**self).query_all(query, params)
    }

    fn cancel_hook(&self) -> Option<CancelHook> {
        (**self).cancel_hook()
    }
}

/// Implementation of `Executor` for `may_postgres::Client`
pub struct PgExecutor {
    client: Client,
}

impl PgExecutor {
    /// Create a new executor from a `may_postgres::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Consume the executor and return the underlying client
    pub fn into_client(self) -> Client {
        self.client
    }
}

static NULL_PARAM: Option<String> = None;

fn as_to_sql(value: &SqlValue) -> &dyn ToSql {
    match value {
        SqlValue::Null => &NULL_PARAM,
        SqlValue::Bool(v) => v,
        SqlValue::Int(v) => v,
        SqlValue::Float(v) => v,
        SqlValue::Text(v) => v,
        SqlValue::Timestamp(v) => v,
    }
}

fn convert_row(row: &may_postgres::Row) -> Result<Row, DbError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool)
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Int)
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?.map(|v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?.map(|v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Float)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)?.map(|v| SqlValue::Float(f64::from(v)))
        } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME {
            row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text)
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<NaiveDateTime>>(idx)?.map(SqlValue::Timestamp)
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
                .map(|t| SqlValue::Timestamp(t.naive_utc()))
        } else {
            return Err(DbError::Conversion(format!(
                "unsupported column type {ty} for column '{}'",
                column.name()
            )));
        };
        values.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(Row::new(values))
}

impl Executor for PgExecutor {
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_spans::execute_query_span(query).entered();

        let bound: Vec<&dyn ToSql> = params.iter().map(as_to_sql).collect();
        Ok(self.client.execute(query, &bound)?)
    }

    fn batch_execute(&self, sql: &str) -> Result<(), DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_spans::execute_query_span(sql).entered();

        Ok(self.client.batch_execute(sql)?)
    }

    fn query_all(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_spans::execute_query_span(query).entered();

        let bound: Vec<&dyn ToSql> = params.iter().map(as_to_sql).collect();
        let rows = self.client.query(query, &bound)?;
        rows.iter().map(convert_row).collect()
    }

    fn cancel_hook(&self) -> Option<CancelHook> {
        let token = self.client.cancel_token();
        Some(Arc::new(move || {
            // The server ignores a request that arrives after the statement finished
            if let Err(e) = token.cancel_query() {
                log::warn!("failed to send cancel request: {e}");
            }
        }))
    }
}
