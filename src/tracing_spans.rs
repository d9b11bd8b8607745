//! Span helpers for the optional `tracing` feature.

use tracing::{debug_span, info_span, Span};

pub fn acquire_connection_span() -> Span {
    debug_span!("sqlshift.connect")
}

pub fn execute_query_span(query: &str) -> Span {
    // Migration bodies can be large; keep the span field short.
    let statement: String = query.trim().chars().take(120).collect();
    debug_span!("sqlshift.query", statement = %statement)
}

pub fn begin_transaction_span() -> Span {
    debug_span!("sqlshift.transaction.begin")
}

pub fn commit_transaction_span() -> Span {
    debug_span!("sqlshift.transaction.commit")
}

pub fn rollback_transaction_span() -> Span {
    debug_span!("sqlshift.transaction.rollback")
}

pub fn up_span(dialect: &str) -> Span {
    info_span!("sqlshift.up", dialect)
}

pub fn apply_span(version: i64, direction: &str) -> Span {
    info_span!("sqlshift.apply", version, direction)
}
