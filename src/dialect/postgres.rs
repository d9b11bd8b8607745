use super::Dialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("${ordinal}")
    }

    fn now(&self) -> &'static str {
        "NOW()"
    }

    fn bool_type(&self) -> &'static str {
        "BOOLEAN"
    }

    fn unique_violation_code(&self) -> &'static str {
        "23505"
    }

    fn undefined_column_code(&self) -> &'static str {
        "42703"
    }

    fn undefined_table_code(&self) -> &'static str {
        "42P01"
    }

    fn statement_timeout_sql(&self, millis: u64) -> Option<String> {
        // SET LOCAL lasts until the end of the enclosing transaction.
        Some(format!("SET LOCAL statement_timeout = '{}ms'", millis.max(1)))
    }
}
