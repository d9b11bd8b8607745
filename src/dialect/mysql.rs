use super::Dialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn placeholder(&self, _ordinal: usize) -> String {
        "?".to_string()
    }

    fn now(&self) -> &'static str {
        "NOW()"
    }

    fn bool_type(&self) -> &'static str {
        "TINYINT(1)"
    }

    fn unique_violation_code(&self) -> &'static str {
        "23000"
    }

    fn undefined_column_code(&self) -> &'static str {
        "42S22"
    }

    fn undefined_table_code(&self) -> &'static str {
        "42S02"
    }
}
