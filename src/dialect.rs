use sqlparser::dialect::{
    Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect, SnowflakeDialect
};

/// SQL dialect used to tokenize and parse candidate queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum SqlDialect {
    #[default]
    Generic,
    SQLite,
    Snowflake,
    PostgreSQL,
    MySQL
}

impl SqlDialect {
    /// Convert to sqlparser dialect for parsing
    pub fn into_parser_dialect(self) -> Box<dyn Dialect> {
        match self {
            Self::Generic => Box::new(GenericDialect {}),
            Self::SQLite => Box::new(SQLiteDialect {}),
            Self::Snowflake => Box::new(SnowflakeDialect {}),
            Self::PostgreSQL => Box::new(PostgreSqlDialect {}),
            Self::MySQL => Box::new(MySqlDialect {})
        }
    }
}
