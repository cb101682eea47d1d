//! SQL dialect idioms.
//!
//! The local embedded store and the networked SQL servers differ only in
//! quoting/escaping rules, boolean literals, column type names and how
//! random ordering is spelled. The query builder and schema manager ask the
//! active backend for these idioms instead of hard-coding them.

/// The dialect families understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SqlDialect {
    /// Local embedded SQLite store.
    #[default]
    Sqlite,
    /// Networked MySQL server.
    MySql,
    /// Networked PostgreSQL server.
    Postgres,
}

impl SqlDialect {
    /// Escape a raw value for embedding between single quotes in a
    /// statement. Single quotes are doubled everywhere; MySQL additionally
    /// treats backslash as an escape character, so it is doubled there.
    pub fn escape(&self, raw: &str) -> String {
        let quoted = raw.replace('\'', "''");
        match self {
            SqlDialect::MySql => quoted.replace('\\', "\\\\"),
            _ => quoted,
        }
    }

    /// The literal for boolean true.
    pub fn bool_true(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "'t'",
            _ => "1",
        }
    }

    /// The literal for boolean false.
    pub fn bool_false(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "'f'",
            _ => "0",
        }
    }

    /// The random-ordering function.
    pub fn random_func(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "RANDOM()",
            SqlDialect::MySql => "RAND()",
            SqlDialect::Postgres => "random()",
        }
    }

    /// Column type for short display strings.
    pub fn text_column_type(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "TEXT",
            _ => "VARCHAR(255)",
        }
    }

    /// Column type for short display strings with an explicit length.
    pub fn text_column_type_len(&self, length: u16) -> String {
        match self {
            SqlDialect::Postgres => "TEXT".to_string(),
            _ => format!("VARCHAR({})", length),
        }
    }

    /// Column type for long text such as lyrics.
    pub fn long_text_column_type(&self) -> &'static str {
        "TEXT"
    }

    /// Column definition for an auto-assigned integer primary key.
    pub fn auto_increment_primary_key(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            SqlDialect::MySql => "INTEGER PRIMARY KEY AUTO_INCREMENT",
            SqlDialect::Postgres => "SERIAL PRIMARY KEY",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_doubles_single_quotes() {
        assert_eq!(SqlDialect::Sqlite.escape("it's"), "it''s");
        assert_eq!(SqlDialect::Postgres.escape("it's"), "it''s");
    }

    #[test]
    fn escape_doubles_backslashes_only_for_mysql() {
        assert_eq!(SqlDialect::MySql.escape(r"a\b'c"), r"a\\b''c");
        assert_eq!(SqlDialect::Sqlite.escape(r"a\b"), r"a\b");
    }

    #[test]
    fn boolean_literals_differ_per_dialect() {
        assert_eq!(SqlDialect::Sqlite.bool_true(), "1");
        assert_eq!(SqlDialect::Postgres.bool_true(), "'t'");
        assert_eq!(SqlDialect::Postgres.bool_false(), "'f'");
    }

    #[test]
    fn random_func_differs_per_dialect() {
        assert_eq!(SqlDialect::Sqlite.random_func(), "RANDOM()");
        assert_eq!(SqlDialect::MySql.random_func(), "RAND()");
        assert_eq!(SqlDialect::Postgres.random_func(), "random()");
    }
}
