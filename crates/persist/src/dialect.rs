use row::ValueType;

/// Dialect supplies the SQL fragments which differ between database servers.
pub trait Dialect {
    fn name(&self) -> &'static str;

    fn identifier_quote(&self) -> &'static str {
        "\""
    }

    fn supports_schema(&self) -> bool {
        true
    }

    /// Column definition of a generated surrogate key.
    fn generated_key(&self) -> &'static str;

    /// SQL type of a column of `ty`.
    fn type_name(&self, ty: ValueType, precision: Option<u32>, scale: Option<u32>) -> String {
        match (ty, precision, scale) {
            (ValueType::Number, Some(p), Some(s)) => format!("DECIMAL({p},{s})"),
            (ValueType::Number, _, _) => "DOUBLE PRECISION".to_string(),
            (ValueType::Integer, _, _) => "BIGINT".to_string(),
            (ValueType::Boolean, _, _) => "BOOLEAN".to_string(),
            (ValueType::Text | ValueType::Any, Some(p), _) => format!("VARCHAR({p})"),
            (ValueType::Text | ValueType::Any, None, _) => "VARCHAR(255)".to_string(),
        }
    }

    /// Value type of a column declared with SQL type `decl`.
    fn value_type(&self, decl: &str) -> ValueType {
        let decl = decl.to_ascii_uppercase();
        if decl.contains("INT") {
            ValueType::Integer
        } else if ["DOUB", "REAL", "FLOA", "DEC", "NUM"]
            .iter()
            .any(|t| decl.contains(t))
        {
            ValueType::Number
        } else if decl.contains("BOOL") {
            ValueType::Boolean
        } else if decl.is_empty() {
            ValueType::Any
        } else {
            ValueType::Text
        }
    }

    /// Predicate comparing `column` to a single placeholder, matching nulls.
    fn null_safe_eq(&self, column: &str) -> String {
        format!("{column} = ?")
    }

    /// Query returning a count of tables named by its single parameter.
    fn table_exists_sql(&self) -> &'static str {
        "SELECT count(*) FROM information_schema.tables WHERE table_name = ?"
    }
}

#[derive(Debug)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn supports_schema(&self) -> bool {
        false
    }

    fn generated_key(&self) -> &'static str {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }

    fn type_name(&self, ty: ValueType, _precision: Option<u32>, _scale: Option<u32>) -> String {
        match ty {
            ValueType::Integer | ValueType::Boolean => "INTEGER",
            ValueType::Number => "REAL",
            ValueType::Text => "TEXT",
            ValueType::Any => "",
        }
        .to_string()
    }

    fn null_safe_eq(&self, column: &str) -> String {
        format!("{column} IS ?")
    }

    fn table_exists_sql(&self) -> &'static str {
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?"
    }
}

#[derive(Debug)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn generated_key(&self) -> &'static str {
        "BIGSERIAL PRIMARY KEY"
    }

    fn null_safe_eq(&self, column: &str) -> String {
        format!("{column} IS NOT DISTINCT FROM ?")
    }
}

#[derive(Debug)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn identifier_quote(&self) -> &'static str {
        "`"
    }

    fn generated_key(&self) -> &'static str {
        "BIGINT AUTO_INCREMENT PRIMARY KEY"
    }

    fn null_safe_eq(&self, column: &str) -> String {
        format!("{column} <=> ?")
    }
}

#[derive(Debug)]
pub struct Derby;

impl Dialect for Derby {
    fn name(&self) -> &'static str {
        "derby"
    }

    fn generated_key(&self) -> &'static str {
        "BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY"
    }

    fn table_exists_sql(&self) -> &'static str {
        "SELECT count(*) FROM sys.systables WHERE tablename = ?"
    }
}

#[derive(Debug)]
pub struct Generic;

impl Dialect for Generic {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn generated_key(&self) -> &'static str {
        "BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"
    }
}

/// Select the Dialect of a server by its reported name.
pub fn for_server(server: &str) -> Box<dyn Dialect> {
    let server = server.to_ascii_lowercase();

    if server.contains("sqlite") {
        Box::new(Sqlite)
    } else if server.contains("postgres") {
        Box::new(Postgres)
    } else if server.contains("mysql") || server.contains("mariadb") {
        Box::new(MySql)
    } else if server.contains("derby") {
        Box::new(Derby)
    } else {
        tracing::debug!(%server, "no specific SQL dialect for server; using generic SQL");
        Box::new(Generic)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dialect_selection() {
        let names: Vec<_> = ["SQLite 3.41", "PostgreSQL", "MariaDB", "Apache Derby", "Oracle"]
            .iter()
            .map(|s| for_server(s).name())
            .collect();
        assert_eq!(names, vec!["sqlite", "postgres", "mysql", "derby", "generic"]);
    }

    #[test]
    fn test_fragments() {
        let generic = for_server("h2");
        assert_eq!(generic.type_name(ValueType::Number, Some(12), Some(2)), "DECIMAL(12,2)");
        assert_eq!(generic.type_name(ValueType::Text, None, None), "VARCHAR(255)");
        assert_eq!(generic.value_type("numeric(10,2)"), ValueType::Number);
        assert_eq!(generic.value_type("varchar"), ValueType::Text);

        let mysql = for_server("mysql");
        assert_eq!(mysql.identifier_quote(), "`");
        assert_eq!(mysql.null_safe_eq("`a`"), "`a` <=> ?");

        let sqlite = for_server("sqlite");
        assert!(!sqlite.supports_schema());
        assert_eq!(sqlite.type_name(ValueType::Boolean, None, None), "INTEGER");
        assert_eq!(sqlite.value_type(""), ValueType::Any);
        assert_eq!(sqlite.value_type("BIGINT"), ValueType::Integer);
    }
}
