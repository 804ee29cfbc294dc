use super::{for_server, Error};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// ConnectionAdapter opens native connections to one configured backend.
pub trait ConnectionAdapter {
    /// Logical name of the connection.
    fn name(&self) -> &str;

    fn open(&self) -> Result<rusqlite::Connection, Error>;

    /// Product name reported by the server, used to select a Dialect.
    fn server_name(&self) -> &str;

    fn is_schema_supported(&self) -> bool {
        for_server(self.server_name()).supports_schema()
    }

    fn identifier_quote(&self) -> &str {
        for_server(self.server_name()).identifier_quote()
    }
}

/// SqliteAdapter connects to a SQLite database file,
/// or to a private in-memory database if no path is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SqliteAdapter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl SqliteAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl ConnectionAdapter for SqliteAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<rusqlite::Connection, Error> {
        let conn = match &self.path {
            Some(path) => rusqlite::Connection::open(path),
            None => rusqlite::Connection::open_in_memory(),
        };
        let conn = conn.map_err(|source| Error::Connect {
            connection: self.name.clone(),
            source,
        })?;

        tracing::debug!(connection = %self.name, path = ?self.path, "opened SQLite connection");
        Ok(conn)
    }

    fn server_name(&self) -> &str {
        "SQLite"
    }
}
