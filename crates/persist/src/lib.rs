mod aggregate;
mod connection;
mod definition;
mod dialect;
mod manager;
mod messages;
mod persistence;
mod statements;
mod store;

pub use connection::{ConnectionAdapter, SqliteAdapter};
pub use definition::{AggregateMode, PersistorDefinition, Target, WriteMode};
pub use dialect::{for_server, Dialect};
pub use manager::{PersistenceManager, SharedDatastore, SharedPersistence};
pub use persistence::Persistence;
pub use store::Datastore;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration of {target}: {detail}")]
    Configuration { target: String, detail: String },
    #[error("failed to connect to {connection}")]
    Connect {
        connection: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create table {table}")]
    CreateTable {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to drop table {table}")]
    DropTable {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("table {table} has no column {column} required by the written rows")]
    IncompatibleColumn { table: String, column: String },
    #[error("failed to execute SQL: {sql}")]
    Sql {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("datastore of {0} is closed")]
    Closed(String),
    #[error(transparent)]
    Row(#[from] row::Error),
}

impl Error {
    fn sql(sql: &str) -> impl FnOnce(rusqlite::Error) -> Error + '_ {
        move |source| Error::Sql {
            sql: sql.to_string(),
            source,
        }
    }
}
