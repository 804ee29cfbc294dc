use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Insert,
    Update,
    Delete,
}

/// StatementCache holds the SQL of insert, update and delete statements
/// per physical table, keyed by the signature of the columns they were
/// built over. Prepared forms live in the connection's own statement cache
/// and are flushed whenever a table's entry is invalidated.
#[derive(Debug, Default)]
pub struct StatementCache {
    tables: HashMap<String, HashMap<(Kind, String), String>>,
}

impl StatementCache {
    pub fn get_or_build(
        &mut self,
        table: &str,
        kind: Kind,
        signature: &str,
        build: impl FnOnce() -> String,
    ) -> String {
        self.tables
            .entry(table.to_string())
            .or_default()
            .entry((kind, signature.to_string()))
            .or_insert_with(build)
            .clone()
    }

    /// Drop statements of `table`, returning whether there were any.
    pub fn invalidate(&mut self, table: &str) -> bool {
        self.tables.remove(table).is_some()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }
}
