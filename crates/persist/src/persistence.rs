use super::messages::MessageLog;
use super::statements::{Kind, StatementCache};
use super::{for_server, ConnectionAdapter, Dialect, Error, PersistorDefinition, Target};
use itertools::Itertools;
use pipeline::ExecutionState;
use row::{naming, AggregateRole, Column, Value, ValueType};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Persistence wraps one native connection of a logical connection name.
/// It maps logical targets to physical tables, caches statements per table,
/// and buffers inserts into batches.
pub struct Persistence {
    name: String,
    conn: rusqlite::Connection,
    dialect: Box<dyn Dialect>,
    schema_supported: bool,
    statements: StatementCache,
    pending: BTreeMap<String, Pending>,
    // Rows written and skipped per physical table and column signature, not yet taken.
    counts: BTreeMap<(String, String), (u64, u64)>,
    bulk_size: usize,
    plain_names: bool,
    messages: MessageLog,
    state: Option<Arc<ExecutionState>>,
}

// Inserts buffered for one physical table.
struct Pending {
    table: String,
    signature: String,
    sql: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Persistence {
    pub fn open(adapter: &dyn ConnectionAdapter) -> Result<Self, Error> {
        let conn = adapter.open()?;
        conn.set_prepared_statement_cache_capacity(64);
        conn.execute_batch("BEGIN").map_err(Error::sql("BEGIN"))?;

        Ok(Self {
            name: adapter.name().to_string(),
            conn,
            dialect: for_server(adapter.server_name()),
            schema_supported: adapter.is_schema_supported(),
            statements: StatementCache::default(),
            pending: BTreeMap::new(),
            counts: BTreeMap::new(),
            bulk_size: 1,
            plain_names: false,
            messages: MessageLog::default(),
            state: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn set_state(&mut self, state: Arc<ExecutionState>) {
        self.state = Some(state);
    }

    /// Apply the batching and naming options of a writer.
    pub fn configure(&mut self, definition: &PersistorDefinition) {
        self.bulk_size = definition.bulk_size.max(1);
        self.plain_names = definition.plain_names;
    }

    /// Quote `name` as an identifier, unless plain names are in effect.
    pub fn escape(&self, name: &str) -> String {
        if self.plain_names {
            return name.to_string();
        }
        let quote = self.dialect.identifier_quote();
        format!("{quote}{}{quote}", name.replace(quote, &quote.repeat(2)))
    }

    /// Physical, escaped name of `target`.
    pub fn table_name(&self, target: &Target) -> String {
        match (&target.schema, self.schema_supported) {
            (Some(schema), true) => format!("{}.{}", self.escape(schema), self.escape(&target.table)),
            _ => self.escape(&target.table),
        }
    }

    fn column_list<'c, I>(&self, columns: I) -> String
    where
        I: IntoIterator<Item = &'c Column>,
    {
        columns.into_iter().map(|c| self.escape(&c.name)).join(", ")
    }

    pub fn table_exists(&mut self, target: &Target) -> Result<bool, Error> {
        let sql = self.dialect.table_exists_sql();
        let count: i64 = self
            .conn
            .query_row(sql, rusqlite::params![target.table], |row| row.get(0))
            .map_err(Error::sql(sql))?;
        Ok(count > 0)
    }

    /// Column names and value types of the existing `target`, if it exists.
    pub fn table_columns(&mut self, target: &Target) -> Result<Option<Vec<(String, ValueType)>>, Error> {
        if !self.table_exists(target)? {
            return Ok(None);
        }
        let sql = format!("SELECT * FROM {}", self.table_name(target));
        Ok(Some(self.describe(&sql)?))
    }

    /// Column names and value types produced by the query `sql`.
    pub fn describe(&mut self, sql: &str) -> Result<Vec<(String, ValueType)>, Error> {
        self.flush_all()?;
        let stmt = self.conn.prepare(sql).map_err(Error::sql(sql))?;

        Ok(stmt
            .columns()
            .iter()
            .map(|c| {
                let ty = c
                    .decl_type()
                    .map(|d| self.dialect.value_type(d))
                    .unwrap_or(ValueType::Any);
                (c.name().to_string(), ty)
            })
            .collect())
    }

    /// Fetch up to `limit` rows of query `sql`, skipping the first `offset`.
    pub fn fetch(&mut self, sql: &str, offset: usize, limit: usize) -> Result<Vec<Vec<Value>>, Error> {
        self.flush_all()?;
        let paged = format!("SELECT * FROM ({sql}) LIMIT {limit} OFFSET {offset}");
        let mut stmt = self.conn.prepare(&paged).map_err(Error::sql(&paged))?;
        let width = stmt.column_count();

        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(Error::sql(&paged))?;

        Ok(rows)
    }

    pub fn row_count(&mut self, target: &Target) -> Result<u64, Error> {
        self.flush(target)?;
        let sql = format!("SELECT count(*) FROM {}", self.table_name(target));
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(Error::sql(&sql))?;
        Ok(count as u64)
    }

    /// Execute a statement which returns no rows.
    pub fn execute(&mut self, sql: &str) -> Result<usize, Error> {
        tracing::debug!(connection = %self.name, %sql, "executing statement");
        self.conn.execute(sql, []).map_err(Error::sql(sql))
    }

    /// Create `target` with `columns`, led by a surrogate key if `with_key`.
    pub fn create_table(&mut self, target: &Target, columns: &[Column], with_key: bool) -> Result<(), Error> {
        let table = self.table_name(target);
        let mut defs = Vec::with_capacity(columns.len() + 1);

        if with_key {
            defs.push(format!(
                "{} {}",
                self.escape(naming::INTERNAL_KEY),
                self.dialect.generated_key()
            ));
        }
        for column in columns {
            let ty = self
                .dialect
                .type_name(column.value_type, column.precision, column.scale);
            defs.push(format!("{} {ty}", self.escape(&column.name)).trim_end().to_string());
        }

        let sql = format!("CREATE TABLE {table} ({})", defs.join(", "));
        self.conn
            .execute_batch(&sql)
            .map_err(|source| Error::CreateTable {
                table: target.to_string(),
                source,
            })?;

        tracing::info!(connection = %self.name, table = %target, with_key, "created table");
        Ok(())
    }

    /// Drop `target` if it exists, discarding its buffered rows and statements.
    pub fn drop_table(&mut self, target: &Target) -> Result<(), Error> {
        let table = self.table_name(target);
        self.pending.remove(&table);
        self.counts.retain(|(counted, _), _| counted != &table);
        self.invalidate(&table);

        let sql = format!("DROP TABLE IF EXISTS {table}");
        self.conn
            .execute_batch(&sql)
            .map_err(|source| Error::DropTable {
                table: target.to_string(),
                source,
            })?;

        tracing::debug!(connection = %self.name, table = %target, "dropped table");
        Ok(())
    }

    /// Create `target` unless it exists. Returns true if it was created.
    pub fn ensure_table(&mut self, target: &Target, columns: &[Column], with_key: bool) -> Result<bool, Error> {
        if self.table_exists(target)? {
            return Ok(false);
        }
        self.create_table(target, columns, with_key)?;
        Ok(true)
    }

    /// Copy `columns` of `source` into a new, keyed table `target`.
    pub fn copy_table(&mut self, source: &Target, target: &Target, columns: &[Column]) -> Result<(), Error> {
        self.flush(source)?;
        self.create_table(target, columns, true)?;

        let list = self.column_list(columns);
        let sql = format!(
            "INSERT INTO {} ({list}) SELECT {list} FROM {}",
            self.table_name(target),
            self.table_name(source),
        );
        let copied = self.execute(&sql)?;

        tracing::debug!(connection = %self.name, from = %source, to = %target, copied, "copied table");
        Ok(())
    }

    /// Delete every row of `target`.
    pub fn delete_all(&mut self, target: &Target) -> Result<usize, Error> {
        self.flush(target)?;
        self.execute(&format!("DELETE FROM {}", self.table_name(target)))
    }

    /// Buffer an insert of `values` into `columns` of `target`.
    /// Returns false if the row was skipped due to a per-row failure.
    pub fn insert(&mut self, target: &Target, columns: &[&Column], values: &[Value]) -> Result<bool, Error> {
        let table = self.table_name(target);
        let signature = self.signature(columns);
        let values = match coerce(columns, values) {
            Ok(values) => values,
            Err(detail) => {
                self.row_failed("insert", target, columns.iter().map(|c| c.name.as_str()), values, &detail);
                self.tally(&table, &signature, false);
                return Ok(false);
            }
        };

        let sql = {
            let list = self.column_list(columns.iter().copied());
            let marks = vec!["?"; columns.len()].join(", ");
            self.statements.get_or_build(&table, Kind::Insert, &signature, || {
                format!("INSERT INTO {table} ({list}) VALUES ({marks})")
            })
        };
        if matches!(self.pending.get(&table), Some(p) if p.sql != sql) {
            self.flush_table(&table)?;
        }

        let pending = self.pending.entry(table.clone()).or_insert_with(|| Pending {
            table: target.to_string(),
            signature,
            sql,
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            rows: Vec::new(),
        });
        pending.rows.push(values);

        if pending.rows.len() >= self.bulk_size {
            self.flush_table(&table)?;
        }
        Ok(true)
    }

    /// Update the row of `target` matching the keys of `definition`,
    /// inserting it if no row matches. `values` align with the definition's columns.
    pub fn update(&mut self, target: &Target, definition: &PersistorDefinition, values: &[Value]) -> Result<bool, Error> {
        self.flush(target)?;
        let table = self.table_name(target);
        let columns: Vec<&Column> = definition.columns.iter().collect();
        let signature = self.signature(&columns);

        let values = match coerce(&columns, values) {
            Ok(values) => values,
            Err(detail) => {
                self.row_failed("update", target, columns.iter().map(|c| c.name.as_str()), values, &detail);
                self.tally(&table, &signature, false);
                return Ok(false);
            }
        };
        let value = |name: &str| {
            columns
                .iter()
                .position(|c| c.name == name)
                .and_then(|i| values.get(i))
                .ok_or_else(|| row::Error::NoSuchColumn { name: name.to_string() })
        };

        let keys = definition.logical_keys();
        let to_set: Vec<&Column> = definition
            .to_set()
            .filter(|c| !keys.iter().any(|k| k.name == c.name))
            .collect();

        for column in &to_set {
            if matches!(column.aggregate, AggregateRole::Min | AggregateRole::Max | AggregateRole::Avg) {
                let message = format!(
                    "aggregate role {:?} of column {} in table {target} is not supported when updating row by row; updating in mode 'last'",
                    column.aggregate, column.name
                );
                if self.messages.first_occurrence(&message) {
                    tracing::warn!("{message}");
                }
            }
        }

        let assignments = to_set
            .iter()
            .map(|c| {
                let name = self.escape(&c.name);
                match c.aggregate {
                    AggregateRole::Sum => format!("{name} = coalesce({name}, 0) + ?"),
                    AggregateRole::Count => format!("{name} = coalesce({name}, 0) + 1"),
                    _ => format!("{name} = ?"),
                }
            })
            .join(", ");
        let assignments = match (assignments.is_empty(), keys.first()) {
            // Only first-wins columns: matching rows are left untouched.
            (true, Some(key)) => {
                let key = self.escape(&key.name);
                format!("{key} = {key}")
            }
            _ => assignments,
        };
        let predicate = self.key_predicate(&keys);
        let sql = self.statements.get_or_build(&table, Kind::Update, &signature, || {
            format!("UPDATE {table} SET {assignments} WHERE {predicate}")
        });

        let params: Vec<&Value> = to_set
            .iter()
            .filter(|c| c.aggregate != AggregateRole::Count)
            .map(|c| value(&c.name))
            .chain(keys.iter().map(|k| value(&k.name)))
            .collect::<Result<_, _>>()?;

        let changed = {
            let mut stmt = self.conn.prepare_cached(&sql).map_err(Error::sql(&sql))?;
            stmt.execute(rusqlite::params_from_iter(params))
        };
        let changed = match changed {
            Ok(changed) => changed,
            Err(err) => {
                self.row_failed("update", target, columns.iter().map(|c| c.name.as_str()), &values, &err.to_string());
                self.tally(&table, &signature, false);
                return Ok(false);
            }
        };
        if changed != 0 {
            self.tally(&table, &signature, true);
            return Ok(true);
        }

        // No row matched: insert it, with counts starting at one.
        let values: Vec<Value> = columns
            .iter()
            .zip(values)
            .map(|(c, v)| match c.aggregate {
                AggregateRole::Count => Value::Integer(1),
                _ => v,
            })
            .collect();
        self.insert(target, &columns, &values)
    }

    /// Delete rows of `target` whose `keys` equal `values`.
    pub fn delete(&mut self, target: &Target, keys: &[&Column], values: &[Value]) -> Result<bool, Error> {
        self.flush(target)?;
        let table = self.table_name(target);
        let signature = self.signature(keys);

        let values = match coerce(keys, values) {
            Ok(values) => values,
            Err(detail) => {
                self.row_failed("delete", target, keys.iter().map(|c| c.name.as_str()), values, &detail);
                self.tally(&table, &signature, false);
                return Ok(false);
            }
        };
        let predicate = self.key_predicate(keys);
        let sql = self.statements.get_or_build(&table, Kind::Delete, &signature, || {
            format!("DELETE FROM {table} WHERE {predicate}")
        });

        let result = {
            let mut stmt = self.conn.prepare_cached(&sql).map_err(Error::sql(&sql))?;
            stmt.execute(rusqlite::params_from_iter(values.iter()))
        };
        match result {
            Ok(_) => {
                self.tally(&table, &signature, true);
                Ok(true)
            }
            Err(err) => {
                self.row_failed("delete", target, keys.iter().map(|c| c.name.as_str()), &values, &err.to_string());
                self.tally(&table, &signature, false);
                Ok(false)
            }
        }
    }

    /// Write buffered rows of `target`.
    pub fn flush(&mut self, target: &Target) -> Result<(), Error> {
        let table = self.table_name(target);
        self.flush_table(&table)
    }

    pub fn flush_all(&mut self) -> Result<(), Error> {
        let tables: Vec<String> = self.pending.keys().cloned().collect();
        for table in tables {
            self.flush_table(&table)?;
        }
        Ok(())
    }

    /// Rows written into `columns` of `target` and rows skipped, since the
    /// last call. Buffered rows are counted once they're flushed.
    pub fn take_counts(&mut self, target: &Target, columns: &[&Column]) -> (u64, u64) {
        let key = (self.table_name(target), self.signature(columns));
        self.counts.remove(&key).unwrap_or_default()
    }

    fn tally(&mut self, table: &str, signature: &str, written: bool) {
        let counts = self
            .counts
            .entry((table.to_string(), signature.to_string()))
            .or_default();
        if written {
            counts.0 += 1;
        } else {
            counts.1 += 1;
        }
    }

    // Identifies statements built over `columns` under the current naming.
    fn signature(&self, columns: &[&Column]) -> String {
        columns
            .iter()
            .map(|c| format!("{}:{:?}", self.escape(&c.name), c.aggregate))
            .join(",")
    }

    fn flush_table(&mut self, table: &str) -> Result<(), Error> {
        let Some(pending) = self.pending.remove(table) else {
            return Ok(());
        };
        let mut failures = Vec::new();
        let mut written = 0;
        {
            let mut stmt = self
                .conn
                .prepare_cached(&pending.sql)
                .map_err(Error::sql(&pending.sql))?;

            for row in pending.rows {
                match stmt.execute(rusqlite::params_from_iter(row.iter())) {
                    Ok(_) => written += 1,
                    Err(err) => failures.push((err, row)),
                }
            }
        }
        let counts = self
            .counts
            .entry((table.to_string(), pending.signature))
            .or_default();
        counts.0 += written;
        counts.1 += failures.len() as u64;

        let target = Target::new(pending.table);
        for (err, row) in failures {
            self.row_failed(
                "insert",
                &target,
                pending.columns.iter().map(String::as_str),
                &row,
                &err.to_string(),
            );
        }
        Ok(())
    }

    /// Commit all work of the connection, after writing buffered rows of `target`.
    /// Statements of `target` are invalidated.
    pub fn commit(&mut self, target: &Target) -> Result<(), Error> {
        self.flush(target)?;
        let table = self.table_name(target);
        self.invalidate(&table);
        self.commit_all()
    }

    pub fn commit_all(&mut self) -> Result<(), Error> {
        self.flush_all()?;
        self.conn
            .execute_batch("COMMIT; BEGIN")
            .map_err(Error::sql("COMMIT; BEGIN"))
    }

    /// Commit outstanding work and close the connection.
    pub fn close(mut self) -> Result<(), Error> {
        self.flush_all()?;
        self.conn.execute_batch("COMMIT").map_err(Error::sql("COMMIT"))?;
        self.conn.close().map_err(|(_, err)| Error::sql("close")(err))?;

        tracing::debug!(connection = %self.name, "closed connection");
        Ok(())
    }

    fn key_predicate(&self, keys: &[&Column]) -> String {
        keys.iter()
            .map(|k| self.dialect.null_safe_eq(&self.escape(&k.name)))
            .join(" AND ")
    }

    fn invalidate(&mut self, table: &str) {
        if self.statements.invalidate(table) {
            self.conn.flush_prepared_statement_cache();
        }
    }

    fn row_failed<'c>(
        &mut self,
        operation: &str,
        target: &Target,
        columns: impl Iterator<Item = &'c str>,
        values: &[Value],
        detail: &str,
    ) {
        let message = format!(
            "failed to {operation} row of table {target} in columns ({}): {detail}",
            columns.format(", ")
        );
        if self.messages.first_occurrence(&message) {
            tracing::warn!(connection = %self.name, ?values, "{message}");
        } else {
            tracing::warn!(connection = %self.name, "{message}");
        }
        if let Some(state) = &self.state {
            state.add_warning();
        }
    }
}

// Coerce `values` to the types of `columns`, describing the first failure.
fn coerce(columns: &[&Column], values: &[Value]) -> Result<Vec<Value>, String> {
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| {
            value.coerce(column.value_type).map_err(|_| {
                format!(
                    "value of column {} is not convertible to {:?}",
                    column.name, column.value_type
                )
            })
        })
        .collect()
}
