use super::aggregate::merge_sql;
use super::{AggregateMode, Error, PersistorDefinition, SharedPersistence, Target, WriteMode};
use pipeline::{ExecutionState, Sink};
use row::{Column, Row, Value};
use std::sync::Arc;

// How accepted rows reach the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Plain inserts into the target.
    Fill,
    /// Update by logical keys, inserting on a miss.
    Update,
    /// Inserts into the shadow table, merged on commit.
    Bulk,
    /// Delete by logical keys.
    Delete,
}

/// Datastore is the Sink writing accepted rows into one Target
/// through a shared Persistence.
pub struct Datastore {
    name: String,
    persistence: SharedPersistence,
    definition: PersistorDefinition,
    strategy: Strategy,
    // Positions of definition columns within the attached shape.
    indices: Vec<usize>,
    prepared: bool,
    staged: bool,
    closed: bool,
    rows_before: Option<u64>,
    written: u64,
    skipped: u64,
}

impl Datastore {
    pub fn new(persistence: SharedPersistence, definition: PersistorDefinition) -> Result<Self, Error> {
        definition.validate()?;

        let strategy = match (definition.mode, definition.aggregate) {
            (WriteMode::Delete, _) => Strategy::Delete,
            (WriteMode::Fill | WriteMode::Temporary, _) => Strategy::Fill,
            _ if !definition.do_aggregate() => {
                if definition.aggregate != AggregateMode::None {
                    tracing::debug!(
                        target = %definition.target,
                        "nothing to aggregate by keys; writing in mode fill"
                    );
                }
                Strategy::Fill
            }
            (_, AggregateMode::Row) => Strategy::Update,
            (_, AggregateMode::Bulk) => Strategy::Bulk,
            (_, AggregateMode::None) => Strategy::Fill,
        };

        let name = format!("{}:{}", persistence.borrow().name(), definition.target);
        Ok(Self {
            name,
            persistence,
            definition,
            strategy,
            indices: Vec::new(),
            prepared: false,
            staged: false,
            closed: false,
            rows_before: None,
            written: 0,
            skipped: 0,
        })
    }

    pub fn set_state(&mut self, state: Arc<ExecutionState>) {
        self.persistence.borrow_mut().set_state(state);
    }

    pub fn definition(&self) -> &PersistorDefinition {
        &self.definition
    }

    pub fn target(&self) -> &Target {
        &self.definition.target
    }

    /// Rows written so far, and rows skipped due to per-row failures.
    pub fn counts(&self) -> (u64, u64) {
        (self.written, self.skipped)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Prepare the target according to the write mode. Runs once.
    pub fn set_writeable(&mut self) -> Result<(), Error> {
        if self.prepared {
            return Ok(());
        }
        self.ensure_open()?;

        if !matches!(self.definition.mode, WriteMode::Create | WriteMode::Temporary) {
            self.check_compatibility()?;
        }
        let target = &self.definition.target;
        let with_key = self.definition.create_key_column;
        let mut p = self.persistence.borrow_mut();
        p.configure(&self.definition);

        match self.definition.mode {
            WriteMode::Create | WriteMode::Temporary => {
                p.drop_table(target)?;
                p.create_table(target, &self.definition.columns, with_key)?;
            }
            WriteMode::Update => {
                p.ensure_table(target, &self.definition.columns, with_key)?;
                let deleted = p.delete_all(target)?;
                tracing::debug!(%target, deleted, "emptied table for update");
            }
            WriteMode::Delete => (),
            WriteMode::Insert | WriteMode::Add | WriteMode::Fill => {
                p.ensure_table(target, &self.definition.columns, with_key)?;
            }
        }

        if self.definition.report_row_counts && self.strategy != Strategy::Delete {
            self.rows_before = Some(p.row_count(target)?);
        }
        tracing::debug!(
            datastore = %self.name,
            mode = ?self.definition.mode,
            strategy = ?self.strategy,
            "datastore is writeable"
        );
        self.prepared = true;
        Ok(())
    }

    /// Verify that an existing target holds every written column, adapting
    /// written types to the declared types of the table.
    pub fn check_compatibility(&mut self) -> Result<(), Error> {
        let target = &self.definition.target;
        let Some(existing) = self.persistence.borrow_mut().table_columns(target)? else {
            return Ok(());
        };

        for column in self.definition.columns.iter_mut() {
            let Some((_, ty)) = existing
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&column.name))
            else {
                return Err(Error::IncompatibleColumn {
                    table: target.to_string(),
                    column: column.name.clone(),
                });
            };
            if *ty != column.value_type && *ty != row::ValueType::Any {
                tracing::debug!(
                    table = %target,
                    column = %column.name,
                    from = ?column.value_type,
                    to = ?ty,
                    "adapting column type to existing table"
                );
                column.value_type = *ty;
            }
        }
        Ok(())
    }

    // Copy existing target rows into a fresh shadow table, so they take
    // part in the merge ahead of newly written rows. The target keeps its
    // rows until the merge replaces them.
    fn stage(&mut self) -> Result<(), Error> {
        let target = &self.definition.target;
        let temporary = target.temporary();
        let mut p = self.persistence.borrow_mut();

        p.drop_table(&temporary)?;
        if p.row_count(target)? > 0 {
            p.copy_table(target, &temporary, &self.definition.columns)?;
        } else {
            p.create_table(&temporary, &self.definition.columns, true)?;
        }
        self.staged = true;
        Ok(())
    }

    fn merge(&mut self) -> Result<(), Error> {
        let target = &self.definition.target;
        let temporary = target.temporary();
        let mut p = self.persistence.borrow_mut();
        p.configure(&self.definition);

        p.flush(&temporary)?;
        let (written, skipped) = p.take_counts(&temporary, &self.counted());
        self.written += written;
        self.skipped += skipped;

        p.delete_all(target)?;
        let sql = merge_sql(&p, &self.definition, target, &temporary);
        let merged = p.execute(&sql)?;
        p.drop_table(&temporary)?;

        tracing::debug!(table = %target, merged, "merged shadow table into target");
        self.staged = false;
        Ok(())
    }

    // Columns each written row is counted under.
    fn counted(&self) -> Vec<&Column> {
        match self.strategy {
            Strategy::Delete => self.definition.logical_keys(),
            _ => self.definition.columns.iter().collect(),
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed(self.name.clone()));
        }
        Ok(())
    }

    /// Write the values of `row`, which is of the attached shape.
    pub fn write_row(&mut self, row: &Row) -> Result<(), Error> {
        self.ensure_open()?;
        self.set_writeable()?;
        if self.strategy == Strategy::Bulk && !self.staged {
            self.stage()?;
        }

        let values: Vec<Value> = self.indices.iter().map(|&i| row.at(i).value.clone()).collect();
        let target = &self.definition.target;
        let mut p = self.persistence.borrow_mut();
        p.configure(&self.definition);

        let written_to = match self.strategy {
            Strategy::Bulk => target.temporary(),
            _ => target.clone(),
        };
        match self.strategy {
            Strategy::Fill | Strategy::Bulk => {
                let columns: Vec<&Column> = self.definition.columns.iter().collect();
                p.insert(&written_to, &columns, &values)?
            }
            Strategy::Update => p.update(target, &self.definition, &values)?,
            Strategy::Delete => {
                let keys = self.definition.logical_keys();
                let key_values: Vec<Value> = keys
                    .iter()
                    .filter_map(|k| {
                        self.definition
                            .columns
                            .iter()
                            .position(|c| c.name == k.name)
                            .map(|i| values[i].clone())
                    })
                    .collect();
                p.delete(target, &keys, &key_values)?
            }
        };

        // Buffered rows are counted once they're flushed.
        let (written, skipped) = p.take_counts(&written_to, &self.counted());
        self.written += written;
        self.skipped += skipped;
        Ok(())
    }

    /// Make written rows durable, merging staged rows into the target.
    pub fn commit_rows(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        if self.staged {
            self.merge()?;
        }
        let target = &self.definition.target;
        let mut p = self.persistence.borrow_mut();
        p.configure(&self.definition);
        p.commit(target)?;

        let (written, skipped) = p.take_counts(target, &self.counted());
        self.written += written;
        self.skipped += skipped;

        if let Some(before) = self.rows_before {
            let after = p.row_count(target)?;
            tracing::info!(table = %target, before, after, written = self.written, "committed rows");
        } else {
            tracing::debug!(table = %target, written = self.written, skipped = self.skipped, "committed rows");
        }
        Ok(())
    }

    /// Close the Datastore, dropping temporary targets. Further writes fail.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        let mut p = self.persistence.borrow_mut();
        if self.staged {
            // Uncommitted rows are discarded. The target still holds its own.
            p.drop_table(&self.definition.target.temporary())?;
            self.staged = false;
        }
        if self.definition.mode == WriteMode::Temporary {
            p.drop_table(&self.definition.target)?;
        }
        p.commit_all()?;
        self.closed = true;

        tracing::debug!(datastore = %self.name, "closed datastore");
        Ok(())
    }
}

impl Sink for Datastore {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&mut self, shape: &Row) -> anyhow::Result<()> {
        self.indices = self
            .definition
            .columns
            .iter()
            .map(|c| {
                shape.index_of(&c.name).ok_or_else(|| row::Error::NoSuchColumn {
                    name: c.name.clone(),
                })
            })
            .collect::<Result<_, _>>()
            .map_err(Error::from)?;

        self.set_writeable()?;
        Ok(())
    }

    fn write(&mut self, row: &Row) -> anyhow::Result<()> {
        Ok(self.write_row(row)?)
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        Ok(self.commit_rows()?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Persistence, SqliteAdapter};
    use row::{AggregateRole, ValueType};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn shared() -> SharedPersistence {
        Rc::new(RefCell::new(
            Persistence::open(&SqliteAdapter::new("test")).unwrap(),
        ))
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_repeated_failures_log_values_once() {
        let persistence = shared();
        let definition = PersistorDefinition::new(
            Target::new("counts"),
            vec![Column::new("n").with_type(ValueType::Integer)],
        )
        .with_mode(WriteMode::Create);

        let state = Arc::new(ExecutionState::new());
        let mut store = Datastore::new(persistence, definition).unwrap();
        store.set_state(state.clone());

        let mut row = Row::from_columns([Column::new("n")]).unwrap();
        store.attach(&row).unwrap();

        for n in ["1", "x", "y", "2"] {
            row.set("n", n).unwrap();
            store.write(&row).unwrap();
        }
        store.commit().unwrap();

        assert_eq!(store.counts(), (2, 2));
        assert_eq!(state.warnings(), 2);

        logs_assert(|lines: &[&str]| {
            let failures: Vec<_> = lines
                .iter()
                .filter(|l| l.contains("failed to insert row of table counts"))
                .collect();
            let with_values = failures.iter().filter(|l| l.contains("values=")).count();
            match (failures.len(), with_values) {
                (2, 1) => Ok(()),
                other => Err(format!("unexpected failure logs {other:?}")),
            }
        });
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_unsupported_row_aggregate_warns_once() {
        let persistence = shared();
        let definition = PersistorDefinition::new(
            Target::new("peaks"),
            vec![
                Column::new("k").with_aggregate(AggregateRole::Key),
                Column::new("v")
                    .with_type(ValueType::Integer)
                    .with_aggregate(AggregateRole::Max),
            ],
        )
        .with_aggregate(AggregateMode::Row);

        let mut store = Datastore::new(persistence.clone(), definition).unwrap();
        let mut row = Row::from_columns([Column::new("k"), Column::new("v")]).unwrap();
        store.attach(&row).unwrap();

        for v in [5, 3, 4] {
            row.set("k", "a").unwrap();
            row.set("v", v).unwrap();
            store.write(&row).unwrap();
        }
        store.commit().unwrap();

        // Falls back to overwriting with the latest value.
        let rows = persistence
            .borrow_mut()
            .fetch(r#"SELECT "k", "v" FROM "peaks""#, 0, 10)
            .unwrap();
        assert_eq!(rows, vec![vec![Value::from("a"), Value::Integer(4)]]);

        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|l| l.contains("is not supported when updating row by row")).count() {
                1 => Ok(()),
                n => Err(format!("expected one warning, got {n}")),
            }
        });
    }
}
