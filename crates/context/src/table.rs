use persist::SharedPersistence;
use pipeline::{Error, RowSource};
use row::{naming, Column, Row, Value};
use std::collections::VecDeque;

/// TableSource reads the rows of a query in pages of `fetch_size`.
/// The surrogate key column of keyed tables is not exposed.
pub struct TableSource {
    name: String,
    persistence: SharedPersistence,
    sql: String,
    row: Row,
    // Position of each exposed column within fetched rows.
    positions: Vec<usize>,
    fetch_size: usize,
    offset: usize,
    buffer: VecDeque<Vec<Value>>,
    exhausted: bool,
}

impl TableSource {
    pub fn new(
        name: impl Into<String>,
        persistence: SharedPersistence,
        sql: impl Into<String>,
        fetch_size: usize,
    ) -> Result<Self, Error> {
        let (name, sql) = (name.into(), sql.into());
        let described = persistence
            .borrow_mut()
            .describe(&sql)
            .map_err(anyhow::Error::from)?;

        let mut row = Row::new();
        let mut positions = Vec::with_capacity(described.len());
        for (position, (column, value_type)) in described.into_iter().enumerate() {
            if column == naming::INTERNAL_KEY {
                continue;
            }
            row.push(Column::new(column).with_type(value_type))?;
            positions.push(position);
        }
        tracing::debug!(source = %name, columns = row.len(), "described query");

        Ok(Self {
            name,
            persistence,
            sql,
            row,
            positions,
            fetch_size: fetch_size.max(1),
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }
}

impl RowSource for TableSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn row(&self) -> &Row {
        &self.row
    }

    fn fill(&mut self) -> Result<bool, Error> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .persistence
                .borrow_mut()
                .fetch(&self.sql, self.offset, self.fetch_size)
                .map_err(anyhow::Error::from)?;

            self.exhausted = page.len() < self.fetch_size;
            self.offset += page.len();
            self.buffer.extend(page);
        }

        let Some(values) = self.buffer.pop_front() else {
            return Ok(false);
        };
        for (column, position) in self.row.iter_mut().zip(&self.positions) {
            column.value = values.get(*position).cloned().unwrap_or_default();
        }
        Ok(true)
    }

    fn close(&mut self) {
        self.buffer.clear();
        self.exhausted = true;
    }
}
