use super::{Column, Error, Value};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SHAPE: AtomicU64 = AtomicU64::new(1);

/// ShapeId identifies one declaration of a Row shape.
/// Every Row construction, clone, or redeclaration draws a new ShapeId,
/// so two rows share a ShapeId only if they are the same row object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(u64);

impl ShapeId {
    fn next() -> Self {
        Self(NEXT_SHAPE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Row is an ordered sequence of uniquely-named Columns.
/// Column order is significant: it's the physical order used for
/// persistence and positional binding.
#[derive(Debug)]
pub struct Row {
    columns: Vec<Column>,
    shape: ShapeId,
}

impl Default for Row {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Row {
    fn clone(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            shape: ShapeId::next(),
        }
    }
}

impl Row {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            shape: ShapeId::next(),
        }
    }

    pub fn from_columns<I>(columns: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Column>,
    {
        let mut row = Self::new();
        for column in columns {
            row.push(column)?;
        }
        Ok(row)
    }

    /// Append `column`, failing if its name is already taken.
    pub fn push(&mut self, column: Column) -> Result<(), Error> {
        if self.index_of(&column.name).is_some() {
            return Err(Error::DuplicateColumn { name: column.name });
        }
        self.columns.push(column);
        Ok(())
    }

    /// Remove and return the named column.
    pub fn remove(&mut self, name: &str) -> Option<Column> {
        let index = self.index_of(name)?;
        Some(self.columns.remove(index))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn shape(&self) -> ShapeId {
        self.shape
    }

    /// Declare a new shape for this row, as reshaping processors do
    /// when their set of columns changes.
    pub fn redeclare(&mut self) {
        self.shape = ShapeId::next();
    }

    /// Two rows have the same layout if their names, types and roles
    /// match position by position.
    pub fn same_layout(&self, other: &Row) -> bool {
        self.len() == other.len()
            && self.columns.iter().zip(other.columns.iter()).all(|(l, r)| {
                l.name == r.name && l.value_type == r.value_type && l.role == r.role
            })
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Column at `index`. Panics if `index` is out of bounds.
    pub fn at(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    /// Mutable Column at `index`. Panics if `index` is out of bounds.
    pub fn at_mut(&mut self, index: usize) -> &mut Column {
        &mut self.columns[index]
    }

    /// Value of the named column.
    pub fn value(&self, name: &str) -> Result<&Value, Error> {
        self.get(name)
            .map(|c| &c.value)
            .ok_or_else(|| Error::NoSuchColumn {
                name: name.to_string(),
            })
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        match self.get_mut(name) {
            Some(column) => {
                column.value = value.into();
                Ok(())
            }
            None => Err(Error::NoSuchColumn {
                name: name.to_string(),
            }),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Column> {
        self.columns.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Column> {
        self.columns.iter_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|c| &c.value)
    }

    /// Assign values positionally. Extra values are ignored and
    /// columns without a value are left untouched.
    pub fn assign<'v, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = &'v Value>,
    {
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.value.clone_from(value);
        }
    }

    /// Reset every column to null.
    pub fn clear_values(&mut self) {
        for column in &mut self.columns {
            column.value = Value::Null;
        }
    }

    /// JSON object of column names to values, in column order.
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = serde_json::to_value(&column.value).unwrap_or(serde_json::Value::Null);
            out.insert(column.name.clone(), value);
        }
        serde_json::Value::Object(out)
    }
}

impl<'r> IntoIterator for &'r Row {
    type Item = &'r Column;
    type IntoIter = std::slice::Iter<'r, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}
