use super::{Error, Processor, RowSource};
use row::{Column, Role, Row, Value, ValueType};
use serde::{Deserialize, Serialize};

/// ValueDef relates a value column of a wide row to the discriminator
/// value identifying it in the narrow, normalized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ValueDef {
    pub column: String,
    /// Discriminator value of the column. Defaults to the column name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, rename = "type")]
    pub value_type: ValueType,
}

impl ValueDef {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            key: None,
            value_type: ValueType::Any,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.column)
    }
}

/// Denormalizer pivots discriminator / value pairs of consecutive input
/// rows sharing the same remaining columns into one wide output row,
/// with one value column per ValueDef.
pub struct Denormalizer {
    name: String,
    input: Processor,
    row: Row,
    discriminator: usize,
    value: usize,
    coordinates: Vec<usize>,
    defs: Vec<ValueDef>,
    matched: Vec<bool>,
    // First input row of the next group, read ahead while closing the current one.
    pending: Option<Vec<Value>>,
    exhausted: bool,
    closed: bool,
}

impl Denormalizer {
    pub fn new(
        name: impl Into<String>,
        input: Processor,
        discriminator: &str,
        value: &str,
        defs: Vec<ValueDef>,
    ) -> Result<Self, Error> {
        let name = name.into();
        if defs.is_empty() {
            return Err(Error::configuration(&name, "no value columns to denormalize"));
        }
        let shape = input.shape();
        let lookup = |column: &str| {
            shape
                .index_of(column)
                .ok_or_else(|| Error::no_such_input(&name, column, shape.names()))
        };
        let discriminator = lookup(discriminator)?;
        let value = lookup(value)?;

        let mut row = Row::new();
        let mut coordinates = Vec::new();
        for (index, column) in shape.iter().enumerate() {
            if index != discriminator && index != value {
                row.push(column.clone())?;
                coordinates.push(index);
            }
        }
        for def in &defs {
            let mut column = Column::new(&def.column)
                .with_role(Role::Value)
                .with_type(def.value_type);
            column.value = Value::default_for(def.value_type);
            row.push(column)?;
        }

        Ok(Self {
            name,
            input,
            row,
            discriminator,
            value,
            coordinates,
            matched: vec![false; defs.len()],
            defs,
            pending: None,
            exhausted: false,
            closed: false,
        })
    }

    fn pull(&mut self) -> Result<Option<Vec<Value>>, Error> {
        if self.exhausted {
            return Ok(None);
        }
        match self.input.next()? {
            Some(row) => Ok(Some(row.values().cloned().collect())),
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    fn same_group(&self, values: &[Value]) -> bool {
        self.coordinates
            .iter()
            .enumerate()
            .all(|(output, index)| self.row.at(output).value == values[*index])
    }

    fn apply(&mut self, values: &[Value]) -> Result<(), Error> {
        let key = values[self.discriminator].to_string();
        let Some(def) = self.defs.iter().position(|d| d.key() == key) else {
            tracing::debug!(processor = %self.name, %key, "discriminator matches no value column");
            return Ok(());
        };
        let value = values[self.value].coerce(self.defs[def].value_type)?;
        self.row.at_mut(self.coordinates.len() + def).value = value;
        self.matched[def] = true;
        Ok(())
    }
}

impl RowSource for Denormalizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn row(&self) -> &Row {
        &self.row
    }

    fn fill(&mut self) -> Result<bool, Error> {
        let first = match self.pending.take() {
            Some(first) => first,
            None => match self.pull()? {
                Some(first) => first,
                None => return Ok(false),
            },
        };

        let n = self.coordinates.len();
        for (output, index) in self.coordinates.iter().enumerate() {
            self.row.at_mut(output).value.clone_from(&first[*index]);
        }
        for (offset, def) in self.defs.iter().enumerate() {
            self.row.at_mut(n + offset).value = Value::default_for(def.value_type);
        }
        self.apply(&first)?;

        while let Some(next) = self.pull()? {
            if !self.same_group(&next) {
                self.pending = Some(next);
                break;
            }
            self.apply(&next)?;
        }
        Ok(true)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.input.close();

        let unmatched: Vec<&str> = self
            .defs
            .iter()
            .zip(&self.matched)
            .filter(|(_, matched)| !**matched)
            .map(|(def, _)| def.key())
            .collect();

        if !unmatched.is_empty() {
            tracing::warn!(
                processor = %self.name,
                ?unmatched,
                "some value columns were never matched by a discriminator and hold defaults",
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Rows;

    #[test]
    #[tracing_test::traced_test]
    fn test_unmatched_value_is_reported_once() {
        let shape = Row::from_columns([Column::new("k"), Column::new("d"), Column::new("v")]).unwrap();
        let input = Processor::new(Rows::new(
            "narrow",
            shape,
            vec![
                vec!["a".into(), "x".into(), 1.into()],
                vec!["b".into(), "x".into(), 2.into()],
            ],
        ));
        let defs = vec![ValueDef::new("x"), ValueDef::new("y")];
        let mut p = Processor::new(Denormalizer::new("pivot", input, "d", "v", defs).unwrap());

        assert_eq!(p.run().unwrap(), 2);
        p.close();
        assert!(p.next().unwrap().is_none());

        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("never matched"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one warning, got {n}")),
            }
        });
        assert!(logs_contain("unmatched=[\"y\"]"));
    }
}
