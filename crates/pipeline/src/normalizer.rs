use super::{Error, Processor, RowSource, ValueDef};
use row::{Column, Role, Row, Value, ValueType};

/// Normalizer unpivots the value columns of its input: each input row
/// yields one output row per value column, carrying the input's other
/// columns, a discriminator naming the value column, and its value.
pub struct Normalizer {
    name: String,
    input: Processor,
    row: Row,
    // Input index of each passed-through column (output positions 0..n).
    coordinates: Vec<usize>,
    // Input index and discriminator value of each value column.
    values: Vec<(usize, Value)>,
    cursor: usize,
    ignore_empty: bool,
}

impl Normalizer {
    pub fn new(
        name: impl Into<String>,
        input: Processor,
        discriminator: &str,
        value: &str,
        values: &[ValueDef],
        ignore_empty: bool,
    ) -> Result<Self, Error> {
        let name = name.into();
        if values.is_empty() {
            return Err(Error::configuration(&name, "no value columns to normalize"));
        }
        let shape = input.shape();

        let mut bound = Vec::with_capacity(values.len());
        let mut value_type = None;
        for def in values {
            let Some(index) = shape.index_of(&def.column) else {
                return Err(Error::no_such_input(&name, &def.column, shape.names()));
            };
            bound.push((index, Value::from(def.key())));

            let ty = shape.at(index).value_type;
            value_type = match value_type {
                None => Some(ty),
                Some(prior) if prior == ty => Some(ty),
                Some(_) => Some(ValueType::Any),
            };
        }

        let mut row = Row::new();
        let mut coordinates = Vec::new();
        for (index, column) in shape.iter().enumerate() {
            if bound.iter().any(|(i, _)| *i == index) {
                continue;
            }
            row.push(column.clone())?;
            coordinates.push(index);
        }

        for (column, role, ty) in [
            (discriminator, Role::Coordinate, ValueType::Text),
            (value, Role::Value, value_type.unwrap_or_default()),
        ] {
            if row.index_of(column).is_some() {
                return Err(Error::configuration(
                    &name,
                    format!("column {column} is already defined by the input"),
                ));
            }
            row.push(Column::new(column).with_role(role).with_type(ty))?;
        }

        Ok(Self {
            name,
            input,
            row,
            coordinates,
            values: bound,
            cursor: 0,
            ignore_empty,
        })
    }
}

impl RowSource for Normalizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn row(&self) -> &Row {
        &self.row
    }

    fn fill(&mut self) -> Result<bool, Error> {
        let n = self.coordinates.len();

        loop {
            if self.cursor == 0 || self.cursor > self.values.len() {
                let Some(input) = self.input.next()? else {
                    return Ok(false);
                };
                for (output, index) in self.coordinates.iter().enumerate() {
                    self.row
                        .at_mut(output)
                        .value
                        .clone_from(&input.at(*index).value);
                }
                self.cursor = 1;
            }

            let (index, key) = &self.values[self.cursor - 1];
            self.cursor += 1;

            let value = &self.input.current().at(*index).value;
            if self.ignore_empty && value.is_empty() {
                continue;
            }
            self.row.at_mut(n).value.clone_from(key);
            self.row.at_mut(n + 1).value.clone_from(value);
            return Ok(true);
        }
    }

    fn close(&mut self) {
        self.input.close();
    }
}
