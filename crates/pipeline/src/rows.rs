use super::{Error, Processor, RowSource};
use row::{Row, Value};

/// Rows produces a fixed, in-memory sequence of rows.
pub struct Rows {
    name: String,
    row: Row,
    data: std::vec::IntoIter<Vec<Value>>,
}

impl Rows {
    pub fn new(name: impl Into<String>, shape: Row, data: Vec<Vec<Value>>) -> Self {
        Self {
            name: name.into(),
            row: shape,
            data: data.into_iter(),
        }
    }
}

impl RowSource for Rows {
    fn name(&self) -> &str {
        &self.name
    }

    fn row(&self) -> &Row {
        &self.row
    }

    fn fill(&mut self) -> Result<bool, Error> {
        match self.data.next() {
            Some(values) => {
                self.row.assign(&values);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Union concatenates the rows of several processors, in order.
/// Its shape is that of the first input, and values of later inputs
/// are assigned positionally.
pub struct Union {
    name: String,
    row: Row,
    inputs: Vec<Processor>,
    index: usize,
}

impl Union {
    pub fn new(name: impl Into<String>, inputs: Vec<Processor>) -> Result<Self, Error> {
        let name = name.into();
        let Some(first) = inputs.first() else {
            return Err(Error::configuration(&name, "a union requires at least one input"));
        };
        let mut row = first.shape().clone();
        row.clear_values();

        Ok(Self {
            name,
            row,
            inputs,
            index: 0,
        })
    }
}

impl RowSource for Union {
    fn name(&self) -> &str {
        &self.name
    }

    fn row(&self) -> &Row {
        &self.row
    }

    fn fill(&mut self) -> Result<bool, Error> {
        while let Some(input) = self.inputs.get_mut(self.index) {
            if let Some(next) = input.next()? {
                self.row.assign(next.values());
                return Ok(true);
            }
            self.index += 1;
        }
        Ok(false)
    }

    fn close(&mut self) {
        for input in &mut self.inputs {
            input.close();
        }
    }
}
