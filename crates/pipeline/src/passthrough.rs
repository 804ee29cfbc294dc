use super::{Error, Processor, RowSource};
use row::{Role, Row};

/// CoordinatePassthrough projects the coordinate and annex columns
/// of its input into a narrower row.
pub struct CoordinatePassthrough {
    name: String,
    input: Processor,
    row: Row,
    // Input column index of each output column.
    bindings: Vec<usize>,
}

impl CoordinatePassthrough {
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        input: Processor,
        coordinates: &[S],
        annexes: &[S],
    ) -> Result<Self, Error> {
        let name = name.into();
        let mut row = Row::new();
        let mut bindings = Vec::new();

        let columns = coordinates
            .iter()
            .map(|c| (c.as_ref(), Role::Coordinate))
            .chain(annexes.iter().map(|a| (a.as_ref(), Role::Annex)));

        for (column, role) in columns {
            let shape = input.shape();
            let Some(index) = shape.index_of(column) else {
                return Err(Error::no_such_input(&name, column, shape.names()));
            };
            let mut column = shape.at(index).clone();
            column.role = role;
            row.push(column)?;
            bindings.push(index);
        }

        Ok(Self {
            name,
            input,
            row,
            bindings,
        })
    }
}

impl RowSource for CoordinatePassthrough {
    fn name(&self) -> &str {
        &self.name
    }

    fn row(&self) -> &Row {
        &self.row
    }

    fn fill(&mut self) -> Result<bool, Error> {
        let Some(input) = self.input.next()? else {
            return Ok(false);
        };
        for (output, index) in self.bindings.iter().enumerate() {
            self.row
                .at_mut(output)
                .value
                .clone_from(&input.at(*index).value);
        }
        Ok(true)
    }

    fn close(&mut self) {
        self.input.close();
    }
}
