use super::{Error, Function, Processor, RowSource};
use row::{naming, Origin, Row, ShapeId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Constant,
    Source(usize),
    Function(usize),
    RowCount,
}

/// TransformInput produces rows of declared columns, each bound by name
/// to a computed Function or to a column of the input row.
///
/// Bindings are resolved at construction and recomputed whenever the
/// input declares a new row shape between pulls. The reserved name
/// `_etl_rowcount` binds to the number of rows accepted by the input.
pub struct TransformInput {
    name: String,
    input: Processor,
    functions: Vec<Box<dyn Function>>,
    row: Row,
    outputs: Vec<Binding>,
    arguments: Vec<Vec<Binding>>,
    bound: ShapeId,
    // Per-pull memo of function results, and re-entry guard.
    memo: Vec<Option<Value>>,
    evaluating: Vec<bool>,
}

impl TransformInput {
    pub fn new(
        name: impl Into<String>,
        input: Processor,
        functions: Vec<Box<dyn Function>>,
        row: Row,
    ) -> Result<Self, Error> {
        let mut this = Self {
            name: name.into(),
            bound: input.shape().shape(),
            input,
            memo: vec![None; functions.len()],
            evaluating: vec![false; functions.len()],
            functions,
            row,
            outputs: Vec::new(),
            arguments: Vec::new(),
        };
        this.bind()?;
        Ok(this)
    }

    fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name() == name)
    }

    // Computed functions take priority over columns of the input row.
    fn find_input(&self, name: &str) -> Result<Binding, Error> {
        if let Some(index) = self.function_index(name) {
            return Ok(Binding::Function(index));
        }
        let shape = self.input.shape();
        if let Some(index) = shape.index_of(name) {
            return Ok(Binding::Source(index));
        }
        if name == naming::ROW_COUNT {
            return Ok(Binding::RowCount);
        }
        let candidates = shape
            .names()
            .chain(self.functions.iter().map(|f| f.name()));
        Err(Error::no_such_input(&self.name, name, candidates))
    }

    fn bind(&mut self) -> Result<(), Error> {
        let shape = self.input.shape();
        let mut arguments = Vec::with_capacity(self.functions.len());

        for function in &self.functions {
            let mut bindings = Vec::with_capacity(function.inputs().len());
            for input in function.inputs() {
                let binding = if input.constant.is_some() {
                    Binding::Constant
                } else if input.name == function.name() {
                    // A function may read the input row's column of its own name.
                    match shape.index_of(&input.name) {
                        Some(index) => Binding::Source(index),
                        None => self.find_input(&input.name)?,
                    }
                } else {
                    self.find_input(&input.name)?
                };
                bindings.push(binding);
            }
            arguments.push(bindings);
        }
        self.arguments = arguments;
        self.detect_cycles()?;

        let mut outputs = Vec::with_capacity(self.row.len());
        for column in self.row.iter() {
            let binding = match &column.origin {
                Some(Origin::Constant(_)) => Binding::Constant,
                Some(Origin::Computed(function)) => match self.function_index(function) {
                    Some(index) => Binding::Function(index),
                    None => {
                        return Err(Error::no_such_input(
                            &self.name,
                            function,
                            self.functions.iter().map(|f| f.name()),
                        ))
                    }
                },
                Some(Origin::Input(name)) => self.find_input(name)?,
                None => self.find_input(&column.name)?,
            };
            outputs.push(binding);
        }
        for (column, binding) in self.row.iter_mut().zip(&outputs) {
            if let (Binding::Constant, Some(Origin::Constant(value))) = (binding, &column.origin) {
                column.value = value.clone();
            }
        }
        self.outputs = outputs;
        self.bound = self.input.shape().shape();

        tracing::debug!(processor = %self.name, outputs = self.outputs.len(), "bound transform inputs");
        Ok(())
    }

    // Walk the computed-input closure of every function, tracking names
    // currently being resolved. Reaching such a name again is a cycle,
    // unless the input row itself provides that name.
    fn detect_cycles(&self) -> Result<(), Error> {
        for (index, function) in self.functions.iter().enumerate() {
            let mut denied = vec![function.name()];
            let mut path = vec![index];
            self.walk(index, &mut denied, &mut path)?;
        }
        Ok(())
    }

    fn walk<'s>(
        &'s self,
        index: usize,
        denied: &mut Vec<&'s str>,
        path: &mut Vec<usize>,
    ) -> Result<(), Error> {
        let function = &self.functions[index];
        let allowed = self.input.shape();

        for (input, binding) in function.inputs().iter().zip(&self.arguments[index]) {
            if *binding == Binding::Constant {
                continue;
            }
            let name = input.name.as_str();
            if denied.contains(&name) && allowed.index_of(name).is_none() {
                return Err(Error::CyclicDependency {
                    function: function.name().to_string(),
                    input: name.to_string(),
                });
            }
            let Binding::Function(next) = *binding else {
                continue;
            };
            if path.contains(&next) {
                // Names satisfied by the input row are treated as safe, so a
                // loop through such a name isn't reported here. Evaluation
                // guards against re-entering a function instead.
                tracing::debug!(processor = %self.name, function = name, "cycle through self-referenced input not checked");
                continue;
            }
            denied.push(name);
            path.push(next);
            self.walk(next, denied, path)?;
            path.pop();
            denied.pop();
        }
        Ok(())
    }

    fn evaluate(&mut self, index: usize, row_number: usize) -> Result<Value, Error> {
        if let Some(value) = &self.memo[index] {
            return Ok(value.clone());
        }
        if self.evaluating[index] {
            return Err(Error::RecursiveEvaluation {
                function: self.functions[index].name().to_string(),
            });
        }
        self.evaluating[index] = true;

        let bindings = self.arguments[index].clone();
        let mut args = Vec::with_capacity(bindings.len());
        for (position, binding) in bindings.into_iter().enumerate() {
            args.push(match binding {
                Binding::Constant => self.functions[index].inputs()[position]
                    .constant
                    .clone()
                    .unwrap_or_default(),
                Binding::Source(column) => self.input.current().at(column).value.clone(),
                Binding::Function(other) => self.evaluate(other, row_number)?,
                Binding::RowCount => Value::Integer(row_number as i64),
            });
        }

        let function = &mut self.functions[index];
        let value = function
            .evaluate(&args, row_number)
            .map_err(|err| err.context(format!("evaluating function {}", function.name())))?;

        self.evaluating[index] = false;
        self.memo[index] = Some(value.clone());
        Ok(value)
    }
}

impl RowSource for TransformInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn row(&self) -> &Row {
        &self.row
    }

    fn fill(&mut self) -> Result<bool, Error> {
        if self.input.next()?.is_none() {
            return Ok(false);
        }
        if self.input.shape().shape() != self.bound {
            self.bind()?;
        }
        self.memo.iter_mut().for_each(|m| *m = None);
        self.evaluating.iter_mut().for_each(|e| *e = false);

        let row_number = self.input.rows_accepted();
        for output in 0..self.outputs.len() {
            let value = match self.outputs[output] {
                Binding::Constant => continue,
                Binding::Source(column) => self.input.current().at(column).value.clone(),
                Binding::Function(index) => self.evaluate(index, row_number)?,
                Binding::RowCount => Value::Integer(row_number as i64),
            };
            self.row.at_mut(output).value = value;
        }
        Ok(true)
    }

    fn close(&mut self) {
        for function in &mut self.functions {
            function.close();
        }
        self.input.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::functions::{FunctionInput, ScriptFunction};
    use crate::Rows;
    use row::Column;

    fn input() -> Processor {
        let shape = Row::from_columns([Column::new("a"), Column::new("b")]).unwrap();
        Processor::new(Rows::new(
            "input",
            shape,
            vec![
                vec![Value::Integer(1), Value::Integer(10)],
                vec![Value::Integer(2), Value::Integer(20)],
            ],
        ))
    }

    fn add(name: &str, inputs: &[&str]) -> Box<dyn Function> {
        Box::new(ScriptFunction::new(
            name,
            inputs.iter().map(|i| FunctionInput::new(*i)).collect(),
            |args| {
                Ok(Value::Number(
                    args.iter().filter_map(Value::as_number).sum::<f64>(),
                ))
            },
        ))
    }

    #[test]
    fn test_function_binding() {
        let row = Row::from_columns([
            Column::new("a"),
            Column::new("total").with_origin(Origin::Computed("total".to_string())),
            Column::new("doubled"),
            Column::constant("unit", "kg"),
            Column::new("renamed").with_origin(Origin::Input("b".to_string())),
            Column::new("n").with_origin(Origin::Input(naming::ROW_COUNT.to_string())),
        ])
        .unwrap();

        // `doubled` reads `total`, which is computed from the input row.
        let functions = vec![add("total", &["a", "b"]), add("doubled", &["total", "total"])];

        let mut p = Processor::new(TransformInput::new("t", input(), functions, row).unwrap());
        let rows: Vec<_> = std::iter::from_fn(|| p.next().unwrap().map(Row::to_json)).collect();

        assert_eq!(
            rows,
            vec![
                serde_json::json!({"a": 1, "total": 11.0, "doubled": 22.0, "unit": "kg", "renamed": 10, "n": 1}),
                serde_json::json!({"a": 2, "total": 22.0, "doubled": 44.0, "unit": "kg", "renamed": 20, "n": 2}),
            ]
        );
    }

    // Yields (a, b) rows whose column order flips after the first row.
    struct Flipping {
        row: Row,
        pulled: i32,
    }

    impl RowSource for Flipping {
        fn name(&self) -> &str {
            "flipping"
        }

        fn row(&self) -> &Row {
            &self.row
        }

        fn fill(&mut self) -> Result<bool, Error> {
            self.pulled += 1;
            let n = self.pulled;
            match n {
                1 => (),
                2 => self.row = Row::from_columns([Column::new("b"), Column::new("a")]).unwrap(),
                // Same layout, declared anew.
                3 => self.row.redeclare(),
                _ => return Ok(false),
            }
            self.row.set("a", n).unwrap();
            self.row.set("b", n * 10).unwrap();
            Ok(true)
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_rebinding_follows_input_shape() {
        let input = Flipping {
            row: Row::from_columns([Column::new("a"), Column::new("b")]).unwrap(),
            pulled: 0,
        };
        let row = Row::from_columns([
            Column::new("a"),
            Column::new("b"),
            Column::new("total").with_origin(Origin::Computed("total".to_string())),
        ])
        .unwrap();
        let functions = vec![add("total", &["a", "b"])];

        let mut p = Processor::new(
            TransformInput::new("t", Processor::new(input), functions, row).unwrap(),
        );
        let rows: Vec<_> = std::iter::from_fn(|| p.next().unwrap().map(Row::to_json)).collect();

        assert_eq!(
            rows,
            vec![
                serde_json::json!({"a": 1, "b": 10, "total": 11.0}),
                serde_json::json!({"a": 2, "b": 20, "total": 22.0}),
                serde_json::json!({"a": 3, "b": 30, "total": 33.0}),
            ]
        );
    }

    #[test]
    fn test_self_reference_is_not_a_cycle() {
        // `a` reads the input row's column `a`, not itself.
        let row = Row::from_columns([Column::new("a")]).unwrap();
        let functions = vec![add("a", &["a", "b"])];

        let mut p = Processor::new(TransformInput::new("t", input(), functions, row).unwrap());
        assert_eq!(
            p.next().unwrap().unwrap().value("a").unwrap(),
            &Value::Number(11.0)
        );
    }

    #[test]
    fn test_cycle_through_functions() {
        let row = Row::from_columns([Column::new("f")]).unwrap();
        let functions = vec![add("f", &["g"]), add("g", &["h"]), add("h", &["f"])];

        let err = TransformInput::new("t", input(), functions, row).err().unwrap();
        insta::assert_snapshot!(err, @"cyclic dependency detected in input f of function h");
    }

    #[test]
    fn test_cycle_through_self_reference_fails_at_evaluation() {
        // `a` reads column `a` of the input row and function `b`, while `b`
        // reads function `a`. Both names are also input columns, so the
        // loop passes setup and is caught when evaluated.
        let row = Row::from_columns([Column::new("a")]).unwrap();
        let functions = vec![add("a", &["a", "b"]), add("b", &["a"])];

        let mut p = Processor::new(TransformInput::new("t", input(), functions, row).unwrap());
        let err = p.next().unwrap_err();
        assert!(matches!(
            err,
            Error::Processing { ref source, .. } if matches!(**source, Error::RecursiveEvaluation { .. })
        ));
    }

    #[test]
    fn test_unknown_input() {
        let row = Row::from_columns([Column::new("bb")]).unwrap();
        let err = TransformInput::new("t", input(), Vec::new(), row).err().unwrap();
        insta::assert_snapshot!(err, @"cannot bind input bb of t (did you mean b?)");
    }
}
