//! Computed functions, which supply values of computed columns.

use super::Error;
use row::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// FunctionInput is a named input of a Function.
/// Inputs with a constant are never bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FunctionInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<Value>,
}

impl FunctionInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constant: None,
        }
    }

    pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            constant: Some(value.into()),
        }
    }
}

/// Function computes a value from its inputs once per pulled row.
pub trait Function {
    fn name(&self) -> &str;

    fn inputs(&self) -> &[FunctionInput];

    fn value_type(&self) -> ValueType {
        ValueType::Any
    }

    /// Evaluate over `args`, which are ordered as `inputs()`.
    /// `row_number` is the one-based number of the input row.
    fn evaluate(&mut self, args: &[Value], row_number: usize) -> anyhow::Result<Value>;

    fn close(&mut self) {}
}

/// ScriptFunction adapts a host-provided callable into a Function.
pub struct ScriptFunction {
    name: String,
    inputs: Vec<FunctionInput>,
    value_type: ValueType,
    body: Box<dyn FnMut(&[Value]) -> anyhow::Result<Value>>,
}

impl ScriptFunction {
    pub fn new<F>(name: impl Into<String>, inputs: Vec<FunctionInput>, body: F) -> Self
    where
        F: FnMut(&[Value]) -> anyhow::Result<Value> + 'static,
    {
        Self {
            name: name.into(),
            inputs,
            value_type: ValueType::Any,
            body: Box::new(body),
        }
    }

    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }
}

impl Function for ScriptFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &[FunctionInput] {
        &self.inputs
    }

    fn value_type(&self) -> ValueType {
        self.value_type
    }

    fn evaluate(&mut self, args: &[Value], _row_number: usize) -> anyhow::Result<Value> {
        (self.body)(args)
    }
}

#[derive(Debug)]
enum Kind {
    Concat { separator: String },
    Sum,
    Upper,
    Lower,
    RowNumber,
    Constant(Value),
}

#[derive(Debug)]
struct Builtin {
    name: String,
    inputs: Vec<FunctionInput>,
    kind: Kind,
}

impl Function for Builtin {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &[FunctionInput] {
        &self.inputs
    }

    fn value_type(&self) -> ValueType {
        match self.kind {
            Kind::Concat { .. } | Kind::Upper | Kind::Lower => ValueType::Text,
            Kind::Sum => ValueType::Number,
            Kind::RowNumber => ValueType::Integer,
            Kind::Constant(_) => ValueType::Any,
        }
    }

    fn evaluate(&mut self, args: &[Value], row_number: usize) -> anyhow::Result<Value> {
        Ok(match &self.kind {
            Kind::Concat { separator } => Value::Text(
                args.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(separator),
            ),
            Kind::Sum => {
                let mut sum = 0.0;
                for arg in args.iter().filter(|a| !a.is_null()) {
                    sum += arg
                        .as_number()
                        .ok_or_else(|| anyhow::anyhow!("{arg:?} is not a number"))?;
                }
                Value::Number(sum)
            }
            Kind::Upper => Value::Text(first_text(args).to_uppercase()),
            Kind::Lower => Value::Text(first_text(args).to_lowercase()),
            Kind::RowNumber => Value::Integer(row_number as i64),
            Kind::Constant(value) => value.clone(),
        })
    }
}

fn first_text(args: &[Value]) -> String {
    args.first().map(ToString::to_string).unwrap_or_default()
}

/// Constructor builds a Function of a registered type
/// from its name, inputs and parameters.
pub type Constructor =
    Box<dyn Fn(&str, Vec<FunctionInput>, &serde_json::Value) -> Result<Box<dyn Function>, Error>>;

/// Registry maps function type tags to their constructors.
pub struct Registry {
    constructors: BTreeMap<String, Constructor>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self {
            constructors: BTreeMap::new(),
        };
        for tag in ["concat", "sum", "upper", "lower", "rownumber", "constant"] {
            registry.register(
                tag,
                Box::new(
                    move |name: &str, inputs: Vec<FunctionInput>, params: &serde_json::Value| {
                        builtin(tag, name, inputs, params)
                    },
                ),
            );
        }
        registry
    }
}

impl Registry {
    /// Register a constructor for type `tag`, replacing any prior one.
    pub fn register(&mut self, tag: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(tag.into(), constructor);
    }

    pub fn create(
        &self,
        tag: &str,
        name: &str,
        inputs: Vec<FunctionInput>,
        params: &serde_json::Value,
    ) -> Result<Box<dyn Function>, Error> {
        match self.constructors.get(tag) {
            Some(constructor) => constructor(name, inputs, params),
            None => Err(Error::UnknownFunction(tag.to_string())),
        }
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

fn builtin(
    tag: &str,
    name: &str,
    inputs: Vec<FunctionInput>,
    params: &serde_json::Value,
) -> Result<Box<dyn Function>, Error> {
    let kind = match tag {
        "concat" => Kind::Concat {
            separator: params
                .get("separator")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        "sum" => Kind::Sum,
        "upper" => Kind::Upper,
        "lower" => Kind::Lower,
        "rownumber" => Kind::RowNumber,
        "constant" => {
            let value = params.get("value").cloned().unwrap_or_default();
            Kind::Constant(serde_json::from_value(value).map_err(anyhow::Error::from)?)
        }
        _ => return Err(Error::UnknownFunction(tag.to_string())),
    };
    Ok(Box::new(Builtin {
        name: name.to_string(),
        inputs,
        kind,
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_builtins() {
        let registry = Registry::default();
        let inputs = || vec![FunctionInput::new("a"), FunctionInput::constant("b", "x")];

        let mut concat = registry
            .create("concat", "c", inputs(), &serde_json::json!({"separator": "-"}))
            .unwrap();
        assert_eq!(concat.value_type(), ValueType::Text);
        assert_eq!(
            concat.evaluate(&[Value::Integer(1), Value::from("x")], 1).unwrap(),
            Value::from("1-x")
        );

        let mut sum = registry
            .create("sum", "s", inputs(), &serde_json::Value::Null)
            .unwrap();
        assert_eq!(
            sum.evaluate(&[Value::Integer(1), Value::from("2.5"), Value::Null], 1)
                .unwrap(),
            Value::Number(3.5)
        );
        assert!(sum.evaluate(&[Value::from("x")], 1).is_err());

        let mut number = registry
            .create("rownumber", "n", Vec::new(), &serde_json::Value::Null)
            .unwrap();
        assert_eq!(number.evaluate(&[], 7).unwrap(), Value::Integer(7));

        let mut constant = registry
            .create("constant", "k", Vec::new(), &serde_json::json!({"value": 42}))
            .unwrap();
        assert_eq!(constant.evaluate(&[], 1).unwrap(), Value::Integer(42));

        insta::assert_snapshot!(
            registry.create("nope", "n", Vec::new(), &serde_json::Value::Null).err().unwrap(),
            @r###"unknown function type "nope""###
        );
    }

    #[test]
    fn test_registered_script() {
        let mut registry = Registry::default();
        registry.register(
            "double",
            Box::new(
                |name: &str,
                 inputs: Vec<FunctionInput>,
                 _params: &serde_json::Value|
                 -> Result<Box<dyn Function>, Error> {
                    Ok(Box::new(ScriptFunction::new(name, inputs, |args| {
                        Ok(Value::Number(args[0].as_number().unwrap_or_default() * 2.0))
                    })))
                },
            ),
        );
        assert!(registry.tags().any(|t| t == "double"));

        let mut f = registry
            .create("double", "d", vec![FunctionInput::new("x")], &serde_json::Value::Null)
            .unwrap();
        assert_eq!(f.name(), "d");
        assert_eq!(f.evaluate(&[Value::Integer(4)], 1).unwrap(), Value::Number(8.0));
    }
}
