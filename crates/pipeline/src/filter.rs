use super::Error;
use regex::Regex;
use row::{Row, Value};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Operator tested by a Condition against a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operator {
    Equal { value: Value },
    /// Regular expression searched within the field's text.
    Like { pattern: String },
    /// Inclusive range.
    Between { min: Value, max: Value },
    In { values: Vec<Value> },
    Empty,
}

/// Whether a matching Condition accepts or denies the row.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    #[default]
    Accept,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field: String,
    #[serde(flatten)]
    pub operator: Operator,
    #[serde(default)]
    pub mode: Mode,
}

/// ScriptPredicate is an opaque, host-provided test of a whole row.
#[derive(Clone)]
pub struct ScriptPredicate {
    name: String,
    test: Rc<dyn Fn(&Row) -> anyhow::Result<bool>>,
}

impl ScriptPredicate {
    pub fn new<F>(name: impl Into<String>, test: F) -> Self
    where
        F: Fn(&Row) -> anyhow::Result<bool> + 'static,
    {
        Self {
            name: name.into(),
            test: Rc::new(test),
        }
    }
}

impl std::fmt::Debug for ScriptPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptPredicate")
            .field("name", &self.name)
            .finish()
    }
}

/// Expr is a conjunction / disjunction tree of Conditions and scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    All(Vec<Expr>),
    Any(Vec<Expr>),
    Condition(Condition),
    #[serde(skip)]
    Script(ScriptPredicate),
}

/// Filter is a named predicate over rows.
/// A Processor accepts a row only if all of its Filters accept it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub name: String,
    pub expr: Expr,
}

impl Filter {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }

    /// Resolve field names and compile patterns against `shape`.
    pub(crate) fn bind(&self, shape: &Row) -> Result<BoundFilter, Error> {
        Ok(BoundFilter {
            name: self.name.clone(),
            expr: bind_expr(&self.name, &self.expr, shape)?,
        })
    }

    /// Evaluate the Filter against a single `row`.
    pub fn matches(&self, row: &Row) -> Result<bool, Error> {
        self.bind(row)?.accepts(row)
    }
}

#[derive(Debug)]
pub(crate) struct BoundFilter {
    name: String,
    expr: Bound,
}

#[derive(Debug)]
enum Bound {
    All(Vec<Bound>),
    Any(Vec<Bound>),
    Test { index: usize, test: Test, deny: bool },
    Script(ScriptPredicate),
}

#[derive(Debug)]
enum Test {
    Equal(Value),
    Like(Regex),
    Between(Value, Value),
    In(Vec<Value>),
    Empty,
}

fn bind_expr(filter: &str, expr: &Expr, shape: &Row) -> Result<Bound, Error> {
    Ok(match expr {
        Expr::All(exprs) => Bound::All(
            exprs
                .iter()
                .map(|e| bind_expr(filter, e, shape))
                .collect::<Result<_, _>>()?,
        ),
        Expr::Any(exprs) => Bound::Any(
            exprs
                .iter()
                .map(|e| bind_expr(filter, e, shape))
                .collect::<Result<_, _>>()?,
        ),
        Expr::Condition(Condition {
            field,
            operator,
            mode,
        }) => {
            let Some(index) = shape.index_of(field) else {
                return Err(Error::no_such_input(filter, field, shape.names()));
            };
            let test = match operator {
                Operator::Equal { value } => Test::Equal(value.clone()),
                Operator::Like { pattern } => {
                    Test::Like(Regex::new(pattern).map_err(|source| Error::Pattern {
                        pattern: pattern.clone(),
                        source,
                    })?)
                }
                Operator::Between { min, max } => Test::Between(min.clone(), max.clone()),
                Operator::In { values } => Test::In(values.clone()),
                Operator::Empty => Test::Empty,
            };
            Bound::Test {
                index,
                test,
                deny: *mode == Mode::Deny,
            }
        }
        Expr::Script(script) => Bound::Script(script.clone()),
    })
}

impl BoundFilter {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn accepts(&self, row: &Row) -> Result<bool, Error> {
        eval(&self.expr, row)
    }
}

fn eval(expr: &Bound, row: &Row) -> Result<bool, Error> {
    match expr {
        Bound::All(exprs) => {
            for expr in exprs {
                if !eval(expr, row)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Bound::Any(exprs) => {
            for expr in exprs {
                if eval(expr, row)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Bound::Test { index, test, deny } => {
            let value = &row.at(*index).value;
            let matched = match test {
                Test::Equal(expect) => value.loose_eq(expect),
                Test::Like(re) => re.is_match(&value.to_string()),
                Test::Between(min, max) => {
                    !value.is_null() && value.loose_cmp(min).is_ge() && value.loose_cmp(max).is_le()
                }
                Test::In(values) => values.iter().any(|v| value.loose_eq(v)),
                Test::Empty => value.is_empty(),
            };
            Ok(matched != *deny)
        }
        Bound::Script(script) => Ok((script.test)(row)?),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use row::Column;

    fn row(k: &str, v: i64) -> Row {
        let mut row = Row::from_columns([Column::new("k"), Column::new("v")]).unwrap();
        row.assign(&[Value::from(k), Value::Integer(v)]);
        row
    }

    #[test]
    fn test_config_and_evaluation() {
        let filter: Filter = serde_json::from_value(serde_json::json!({
            "name": "regions",
            "expr": {"all": [
                {"condition": {"field": "k", "op": "like", "pattern": "^(north|south)"}},
                {"any": [
                    {"condition": {"field": "v", "op": "between", "min": 10, "max": 20}},
                    {"condition": {"field": "v", "op": "in", "values": [1, 2, 3]}},
                ]},
                {"condition": {"field": "v", "op": "empty", "mode": "deny"}},
            ]},
        }))
        .unwrap();

        assert!(filter.matches(&row("north-east", 15)).unwrap());
        assert!(filter.matches(&row("south", 2)).unwrap());
        assert!(!filter.matches(&row("south", 0)).unwrap());
        assert!(!filter.matches(&row("west", 15)).unwrap());
        assert!(!filter.matches(&row("north", 25)).unwrap());
    }

    #[test]
    fn test_script_predicate() {
        let filter = Filter::new(
            "odd",
            Expr::Script(ScriptPredicate::new("odd", |row: &Row| {
                Ok(row.value("v")?.as_number().unwrap_or_default() as i64 % 2 == 1)
            })),
        );
        assert!(filter.matches(&row("a", 3)).unwrap());
        assert!(!filter.matches(&row("a", 4)).unwrap());
    }

    #[test]
    fn test_binding_errors() {
        let filter = Filter::new(
            "f",
            Expr::Condition(Condition {
                field: "vv".to_string(),
                operator: Operator::Empty,
                mode: Mode::Accept,
            }),
        );
        insta::assert_snapshot!(
            filter.matches(&row("a", 1)).unwrap_err(),
            @"cannot bind input vv of f (did you mean v?)"
        );

        let filter = Filter::new(
            "f",
            Expr::Condition(Condition {
                field: "k".to_string(),
                operator: Operator::Like {
                    pattern: "(".to_string(),
                },
                mode: Mode::Accept,
            }),
        );
        assert!(matches!(
            filter.matches(&row("a", 1)),
            Err(Error::Pattern { .. })
        ));
    }
}
