use super::{Value, ValueType};
use serde::{Deserialize, Serialize};

/// Role of a Column within its Row.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// Coordinates identify a logical record (dimension members).
    #[default]
    Coordinate,
    /// Values are the measures carried by a record.
    Value,
    /// Annexes are informational columns riding along with coordinates.
    Annex,
    /// Levels describe the depth of a hierarchical record.
    Level,
}

/// Origin describes where a Column obtains its value on each pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    /// Fixed value, assigned once at setup.
    Constant(Value),
    /// Bound by name to a computed function or an input row column.
    Input(String),
    /// Bound to the named computed function.
    Computed(String),
}

/// AggregateRole is the behavior of a Column when several written rows
/// collapse into a single persisted row.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregateRole {
    #[default]
    None,
    Key,
    Sum,
    Min,
    Max,
    Avg,
    Count,
    #[serde(alias = "keep")]
    First,
    #[serde(alias = "put")]
    Last,
}

impl AggregateRole {
    /// SQL aggregate function implementing this role, if there is one.
    pub fn sql_function(&self) -> Option<&'static str> {
        match self {
            AggregateRole::Sum => Some("sum"),
            AggregateRole::Min => Some("min"),
            AggregateRole::Max => Some("max"),
            AggregateRole::Avg => Some("avg"),
            AggregateRole::Count => Some("count"),
            _ => None,
        }
    }
}

/// Column is a named, typed value cell of a Row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Column {
    pub name: String,
    #[serde(default, rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub role: Role,
    /// Origin of the Column's value. When absent, the Column is bound
    /// to an input of the same name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default)]
    pub aggregate: AggregateRole,
    #[serde(skip)]
    pub value: Value,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: ValueType::default(),
            role: Role::default(),
            origin: None,
            scale: None,
            precision: None,
            aggregate: AggregateRole::default(),
            value: Value::Null,
        }
    }

    /// Build a Column holding a constant `value`.
    pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            origin: Some(Origin::Constant(value.clone())),
            value,
            ..Self::new(name)
        }
    }

    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_aggregate(mut self, aggregate: AggregateRole) -> Self {
        self.aggregate = aggregate;
        self
    }

    /// Name of the input this Column binds to, if it binds by name.
    pub fn input_name(&self) -> Option<&str> {
        match &self.origin {
            None => Some(&self.name),
            Some(Origin::Input(name)) => Some(name),
            Some(Origin::Computed(_)) | Some(Origin::Constant(_)) => None,
        }
    }
}
