use super::Error;
use row::{naming, AggregateRole, Column, Row};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Target locates a physical table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table: String,
}

impl Target {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Shadow table used to stage rows of this Target for bulk aggregation.
    pub fn temporary(&self) -> Target {
        Target {
            schema: self.schema.clone(),
            table: format!("{}{}", self.table, naming::TEMPORARY_SUFFIX),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.table),
            None => f.write_str(&self.table),
        }
    }
}

/// WriteMode decides how a sink prepares its target table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteMode {
    /// Drop the table if it exists and create it anew.
    Create,
    /// Scratch table which is (re)created, and dropped when the sink closes.
    Temporary,
    /// Verify the existing table and delete all of its rows.
    Update,
    /// Delete rows matching written rows by their logical keys.
    Delete,
    /// Append to the table, creating it if required.
    #[default]
    Insert,
    Add,
    /// Straight append without aggregation.
    Fill,
}

/// AggregateMode decides how written rows collapse by their keys.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregateMode {
    /// Rows are inserted as-is: the caller guarantees they're pre-aggregated.
    #[default]
    None,
    /// Each row updates the target row matching its keys, or is inserted.
    Row,
    /// Rows are staged in a shadow table and aggregated on commit.
    Bulk,
}

/// PersistorDefinition describes one write operation into a Target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersistorDefinition {
    pub target: Target,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub mode: WriteMode,
    #[serde(default)]
    pub aggregate: AggregateMode,
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    /// Use identifiers as given, without quoting.
    #[serde(default)]
    pub plain_names: bool,
    /// Created tables carry a leading surrogate key column.
    #[serde(default)]
    pub create_key_column: bool,
    /// Report row counts of the target before and after commit.
    #[serde(default)]
    pub report_row_counts: bool,
}

fn default_bulk_size() -> usize {
    100
}

impl PersistorDefinition {
    pub fn new(target: Target, columns: Vec<Column>) -> Self {
        Self {
            target,
            columns,
            mode: WriteMode::default(),
            aggregate: AggregateMode::default(),
            bulk_size: default_bulk_size(),
            plain_names: false,
            create_key_column: false,
            report_row_counts: false,
        }
    }

    /// Definition persisting every column of `shape`.
    pub fn from_shape(target: Target, shape: &Row) -> Self {
        let columns = shape
            .iter()
            .filter(|c| c.name != naming::INTERNAL_KEY)
            .map(|c| {
                let mut column = c.clone();
                column.value = row::Value::Null;
                column
            })
            .collect();
        Self::new(target, columns)
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_aggregate(mut self, aggregate: AggregateMode) -> Self {
        self.aggregate = aggregate;
        self
    }

    pub fn with_bulk_size(mut self, bulk_size: usize) -> Self {
        self.bulk_size = bulk_size;
        self
    }

    /// Columns explicitly declared as keys.
    pub fn keys(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| c.aggregate == AggregateRole::Key)
    }

    /// Columns overwritten or aggregated on update.
    /// Columns without a role are treated as `last`.
    pub fn to_set(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| !matches!(c.aggregate, AggregateRole::Key | AggregateRole::First))
    }

    /// Columns keeping their first written value.
    pub fn to_keep(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| c.aggregate == AggregateRole::First)
    }

    /// Columns identifying a logical record for updates and deletes:
    /// the declared keys or, failing those, every data column.
    pub fn logical_keys(&self) -> Vec<&Column> {
        let keys: Vec<_> = self.keys().collect();
        if !keys.is_empty() {
            return keys;
        }
        self.columns
            .iter()
            .filter(|c| c.name != naming::INTERNAL_KEY)
            .collect()
    }

    /// Whether written rows must be aggregated by their keys.
    pub fn do_aggregate(&self) -> bool {
        self.aggregate != AggregateMode::None
            && self.keys().next().is_some()
            && (self.to_set().next().is_some() || self.to_keep().next().is_some())
    }

    pub fn validate(&self) -> Result<(), Error> {
        let target = self.target.to_string();
        let err = |detail: String| Error::Configuration {
            target: target.clone(),
            detail,
        };

        if self.columns.is_empty() {
            return Err(err("no columns to persist".to_string()));
        }
        let mut names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(err(format!("column {} is defined more than once", pair[0])));
        }
        if self.aggregate != AggregateMode::None
            && matches!(
                self.mode,
                WriteMode::Temporary | WriteMode::Delete | WriteMode::Fill
            )
        {
            return Err(err(format!(
                "aggregate mode {:?} cannot be combined with write mode {:?}",
                self.aggregate, self.mode
            )));
        }
        if self.bulk_size == 0 {
            return Err(err("bulk size must be at least one".to_string()));
        }
        Ok(())
    }
}
