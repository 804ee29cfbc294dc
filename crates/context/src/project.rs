//! Project configuration: the declared variables, connections, sources and
//! loads from which Contexts instantiate their components.

use super::{Error, Locator, Manager};
use persist::{AggregateMode, SqliteAdapter, Target, WriteMode};
use pipeline::{Filter, FunctionInput, ValueDef};
use row::{AggregateRole, Column, Value, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectConfig {
    pub name: String,
    /// Declared variables and their default values.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub loads: BTreeMap<String, LoadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectionConfig {
    Sqlite {
        /// Database file. A private in-memory database is used if absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
        /// Kept connections are opened once by the root context
        /// and shared with its child contexts.
        #[serde(default)]
        keep: bool,
    },
}

impl ConnectionConfig {
    pub fn keep(&self) -> bool {
        match self {
            ConnectionConfig::Sqlite { keep, .. } => *keep,
        }
    }

    pub fn adapter(&self, name: &str) -> SqliteAdapter {
        match self {
            ConnectionConfig::Sqlite { path, .. } => {
                let adapter = SqliteAdapter::new(name);
                match path {
                    Some(path) => adapter.with_path(path),
                    None => adapter,
                }
            }
        }
    }
}

/// SourceConfig is a source kind together with the options every source supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(flatten)]
    pub kind: SourceKind,
    /// Keep the full output in memory and replay it while nothing it depends on is dirty.
    #[serde(default)]
    pub cache: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    /// Rows to skip, and one-based number of the last row to accept (zero is unlimited).
    #[serde(default)]
    pub first: usize,
    #[serde(default)]
    pub last: usize,
    /// Recode text from one character set into another.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recode: Option<RecodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecodeConfig {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceKind {
    /// Inline rows. Text cells may reference `${variables}`.
    #[serde(rename_all = "camelCase")]
    Rows {
        columns: Vec<Column>,
        #[serde(default)]
        rows: Vec<Vec<Value>>,
    },
    /// Rows of a table or query of a connection.
    #[serde(rename_all = "camelCase")]
    Table {
        connection: String,
        #[serde(default)]
        table: Option<String>,
        #[serde(default)]
        query: Option<String>,
    },
    Transform(TransformConfig),
    /// Union of `sources`, evaluated once per row of `parameters`
    /// with that row's values bound as variables.
    #[serde(rename_all = "camelCase")]
    Loop {
        parameters: String,
        sources: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformConfig {
    pub input: String,
    #[serde(default)]
    pub functions: Vec<FunctionConfig>,
    /// Output columns, bound by name or origin to functions and input columns.
    #[serde(default)]
    pub columns: Vec<Column>,
    /// Projection of the input, used when no output columns are declared.
    #[serde(default)]
    pub coordinates: Vec<String>,
    #[serde(default)]
    pub annexes: Vec<String>,
    #[serde(default)]
    pub normalize: Option<NormalizeConfig>,
    #[serde(default)]
    pub denormalize: Option<DenormalizeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FunctionConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<FunctionInput>,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Components this function reads from, e.g. within script text.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NormalizeConfig {
    pub discriminator: String,
    pub value: String,
    pub values: Vec<ValueDef>,
    #[serde(default)]
    pub ignore_empty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DenormalizeConfig {
    pub discriminator: String,
    pub value: String,
    pub values: Vec<ValueDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoadConfig {
    pub source: String,
    pub connection: String,
    pub target: Target,
    #[serde(default)]
    pub mode: WriteMode,
    #[serde(default)]
    pub aggregate: AggregateMode,
    #[serde(default)]
    pub bulk_size: Option<usize>,
    /// Per-column overrides of the persisted source shape.
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnOverride>,
    #[serde(default)]
    pub create_key_column: bool,
    #[serde(default)]
    pub report_row_counts: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ColumnOverride {
    #[serde(default)]
    pub aggregate: Option<AggregateRole>,
    #[serde(default, rename = "type")]
    pub value_type: Option<ValueType>,
}

/// Project is a validated ProjectConfig.
#[derive(Debug, Clone)]
pub struct Project {
    config: ProjectConfig,
}

impl Project {
    pub fn new(config: ProjectConfig) -> Result<Self, Error> {
        let project = Self { config };
        project.validate()?;
        Ok(project)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Self::new(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        Self::new(serde_yaml::from_str(yaml)?)
    }

    /// Load a project file, as JSON if it has a `.json` extension and as YAML otherwise.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loading project");

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn locator(&self, manager: Manager, name: &str) -> Locator {
        Locator::new(self.name(), manager, name)
    }

    pub fn source(&self, name: &str) -> Result<&SourceConfig, Error> {
        self.config
            .sources
            .get(name)
            .ok_or_else(|| self.no_such(Manager::Sources, name))
    }

    pub fn connection(&self, name: &str) -> Result<&ConnectionConfig, Error> {
        self.config
            .connections
            .get(name)
            .ok_or_else(|| self.no_such(Manager::Connections, name))
    }

    pub fn load_config(&self, name: &str) -> Result<&LoadConfig, Error> {
        self.config
            .loads
            .get(name)
            .ok_or_else(|| self.no_such(Manager::Loads, name))
    }

    fn no_such(&self, manager: Manager, name: &str) -> Error {
        let candidates: Vec<&str> = match manager {
            Manager::Connections => self.config.connections.keys().map(String::as_str).collect(),
            Manager::Sources => self.config.sources.keys().map(String::as_str).collect(),
            Manager::Loads => self.config.loads.keys().map(String::as_str).collect(),
            Manager::Functions | Manager::Jobs => Vec::new(),
        };
        Error::no_such_component(self.locator(manager, name), candidates)
    }

    /// Names of the sources `name` reads from directly, including
    /// sources declared as dependencies of its functions.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        let Some(source) = self.config.sources.get(name) else {
            return Vec::new();
        };
        match &source.kind {
            SourceKind::Rows { .. } | SourceKind::Table { .. } => Vec::new(),
            SourceKind::Transform(transform) => std::iter::once(transform.input.as_str())
                .chain(
                    transform
                        .functions
                        .iter()
                        .flat_map(|f| f.dependencies.iter().map(String::as_str))
                        .filter(|d| self.config.sources.contains_key(*d)),
                )
                .collect(),
            SourceKind::Loop {
                parameters,
                sources,
            } => std::iter::once(parameters.as_str())
                .chain(sources.iter().map(String::as_str))
                .collect(),
        }
    }

    /// Sources depending on source `name`, directly or transitively.
    pub fn dependents(&self, name: &str) -> BTreeSet<&str> {
        let mut found = BTreeSet::new();
        let mut pending = vec![name.to_string()];

        while let Some(current) = pending.pop() {
            for source in self.config.sources.keys() {
                let depends = self
                    .dependencies(source)
                    .iter()
                    .any(|dependency| *dependency == current);
                if depends && found.insert(source.as_str()) {
                    pending.push(source.clone());
                }
            }
        }
        found
    }

    // Every reference must resolve.
    fn validate(&self) -> Result<(), Error> {
        for (name, source) in &self.config.sources {
            for dependency in self.dependencies(name) {
                self.source(dependency)?;
            }
            if let SourceKind::Transform(transform) = &source.kind {
                for dependency in transform.functions.iter().flat_map(|f| &f.dependencies) {
                    if !self.config.connections.contains_key(dependency) {
                        self.source(dependency)?;
                    }
                }
            }
            if let SourceKind::Table {
                connection,
                table,
                query,
            } = &source.kind
            {
                self.connection(connection)?;
                if table.is_none() == query.is_none() {
                    return Err(Error::Configuration {
                        component: self.locator(Manager::Sources, name).to_string(),
                        detail: "exactly one of table or query is required".to_string(),
                    });
                }
            }
        }
        for load in self.config.loads.values() {
            self.source(&load.source)?;
            self.connection(&load.connection)?;
        }
        for name in self.config.sources.keys() {
            self.check_acyclic(name, &mut Vec::new())?;
        }
        Ok(())
    }

    fn check_acyclic<'s>(&'s self, name: &'s str, path: &mut Vec<&'s str>) -> Result<(), Error> {
        if path.contains(&name) {
            return Err(Error::CyclicSource(
                self.locator(Manager::Sources, name).to_string(),
            ));
        }
        path.push(name);
        for dependency in self.dependencies(name) {
            self.check_acyclic(dependency, path)?;
        }
        path.pop();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PROJECT: &str = r#"
name: sales
variables:
  region: north
connections:
  db:
    type: sqlite
    keep: true
sources:
  regions:
    type: rows
    columns: [{name: region}]
    rows: [[north], [south]]
    cache: true
  orders:
    type: table
    connection: db
    query: SELECT * FROM orders WHERE region = '${region}'
    first: 1
  totals:
    type: transform
    input: orders
    coordinates: [region]
    filters:
      - name: nonempty
        expr: {condition: {field: region, op: empty, mode: deny}}
loads:
  fact:
    source: totals
    connection: db
    target: {table: fact}
    aggregate: bulk
    columns:
      amount: {aggregate: sum, type: number}
"#;

    #[test]
    fn test_parse_project() {
        let project = Project::from_yaml(PROJECT).unwrap();
        let config = project.config();

        assert_eq!(project.name(), "sales");
        assert_eq!(config.variables["region"], "north");
        assert!(config.connections["db"].keep());
        assert!(config.sources["regions"].cache);
        assert_eq!(config.sources["orders"].first, 1);
        assert_eq!(config.sources["totals"].filters.len(), 1);
        assert_eq!(project.dependencies("totals"), vec!["orders"]);

        let load = project.load_config("fact").unwrap();
        assert_eq!(load.aggregate, AggregateMode::Bulk);
        assert_eq!(
            load.columns["amount"].aggregate,
            Some(AggregateRole::Sum)
        );
    }

    #[test]
    fn test_unresolved_references() {
        let broken = PROJECT.replace("input: orders", "input: order");
        insta::assert_snapshot!(
            Project::from_yaml(&broken).unwrap_err(),
            @"no component sales.sources.order (did you mean orders?)"
        );

        let broken = PROJECT.replace("query: SELECT", "table: orders\n    query: SELECT");
        insta::assert_snapshot!(
            Project::from_yaml(&broken).unwrap_err(),
            @"invalid configuration of sales.sources.orders: exactly one of table or query is required"
        );

        let broken = PROJECT.replace("input: orders", "input: totals");
        insta::assert_snapshot!(
            Project::from_yaml(&broken).unwrap_err(),
            @"source sales.sources.totals depends on itself"
        );
    }
}
