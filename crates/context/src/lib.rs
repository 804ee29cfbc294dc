mod context;
mod execution;
mod lint;
mod load;
mod locator;
mod logging;
mod loop_processor;
mod manager;
mod project;
mod settings;
mod source;
mod table;

pub use context::{Context, SharedContext};
pub use execution::{Execution, Outcome, Subject};
pub use lint::lint_dependencies;
pub use load::Load;
pub use locator::{Locator, Manager};
pub use logging::{init_logging, LogArgs, LogFormat, LogLevel};
pub use loop_processor::LoopProcessor;
pub use manager::{ContextManager, DEFAULT_CONTEXT};
pub use project::{
    ColumnOverride, ConnectionConfig, DenormalizeConfig, FunctionConfig, LoadConfig,
    NormalizeConfig, Project, ProjectConfig, RecodeConfig, SourceConfig, SourceKind,
    TransformConfig,
};
pub use settings::Settings;
pub use source::Source;
pub use table::TableSource;

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Pipeline(#[from] pipeline::Error),
    #[error(transparent)]
    Persist(#[from] persist::Error),
    #[error(transparent)]
    Row(#[from] row::Error),
    #[error("failed to parse JSON project")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse YAML project")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid locator: {0}")]
    Locator(String),
    #[error("no component {locator}{}", closest_hint(.closest))]
    NoSuchComponent {
        locator: String,
        closest: Option<String>,
    },
    #[error("invalid configuration of {component}: {detail}")]
    Configuration { component: String, detail: String },
    #[error("source {0} depends on itself")]
    CyclicSource(String),
    #[error("column {column} of {source_name} is not declared as a variable")]
    UndeclaredVariable { column: String, source_name: String },
    #[error("variable {0} referenced by ${{{0}}} has no value")]
    UnknownVariable(String),
    #[error("context {0} was already cleared")]
    Cleared(String),
    #[error("the default context cannot be cleared")]
    ClearDefault,
}

fn closest_hint(closest: &Option<String>) -> String {
    match closest {
        Some(closest) => format!(" (did you mean {closest}?)"),
        None => String::new(),
    }
}

impl Error {
    pub fn no_such_component<'c, I>(locator: Locator, candidates: I) -> Self
    where
        I: IntoIterator<Item = &'c str>,
    {
        let closest = candidates
            .into_iter()
            .map(|c| (strsim::osa_distance(c, &locator.name), c))
            .filter(|(distance, _)| *distance <= 3)
            .min()
            .map(|(_, c)| c.to_string());

        Error::NoSuchComponent {
            locator: locator.to_string(),
            closest,
        }
    }
}

/// Wrap a context Error for a pipeline boundary, such as RowSource::fill.
pub(crate) fn into_pipeline(err: Error) -> pipeline::Error {
    match err {
        Error::Pipeline(err) => err,
        err => pipeline::Error::Other(err.into()),
    }
}
