mod denormalizer;
mod filter;
pub mod functions;
mod normalizer;
mod passthrough;
mod processor;
mod recode;
mod rows;
mod sink;
mod state;
mod transform;

pub use denormalizer::{Denormalizer, ValueDef};
pub use filter::{Condition, Expr, Filter, Mode, Operator, ScriptPredicate};
pub use functions::{Function, FunctionInput};
pub use normalizer::Normalizer;
pub use passthrough::CoordinatePassthrough;
pub use processor::{Processor, RowSource};
pub use recode::Recoder;
pub use rows::{Rows, Union};
pub use sink::{SharedSink, Sink};
pub use state::{ExecutionState, Status};
pub use transform::TransformInput;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Row(#[from] row::Error),
    #[error("cannot bind input {name} of {processor}{}", closest_hint(.closest))]
    NoSuchInput {
        processor: String,
        name: String,
        closest: Option<String>,
    },
    #[error("cyclic dependency detected in input {input} of function {function}")]
    CyclicDependency { function: String, input: String },
    #[error("function {function} was re-entered while evaluating its own inputs")]
    RecursiveEvaluation { function: String },
    #[error("invalid configuration of {processor}: {detail}")]
    Configuration { processor: String, detail: String },
    #[error("invalid pattern {pattern:?}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("unknown character set {0:?}")]
    Charset(String),
    #[error("unknown function type {0:?}")]
    UnknownFunction(String),
    #[error("failed to process row {row} of {chain}")]
    Processing {
        chain: String,
        row: usize,
        #[source]
        source: Box<Error>,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn closest_hint(closest: &Option<String>) -> String {
    match closest {
        Some(name) => format!(" (did you mean {name}?)"),
        None => String::new(),
    }
}

impl Error {
    /// Build a NoSuchInput error, suggesting the nearest of `candidates`.
    pub fn no_such_input<'c, I>(processor: &str, name: &str, candidates: I) -> Self
    where
        I: IntoIterator<Item = &'c str>,
    {
        let closest = candidates
            .into_iter()
            .map(|c| (strsim::osa_distance(c, name), c))
            .filter(|(distance, _)| *distance <= 3)
            .min()
            .map(|(_, c)| c.to_string());

        Error::NoSuchInput {
            processor: processor.to_string(),
            name: name.to_string(),
            closest,
        }
    }

    pub fn configuration(processor: &str, detail: impl Into<String>) -> Self {
        Error::Configuration {
            processor: processor.to_string(),
            detail: detail.into(),
        }
    }
}
