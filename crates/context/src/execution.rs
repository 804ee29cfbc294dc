use super::{Context, ContextManager, Error, Load};
use pipeline::{ExecutionState, Status};
use serde::Serialize;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

/// Subject of an Execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// Run the named load.
    Load(String),
    /// Pull every row of the named source, e.g. to validate it.
    Source(String),
}

/// Outcome summarizes a finished Execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub status: Status,
    pub code: i32,
    pub rows: usize,
    pub warnings: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
}

/// Execution runs one Subject within a fresh root Context,
/// and clears that Context once the run completes.
pub struct Execution {
    manager: Rc<ContextManager>,
    subject: Subject,
    variables: BTreeMap<String, String>,
    state: Arc<ExecutionState>,
}

impl Execution {
    pub fn new(manager: Rc<ContextManager>, subject: Subject) -> Self {
        Self {
            manager,
            subject,
            variables: BTreeMap::new(),
            state: Arc::new(ExecutionState::new()),
        }
    }

    pub fn with_variables<I, K, V>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.variables
            .extend(variables.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// State shared with every processor of this Execution.
    /// Stopping it cancels the run cooperatively.
    pub fn state(&self) -> Arc<ExecutionState> {
        self.state.clone()
    }

    pub fn execute(&self) -> Outcome {
        self.state.set_status(Status::Running);
        tracing::info!(subject = ?self.subject, "starting execution");

        let rows = match self.run() {
            Ok(rows) => rows,
            Err(err) => {
                let err = anyhow::Error::from(err);
                tracing::error!(subject = ?self.subject, error = ?err, "execution failed");
                self.state.add_error(format!("{err:#}"));
                self.state.set_status(Status::Failed);
                0
            }
        };

        let status = self.state.conclude();
        let outcome = Outcome {
            status,
            code: status.code(),
            rows,
            warnings: self.state.warnings(),
            errors: self.state.errors(),
            first_error: self.state.first_error(),
        };
        tracing::info!(subject = ?self.subject, ?status, rows, warnings = outcome.warnings, errors = outcome.errors, "finished execution");
        outcome
    }

    fn run(&self) -> Result<usize, Error> {
        let ctx = self.manager.provide(None)?;
        {
            let mut c = ctx.borrow_mut();
            c.add_variables(self.variables.clone());
            c.set_state(self.state.clone());
        }

        let result = match &self.subject {
            Subject::Load(name) => Load::new(name.as_str()).run(&ctx),
            Subject::Source(name) => Context::processor(&ctx, name)
                .and_then(|mut processor| Ok(processor.run()?)),
        };
        let fail_on_warnings = ctx.borrow().parameter("failOnWarnings") == Some("true");

        // Datastores commit and close as the context is cleared,
        // which may itself fail or add warnings.
        let cleared = Context::clear(&ctx);
        let rows = result?;
        cleared?;

        if fail_on_warnings && self.state.warnings() != 0 {
            self.state.add_error(format!(
                "{} warnings were raised and failOnWarnings is set",
                self.state.warnings()
            ));
            self.state.set_status(Status::Failed);
        }
        Ok(rows)
    }
}
