use super::{into_pipeline, Context, ContextManager, Error, SharedContext};
use itertools::Itertools;
use pipeline::{Processor, RowSource, Union};
use row::Row;
use std::rc::Rc;

/// LoopProcessor evaluates a union of sources once per row of its parameters.
/// Each evaluation happens in a fresh child Context, with the parameter
/// row's columns bound to the same-named declared variables.
pub struct LoopProcessor {
    name: String,
    ctx: SharedContext,
    manager: Rc<ContextManager>,
    parameters: Processor,
    sources: Vec<String>,
    row: Row,
    child: Option<SharedContext>,
    current: Option<Processor>,
}

impl LoopProcessor {
    pub fn new(
        name: impl Into<String>,
        ctx: SharedContext,
        mut parameters: Processor,
        sources: Vec<String>,
    ) -> Result<Self, Error> {
        let name = name.into();
        if sources.is_empty() {
            return Err(Error::Configuration {
                component: name,
                detail: "a loop requires at least one source".to_string(),
            });
        }
        let manager = ctx.borrow().manager().ok_or_else(|| Error::Configuration {
            component: name.clone(),
            detail: "the context manager was dropped".to_string(),
        })?;

        // The output shape is that of the union as bound to the first
        // parameter row. Without parameter rows, the current variables apply.
        let first = parameters.next()?.map(bindings);
        let (row, child, current) = match first {
            Some(first) => {
                let (child, current) = bind(&manager, &ctx, &name, &sources, &first)?;
                (shape_of(&current), Some(child), Some(current))
            }
            None => {
                let probe = manager.provide(Some(&ctx))?;
                let shape = union(&name, &probe, &sources).map(|u| shape_of(&u));
                Context::clear(&probe)?;
                (shape?, None, None)
            }
        };

        Ok(Self {
            name,
            ctx,
            manager,
            parameters,
            sources,
            row,
            child,
            current,
        })
    }

    fn release(&mut self) -> Result<(), Error> {
        if let Some(mut current) = self.current.take() {
            current.close();
        }
        match self.child.take() {
            Some(child) => Context::clear(&child),
            None => Ok(()),
        }
    }

    // Bind the next parameter row into a fresh child Context.
    fn iterate(&mut self) -> Result<bool, Error> {
        self.release()?;

        let Some(parameters) = self.parameters.next()? else {
            return Ok(false);
        };
        let bindings = bindings(parameters);

        let (child, current) = bind(&self.manager, &self.ctx, &self.name, &self.sources, &bindings)?;
        self.child = Some(child);
        self.current = Some(current);
        Ok(true)
    }
}

fn bindings(parameters: &Row) -> Vec<(String, String)> {
    parameters
        .iter()
        .map(|c| (c.name.clone(), c.value.to_string()))
        .collect()
}

fn shape_of(processor: &Processor) -> Row {
    let mut row = processor.shape().clone();
    row.clear_values();
    row
}

// Evaluate the union of `sources` in a child Context of `ctx` with `bindings`
// bound to its variables. The child is cleared again if that fails.
fn bind(
    manager: &ContextManager,
    ctx: &SharedContext,
    name: &str,
    sources: &[String],
    bindings: &[(String, String)],
) -> Result<(SharedContext, Processor), Error> {
    let child = manager.provide(Some(ctx))?;

    let undeclared = bindings
        .iter()
        .find(|(column, value)| !child.borrow_mut().set_variable(column, value.as_str()));
    let result = match undeclared {
        Some((column, _)) => Err(Error::UndeclaredVariable {
            column: column.clone(),
            source_name: name.to_string(),
        }),
        None => {
            tracing::info!(
                source = %name,
                context = %child.borrow().name(),
                variables = %bindings.iter().map(|(k, v)| format!("{k}={v}")).join(", "),
                "evaluating loop iteration"
            );
            union(name, &child, sources)
        }
    };

    match result {
        Ok(current) => Ok((child, current)),
        Err(err) => {
            Context::clear(&child)?;
            Err(err)
        }
    }
}

fn union(name: &str, ctx: &SharedContext, sources: &[String]) -> Result<Processor, Error> {
    let inputs = sources
        .iter()
        .map(|source| Context::processor(ctx, source))
        .collect::<Result<Vec<_>, _>>()?;

    let mut processor = Processor::new(Union::new(name, inputs)?);
    if let Some(state) = ctx.borrow().state() {
        processor.set_state(state.clone());
    }
    Ok(processor)
}

impl RowSource for LoopProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn row(&self) -> &Row {
        &self.row
    }

    fn fill(&mut self) -> Result<bool, pipeline::Error> {
        loop {
            if let Some(current) = &mut self.current {
                if let Some(next) = current.next()? {
                    self.row.assign(next.values());
                    return Ok(true);
                }
            }
            if !self.iterate().map_err(into_pipeline)? {
                return Ok(false);
            }
        }
    }

    fn close(&mut self) {
        self.parameters.close();
        if let Err(err) = self.release() {
            tracing::warn!(source = %self.name, error = %err, "failed to clear loop context");
        }
    }
}
