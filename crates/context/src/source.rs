use super::{Context, Error, Locator, LoopProcessor, SharedContext, SourceConfig, SourceKind, TableSource, TransformConfig};
use pipeline::{
    CoordinatePassthrough, Denormalizer, Normalizer, Processor, Recoder, RowSource, Rows,
    TransformInput,
};
use row::{Column, Origin, Row, Value};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone)]
struct Cached {
    shape: Row,
    rows: Vec<Vec<Value>>,
}

/// Source is the live instance of a configured source within one Context.
/// Each call to `processor` builds a fresh Processor chain over it,
/// or replays its cached output.
pub struct Source {
    locator: Locator,
    config: SourceConfig,
    cache: Rc<RefCell<Option<Cached>>>,
    dirty: bool,
}

impl Source {
    pub fn new(locator: Locator, config: SourceConfig) -> Self {
        Self {
            locator,
            config,
            cache: Rc::new(RefCell::new(None)),
            dirty: false,
        }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn is_marked_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_cached(&self) -> bool {
        self.cache.borrow().is_some()
    }

    /// Drop cached output, keeping the source clean.
    pub fn clear_cache(&mut self) {
        self.cache.borrow_mut().take();
    }

    /// Drop cached output and mark the source dirty.
    pub fn invalidate(&mut self) {
        self.cache.borrow_mut().take();
        self.dirty = true;
    }

    pub fn processor(&mut self, ctx: &SharedContext) -> Result<Processor, Error> {
        let name = self.locator.name.clone();
        let stale = self.dirty || {
            let c = ctx.borrow();
            let project = c.project().clone();
            let dirty = project
                .dependencies(&name)
                .into_iter()
                .any(|dependency| c.is_dirty(dependency));
            dirty
        };
        let state = ctx.borrow().state().cloned();

        if self.config.cache && !stale {
            if let Some(cached) = self.cache.borrow().clone() {
                tracing::debug!(source = %self.locator, rows = cached.rows.len(), "replaying cached rows");
                let mut processor = Processor::new(Rows::new(self.locator.to_string(), cached.shape, cached.rows));
                if let Some(state) = state {
                    processor.set_state(state);
                }
                return Ok(processor);
            }
        }

        let mut processor = self.build(ctx)?;
        if let Some(state) = &state {
            processor.set_state(state.clone());
        }
        for filter in &self.config.filters {
            processor.add_filter(filter)?;
        }
        processor.set_last_row(self.config.last);
        processor.set_first_row(self.config.first)?;
        if let Some(recode) = &self.config.recode {
            processor.set_recoder(Recoder::new(&recode.from, &recode.to)?);
        }

        if self.config.cache {
            self.cache.borrow_mut().take();
            let mut recorder = Processor::new(Recorder::new(processor, self.cache.clone()));
            if let Some(state) = state {
                recorder.set_state(state);
            }
            processor = recorder;
        }
        self.dirty = false;

        Ok(processor)
    }

    fn build(&self, ctx: &SharedContext) -> Result<Processor, Error> {
        let display = self.locator.to_string();

        match &self.config.kind {
            SourceKind::Rows { columns, rows } => {
                let shape = Row::from_columns(columns.iter().cloned())?;
                let c = ctx.borrow();
                let rows = rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|value| match value {
                                Value::Text(text) => c.substitute(text).map(Value::Text),
                                value => Ok(value.clone()),
                            })
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Processor::new(Rows::new(display, shape, rows)))
            }
            SourceKind::Table {
                connection,
                table,
                query,
            } => {
                let persistence = Context::persistence(ctx, connection)?;
                let sql = match (table, query) {
                    (Some(table), _) => {
                        let target = persist::Target::new(ctx.borrow().substitute(table)?);
                        let table = persistence.borrow().table_name(&target);
                        format!("SELECT * FROM {table}")
                    }
                    (None, Some(query)) => ctx.borrow().substitute(query)?,
                    (None, None) => {
                        return Err(Error::Configuration {
                            component: display,
                            detail: "exactly one of table or query is required".to_string(),
                        })
                    }
                };
                let fetch_size = ctx.borrow().fetch_size();
                let source = TableSource::new(display, persistence, sql, fetch_size)?;
                Ok(Processor::new(source))
            }
            SourceKind::Transform(transform) => self.transform(ctx, transform),
            SourceKind::Loop {
                parameters,
                sources,
            } => {
                let parameters = Context::processor(ctx, parameters)?;
                let source = LoopProcessor::new(display, ctx.clone(), parameters, sources.clone())?;
                Ok(Processor::new(source))
            }
        }
    }

    fn transform(&self, ctx: &SharedContext, config: &TransformConfig) -> Result<Processor, Error> {
        let display = self.locator.to_string();
        let mut processor = Context::processor(ctx, &config.input)?;

        if !config.functions.is_empty() || !config.columns.is_empty() {
            let registry = ctx.borrow().manager().map(|m| m.functions()).ok_or_else(|| {
                Error::Configuration {
                    component: display.clone(),
                    detail: "the context manager was dropped".to_string(),
                }
            })?;

            let mut functions = Vec::with_capacity(config.functions.len());
            for function in &config.functions {
                functions.push(registry.create(
                    &function.kind,
                    &function.name,
                    function.inputs.clone(),
                    &function.params,
                )?);
            }

            let row = if config.columns.is_empty() {
                // Every input column, followed by every computed function.
                let inputs = processor.shape().iter().map(|column| Column {
                    origin: None,
                    value: Value::Null,
                    ..column.clone()
                });
                let computed = functions.iter().map(|f| {
                    Column::new(f.name())
                        .with_type(f.value_type())
                        .with_origin(Origin::Computed(f.name().to_string()))
                });
                let columns: Vec<Column> = inputs.chain(computed).collect();
                Row::from_columns(columns)?
            } else {
                Row::from_columns(config.columns.iter().cloned())?
            };
            processor = Processor::new(TransformInput::new(display.clone(), processor, functions, row)?);
        } else if !config.coordinates.is_empty() || !config.annexes.is_empty() {
            processor = Processor::new(CoordinatePassthrough::new(
                display.clone(),
                processor,
                &config.coordinates,
                &config.annexes,
            )?);
        }

        if let Some(normalize) = &config.normalize {
            processor = Processor::new(Normalizer::new(
                display.clone(),
                processor,
                &normalize.discriminator,
                &normalize.value,
                &normalize.values,
                normalize.ignore_empty,
            )?);
        }
        if let Some(denormalize) = &config.denormalize {
            processor = Processor::new(Denormalizer::new(
                display.clone(),
                processor,
                &denormalize.discriminator,
                &denormalize.value,
                denormalize.values.clone(),
            )?);
        }
        Ok(processor)
    }
}

/// Recorder passes the rows of its input through, and stores them
/// into the source cache once the input is completely exhausted.
struct Recorder {
    name: String,
    input: Processor,
    row: Row,
    rows: Vec<Vec<Value>>,
    cache: Rc<RefCell<Option<Cached>>>,
}

impl Recorder {
    fn new(input: Processor, cache: Rc<RefCell<Option<Cached>>>) -> Self {
        let mut row = input.shape().clone();
        row.clear_values();
        Self {
            name: input.name().to_string(),
            input,
            row,
            rows: Vec::new(),
            cache,
        }
    }
}

impl RowSource for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn row(&self) -> &Row {
        &self.row
    }

    fn fill(&mut self) -> Result<bool, pipeline::Error> {
        if let Some(next) = self.input.next()? {
            self.row.assign(next.values());
            self.rows.push(next.values().cloned().collect());
            return Ok(true);
        }

        // A stopped execution truncates its output, which mustn't be cached.
        if self.input.state().map_or(true, |s| s.is_executable()) {
            let mut shape = self.row.clone();
            shape.clear_values();
            let rows = std::mem::take(&mut self.rows);

            tracing::debug!(source = %self.name, rows = rows.len(), "cached source rows");
            *self.cache.borrow_mut() = Some(Cached { shape, rows });
        }
        Ok(false)
    }

    fn close(&mut self) {
        self.input.close();
    }
}
