use super::{Context, Error, Manager, SharedContext, SourceKind};
use persist::PersistorDefinition;

/// Load persists every row of a source into a target table of a connection.
#[derive(Debug, Clone)]
pub struct Load {
    name: String,
}

impl Load {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the Load within `ctx`, returning the number of rows accepted from its source.
    pub fn run(&self, ctx: &SharedContext) -> Result<usize, Error> {
        let (project, bulk_size) = {
            let c = ctx.borrow();
            (c.project().clone(), c.bulk_size())
        };
        let config = project.load_config(&self.name)?;
        let locator = project.locator(Manager::Loads, &self.name);

        let mut processor = Context::processor(ctx, &config.source)?;

        let mut definition = PersistorDefinition::from_shape(config.target.clone(), processor.shape());
        for (name, over) in &config.columns {
            let Some(column) = definition.columns.iter_mut().find(|c| &c.name == name) else {
                return Err(Error::Configuration {
                    component: locator.to_string(),
                    detail: format!("source {} has no column {name}", config.source),
                });
            };
            if let Some(aggregate) = over.aggregate {
                column.aggregate = aggregate;
            }
            if let Some(value_type) = over.value_type {
                column.value_type = value_type;
            }
        }
        definition.mode = config.mode;
        definition.aggregate = config.aggregate;
        definition.bulk_size = config.bulk_size.unwrap_or(bulk_size);
        definition.create_key_column = config.create_key_column;
        definition.report_row_counts = config.report_row_counts;

        let datastore = Context::datastore(ctx, &config.connection, definition)?;
        processor.add_sink(datastore)?;

        tracing::info!(load = %locator, source = %config.source, target = %config.target, "running load");
        let rows = processor.run()?;

        // Cached reads of the written connection are now stale.
        let mut c = ctx.borrow_mut();
        for (name, source) in &project.config().sources {
            if matches!(&source.kind, SourceKind::Table { connection, .. } if connection == &config.connection) {
                c.mark_dirty(name)?;
            }
        }

        tracing::info!(load = %locator, rows, "load complete");
        Ok(rows)
    }
}
