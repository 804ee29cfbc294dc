use super::filter::BoundFilter;
use super::{Error, ExecutionState, Filter, Recoder, SharedSink};
use row::Row;
use std::sync::Arc;

/// RowSource is the raw producer behind a Processor.
///
/// A RowSource owns a single Row which it mutates in place on each fill.
/// Reshaping sources own the upstream Processor they pull from, forming
/// a singly-linked chain back to a root producer.
pub trait RowSource {
    /// Display name of the source, used in logs and errors.
    fn name(&self) -> &str;

    /// The row filled by the last successful `fill`,
    /// or the empty post-setup shape before the first one.
    fn row(&self) -> &Row;

    /// Advance to the next raw row. Returns false once the source is exhausted.
    fn fill(&mut self) -> Result<bool, Error>;

    /// Release resources held by this source and close upstream processors.
    fn close(&mut self) {}
}

/// Processor is a pull-based cursor over a RowSource, which layers
/// windowing, filtering, recoding, persistence to sinks and
/// cooperative cancellation over the raw producer.
pub struct Processor {
    name: String,
    source: Box<dyn RowSource>,
    filters: Vec<BoundFilter>,
    sinks: Vec<SharedSink>,
    last: Option<usize>,
    accepted: usize,
    state: Option<Arc<ExecutionState>>,
    recoder: Option<Recoder>,
    recoded: Option<Row>,
    stale: bool,
    closed: bool,
    finished: bool,
}

impl Processor {
    pub fn new<S: RowSource + 'static>(source: S) -> Self {
        Self::boxed(Box::new(source))
    }

    pub fn boxed(source: Box<dyn RowSource>) -> Self {
        Self {
            name: source.name().to_string(),
            source,
            filters: Vec::new(),
            sinks: Vec::new(),
            last: None,
            accepted: 0,
            state: None,
            recoder: None,
            recoded: None,
            stale: false,
            closed: false,
            finished: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Override the display name used in logs and errors.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_state(&mut self, state: Arc<ExecutionState>) {
        self.state = Some(state);
    }

    pub fn with_state(mut self, state: Arc<ExecutionState>) -> Self {
        self.set_state(state);
        self
    }

    pub fn state(&self) -> Option<&Arc<ExecutionState>> {
        self.state.as_ref()
    }

    pub fn set_recoder(&mut self, recoder: Recoder) {
        self.recoder = Some(recoder);
    }

    /// Attach `filter`. Rows are accepted only if every attached Filter accepts them.
    pub fn add_filter(&mut self, filter: &Filter) -> Result<(), Error> {
        self.filters.push(filter.bind(self.source.row())?);
        Ok(())
    }

    /// Attach `sink`, which receives every accepted row.
    pub fn add_sink(&mut self, sink: SharedSink) -> Result<(), Error> {
        sink.borrow_mut().attach(self.source.row())?;
        self.sinks.push(sink);
        Ok(())
    }

    /// Skip the first `n` acceptable rows.
    /// Skipped rows are counted as accepted but not written to sinks.
    pub fn set_first_row(&mut self, n: usize) -> Result<(), Error> {
        while self.accepted < n && self.is_executable() {
            match self.advance() {
                Ok(true) => self.accepted += 1,
                Ok(false) => break,
                Err(err) => return Err(self.fail(err)),
            }
        }
        Ok(())
    }

    /// Stop after `n` accepted rows. Zero means unlimited.
    pub fn set_last_row(&mut self, n: usize) {
        self.last = if n == 0 { None } else { Some(n) };
    }

    /// Number of rows accepted so far.
    pub fn rows_accepted(&self) -> usize {
        self.accepted
    }

    /// Row shape as produced by the source, without recoding.
    pub fn shape(&self) -> &Row {
        self.source.row()
    }

    /// The current row, recoded if a Recoder is configured.
    pub fn current(&mut self) -> &Row {
        let Some(recoder) = &self.recoder else {
            return self.source.row();
        };
        let row = self.recoded.get_or_insert_with(|| self.source.row().clone());

        if self.stale {
            row.assign(self.source.row().values());
            recoder.recode_row(row);
            self.stale = false;
        }
        row
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_executable(&self) -> bool {
        !self.closed
            && self
                .state
                .as_ref()
                .map(|s| s.is_executable())
                .unwrap_or(true)
    }

    /// Advance exactly once, returning the next accepted row
    /// or None once the source is exhausted or execution was stopped.
    pub fn next(&mut self) -> Result<Option<&Row>, Error> {
        if self.finished || !self.is_executable() {
            return Ok(None);
        }

        match self.pull() {
            Ok(true) => Ok(Some(self.current())),
            Ok(false) => {
                tracing::debug!(processor = %self.name, rows = self.accepted, "processor exhausted");
                self.finished = true;
                self.close();
                self.commit()?;
                Ok(None)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Pull every remaining row, returning the number of rows accepted.
    pub fn run(&mut self) -> Result<usize, Error> {
        while self.next()?.is_some() {}
        Ok(self.accepted)
    }

    /// Close this processor and every upstream processor of its chain.
    /// Closing is idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.source.close();
    }

    fn pull(&mut self) -> Result<bool, Error> {
        if !self.advance()? {
            return Ok(false);
        }
        self.accepted += 1;
        self.stale = true;
        self.persist()?;
        Ok(true)
    }

    // Pull raw rows until one passes all filters or the window is exhausted.
    fn advance(&mut self) -> Result<bool, Error> {
        loop {
            if matches!(self.last, Some(last) if self.accepted >= last) {
                return Ok(false);
            }
            if !self.source.fill()? {
                return Ok(false);
            }
            if self.accepts()? {
                return Ok(true);
            }
        }
    }

    fn accepts(&self) -> Result<bool, Error> {
        let row = self.source.row();
        for filter in &self.filters {
            if !filter.accepts(row)? {
                tracing::trace!(processor = %self.name, filter = filter.name(), "row rejected");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn persist(&mut self) -> Result<(), Error> {
        if self.sinks.is_empty() {
            return Ok(());
        }
        let sinks = self.sinks.clone();
        let row = self.current();

        for sink in sinks {
            sink.borrow_mut().write(row)?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        for sink in &self.sinks {
            sink.borrow_mut().commit()?;
        }
        Ok(())
    }

    // Log and wrap a failure, giving sinks a best-effort chance to commit.
    fn fail(&mut self, err: Error) -> Error {
        let row = self.accepted + 1;
        tracing::error!(chain = %self.name, row, error = %err, "failed to process row");

        if self.is_executable() {
            if let Err(commit_err) = self.commit() {
                tracing::warn!(chain = %self.name, error = %commit_err, "best-effort commit failed");
            }
        }
        self.finished = true;

        Error::Processing {
            chain: self.name.clone(),
            row,
            source: Box::new(err),
        }
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("name", &self.name)
            .field("accepted", &self.accepted)
            .field("closed", &self.closed)
            .finish()
    }
}
