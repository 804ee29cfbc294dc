use row::Row;
use std::cell::RefCell;
use std::rc::Rc;

/// Sink receives every row accepted by the Processors it's attached to.
pub trait Sink {
    fn name(&self) -> &str;

    /// Called once when the Sink is attached to a Processor producing
    /// rows of the given shape.
    fn attach(&mut self, _shape: &Row) -> anyhow::Result<()> {
        Ok(())
    }

    fn write(&mut self, row: &Row) -> anyhow::Result<()>;

    /// Make everything written so far durable.
    fn commit(&mut self) -> anyhow::Result<()>;
}

/// Sinks are shared between the Processors writing to them
/// and the Context which owns them.
pub type SharedSink = Rc<RefCell<dyn Sink>>;
