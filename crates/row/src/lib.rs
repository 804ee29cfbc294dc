mod column;
pub mod naming;
mod row;
mod value;

pub use column::{AggregateRole, Column, Origin, Role};
pub use row::{Row, ShapeId};
pub use value::{Value, ValueType};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("column {name} is already defined in this row")]
    DuplicateColumn { name: String },
    #[error("row has no column named {name}")]
    NoSuchColumn { name: String },
    #[error("cannot convert {value:?} to {to:?}")]
    Coercion { value: Value, to: ValueType },
}
