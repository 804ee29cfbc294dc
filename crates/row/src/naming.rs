//! Fixed identifiers reserved for internal bookkeeping columns and tables.

/// Prefix of every internal identifier. User columns and variables
/// carrying this prefix are treated as hidden parameters.
pub const INTERNAL_PREFIX: &str = "_etl_";

/// Name of the surrogate key column of keyed tables.
pub const INTERNAL_KEY: &str = "_etl_key";

/// Name of the column carrying the accepted-row count of a processor.
pub const ROW_COUNT: &str = "_etl_rowcount";

/// Suffix of shadow tables used for bulk aggregation.
pub const TEMPORARY_SUFFIX: &str = "_etl_temporary";

/// Map `name` into the internal namespace.
pub fn internal(name: &str) -> String {
    format!("{INTERNAL_PREFIX}{name}")
}

pub fn is_internal(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX)
}
