//! Opaque where-clause fragments.

use relmap_core::Value;

/// A pre-built SQL condition with its own positional values.
///
/// The fragment is appended verbatim after the identifier predicate of a
/// graph select; its `?` placeholders are numbered after the identifier
/// placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    sql: String,
    values: Vec<Value>,
}

impl Criteria {
    pub fn new(sql: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}
