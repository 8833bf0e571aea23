//! Parameter binders: per-column conversions applied when writing bound
//! parameters and when reading result values.
//!
//! The statement executor applies `write` to each bound parameter; the read
//! path applies `read` to every raw value taken out of a result row.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::Result;
use crate::error::{Error, TypeError};
use crate::schema::Column;
use crate::types::SqlType;
use crate::value::Value;

/// Conversion pair between mapped values and driver values.
pub trait ParameterBinder: Send + Sync + fmt::Debug {
    /// Convert a value before it is bound to a placeholder.
    fn write(&self, value: &Value) -> Result<Value>;

    /// Convert a raw value read from a result row.
    fn read(&self, raw: &Value) -> Result<Value>;
}

/// Binder derived from a column's [`SqlType`].
///
/// Writes pass through unchanged; reads normalize integer widths and
/// integer-encoded booleans to the declared type.
#[derive(Debug, Clone, Copy)]
pub struct DefaultBinder {
    sql_type: SqlType,
}

impl DefaultBinder {
    pub const fn new(sql_type: SqlType) -> Self {
        Self { sql_type }
    }
}

impl ParameterBinder for DefaultBinder {
    fn write(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn read(&self, raw: &Value) -> Result<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let narrow = |expected: &'static str| {
            Error::Type(TypeError {
                expected,
                actual: raw.type_name().to_string(),
                column: None,
            })
        };
        match (self.sql_type, raw.as_i64()) {
            (SqlType::BigInt, Some(v)) => Ok(Value::BigInt(v)),
            (SqlType::Integer, Some(v)) => i32::try_from(v)
                .map(Value::Int)
                .map_err(|_| narrow("INTEGER")),
            (SqlType::SmallInt, Some(v)) => i16::try_from(v)
                .map(Value::SmallInt)
                .map_err(|_| narrow("SMALLINT")),
            (SqlType::Boolean, Some(v)) => Ok(Value::Bool(v != 0)),
            _ => Ok(raw.clone()),
        }
    }
}

/// Registry resolving the binder of a column: per-column override first,
/// then per-type override, then [`DefaultBinder`].
#[derive(Default)]
pub struct BinderRegistry {
    by_column: HashMap<Column, Arc<dyn ParameterBinder>>,
    by_type: HashMap<SqlType, Arc<dyn ParameterBinder>>,
}

impl BinderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binder for one column.
    pub fn register_column(&mut self, column: &Column, binder: Arc<dyn ParameterBinder>) {
        self.by_column.insert(column.clone(), binder);
    }

    /// Register a binder for every column of a type.
    pub fn register_type(&mut self, sql_type: SqlType, binder: Arc<dyn ParameterBinder>) {
        self.by_type.insert(sql_type, binder);
    }

    /// Resolve the binder for a column.
    pub fn get_binder(&self, column: &Column) -> Arc<dyn ParameterBinder> {
        if let Some(binder) = self.by_column.get(column) {
            return Arc::clone(binder);
        }
        if let Some(binder) = self.by_type.get(&column.sql_type()) {
            return Arc::clone(binder);
        }
        Arc::new(DefaultBinder::new(column.sql_type()))
    }
}

impl fmt::Debug for BinderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinderRegistry")
            .field("column_overrides", &self.by_column.len())
            .field("type_overrides", &self.by_type.len())
            .finish()
    }
}
