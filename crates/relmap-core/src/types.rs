//! Column value type tags.

use serde::{Deserialize, Serialize};

/// Value type tag carried by every column.
///
/// Sizes live on the column itself; `sql_name` combines both into the
/// dialect-neutral type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    SmallInt,
    Integer,
    BigInt,
    Double,
    Decimal,
    Boolean,
    VarChar,
    Text,
    Blob,
    Date,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
}

impl SqlType {
    /// Get the SQL type name for this type and an optional size.
    pub fn sql_name(&self, size: Option<u32>) -> String {
        match (self, size) {
            (SqlType::SmallInt, _) => "SMALLINT".to_string(),
            (SqlType::Integer, _) => "INTEGER".to_string(),
            (SqlType::BigInt, _) => "BIGINT".to_string(),
            (SqlType::Double, _) => "DOUBLE PRECISION".to_string(),
            (SqlType::Decimal, Some(precision)) => format!("DECIMAL({})", precision),
            (SqlType::Decimal, None) => "DECIMAL".to_string(),
            (SqlType::Boolean, _) => "BOOLEAN".to_string(),
            (SqlType::VarChar, Some(len)) => format!("VARCHAR({})", len),
            (SqlType::VarChar, None) => "VARCHAR(255)".to_string(),
            (SqlType::Text, _) => "TEXT".to_string(),
            (SqlType::Blob, _) => "BLOB".to_string(),
            (SqlType::Date, _) => "DATE".to_string(),
            (SqlType::Timestamp, _) => "TIMESTAMP".to_string(),
            (SqlType::TimestampTz, _) => "TIMESTAMPTZ".to_string(),
            (SqlType::Uuid, _) => "UUID".to_string(),
            (SqlType::Json, _) => "JSON".to_string(),
        }
    }

    /// Is this an integer type?
    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::SmallInt | SqlType::Integer | SqlType::BigInt)
    }
}
