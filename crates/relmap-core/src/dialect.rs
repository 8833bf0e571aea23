//! Dialect facts consumed by the persistence pipeline.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::{ConfigErrorKind, Error};
use crate::retry::RetryConfig;
use crate::types::SqlType;

/// Largest IN list most databases accept comfortably.
pub const DEFAULT_IN_OPERATOR_MAX_SIZE: usize = 1000;

/// Database dialect settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dialect {
    pub name: String,
    /// Maximum number of elements in one `IN (...)` list.
    pub in_operator_max_size: usize,
    pub retry: RetryConfig,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            name: "generic".to_string(),
            in_operator_max_size: DEFAULT_IN_OPERATOR_MAX_SIZE,
            retry: RetryConfig::default(),
        }
    }
}

impl Dialect {
    /// SQL type name for a value type and size.
    pub fn sql_type_name(&self, sql_type: SqlType, size: Option<u32>) -> String {
        sql_type.sql_name(size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_operator_max_size == 0 {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("dialect '{}': in_operator_max_size must be positive", self.name),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_partial_json() {
        let dialect: Dialect = serde_json::from_str(r#"{"in_operator_max_size": 3}"#).unwrap();
        assert_eq!(dialect.name, "generic");
        assert_eq!(dialect.in_operator_max_size, 3);
        assert!(dialect.validate().is_ok());
        assert_eq!(
            dialect.sql_type_name(SqlType::VarChar, Some(10)),
            "VARCHAR(10)"
        );
    }

    #[test]
    fn zero_in_size_rejected() {
        let dialect = Dialect {
            in_operator_max_size: 0,
            ..Dialect::default()
        };
        let err = dialect.validate().unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::Invalid));
    }
}
