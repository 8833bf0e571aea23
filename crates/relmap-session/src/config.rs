//! Persister configuration.

use std::sync::Arc;

use relmap_core::{ConfigErrorKind, Dialect, Error, Result};
use relmap_query::{ColumnSorter, DeclarationOrder, NameOrder};
use serde::{Deserialize, Serialize};

/// Order of columns in generated statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOrder {
    /// Table declaration order
    #[default]
    Declaration,
    /// Case-insensitive column name order
    Name,
}

impl ColumnOrder {
    pub fn sorter(self) -> Arc<dyn ColumnSorter> {
        match self {
            ColumnOrder::Declaration => Arc::new(DeclarationOrder),
            ColumnOrder::Name => Arc::new(NameOrder),
        }
    }
}

/// Configuration of one persister.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersisterConfig {
    /// Maximum number of rows sent in one batch.
    pub batch_size: usize,
    /// Send every mapped column in updates as soon as one changed.
    pub update_all_columns: bool,
    pub column_order: ColumnOrder,
    pub dialect: Dialect,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            update_all_columns: false,
            column_order: ColumnOrder::Declaration,
            dialect: Dialect::default(),
        }
    }
}

impl PersisterConfig {
    /// Parse and validate a JSON configuration; missing fields take their
    /// default.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                "batch_size must be positive",
            ));
        }
        self.dialect.validate()
    }
}
