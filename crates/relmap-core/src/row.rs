//! Result rows produced by the statement executor.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::{FromValue, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Column labels shared across all rows of one result set.
#[derive(Debug, Clone)]
pub struct ColumnLabels {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnLabels {
    /// Create labels from the projection aliases, in order.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_lowercase(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a label, matched case-insensitively.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(&name.to_lowercase()).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a query.
#[derive(Debug, Clone)]
pub struct Row {
    labels: Arc<ColumnLabels>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from labels and values.
    pub fn new(labels: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            labels: Arc::new(ColumnLabels::new(labels)),
            values,
        }
    }

    /// Create a row sharing labels with other rows of the same result set.
    pub fn with_labels(labels: Arc<ColumnLabels>, values: Vec<Value>) -> Self {
        Self { labels, values }
    }

    pub fn labels(&self) -> Arc<ColumnLabels> {
        Arc::clone(&self.labels)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value under a projection alias.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.labels.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Typed value under a projection alias.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: "column",
                actual: "missing".to_string(),
                column: Some(name.to_string()),
            })
        })?;
        T::from_value(value).map_err(|e| e.in_column(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.labels
            .names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}
