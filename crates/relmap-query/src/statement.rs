//! Parameterized statements: SQL text plus the placeholder layout of every
//! key.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use relmap_core::{
    Bindings, Column, Error, ParameterBinder, PreparedSql, Result, RowValueMap, UpsertColumn,
    Value,
};

/// SQL text with the 1-based placeholder indexes and the binder of each key.
///
/// A key may own several placeholders (one per tuple of an IN list).
#[derive(Clone)]
pub struct ParameterizedSql<K> {
    pub(crate) sql: String,
    indexes: Vec<(K, Vec<usize>)>,
    binders: Vec<Arc<dyn ParameterBinder>>,
}

/// Statement keyed by plain columns (insert, delete, select).
pub type ColumnSql = ParameterizedSql<Column>;

/// Statement keyed by SET/WHERE columns (update).
pub type UpsertSql = ParameterizedSql<UpsertColumn>;

impl<K: PartialEq + fmt::Debug> ParameterizedSql<K> {
    pub(crate) fn new(sql: String) -> Self {
        Self {
            sql,
            indexes: Vec::new(),
            binders: Vec::new(),
        }
    }

    pub(crate) fn push_key(&mut self, key: K, indexes: Vec<usize>, binder: Arc<dyn ParameterBinder>) {
        self.indexes.push((key, indexes));
        self.binders.push(binder);
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Keys in placeholder order of their first occurrence.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.indexes.iter().map(|(k, _)| k)
    }

    /// Placeholder indexes of a key, empty when the key is not bound.
    pub fn indexes_of(&self, key: &K) -> &[usize] {
        self.indexes
            .iter()
            .find(|(k, _)| k == key)
            .map_or(&[], |(_, idx)| idx.as_slice())
    }

    pub fn binder_of(&self, key: &K) -> Option<&Arc<dyn ParameterBinder>> {
        self.indexes
            .iter()
            .position(|(k, _)| k == key)
            .map(|pos| &self.binders[pos])
    }

    pub fn parameter_count(&self) -> usize {
        self.indexes.iter().map(|(_, idx)| idx.len()).sum()
    }

    /// Statement handed to the executor.
    pub fn prepared(&self) -> PreparedSql {
        let mut binders = BTreeMap::new();
        for ((_, indexes), binder) in self.indexes.iter().zip(&self.binders) {
            for index in indexes {
                binders.insert(*index, Arc::clone(binder));
            }
        }
        PreparedSql::new(self.sql.clone(), binders)
    }

    /// Positional values for one row of `values`.
    ///
    /// Every key of the statement must be present; extra keys in `values`
    /// are ignored.
    pub fn bind(&self, values: &RowValueMap<K>) -> Result<Bindings> {
        let mut bindings = Bindings::new();
        for (key, indexes) in &self.indexes {
            let value = values.get(key).ok_or_else(|| {
                Error::Custom(format!("no value for parameter {key:?} of '{}'", self.sql))
            })?;
            for index in indexes {
                bindings.insert(*index, value.clone());
            }
        }
        Ok(bindings)
    }
}

impl ColumnSql {
    /// Positional values for an IN-list statement built for key tuples.
    ///
    /// `tuples[k][p]` is the value of the p-th key column of the k-th tuple;
    /// there must be exactly as many tuples as the statement was built for.
    pub fn bind_tuples(&self, tuples: &[Vec<Value>]) -> Result<Bindings> {
        let mut bindings = Bindings::new();
        for (position, (column, indexes)) in self.indexes.iter().enumerate() {
            if indexes.len() != tuples.len() {
                return Err(Error::Custom(format!(
                    "'{}' expects {} key tuples, got {}",
                    self.sql,
                    indexes.len(),
                    tuples.len()
                )));
            }
            for (tuple, index) in tuples.iter().zip(indexes) {
                let value = tuple.get(position).ok_or_else(|| {
                    Error::Custom(format!("key tuple has no value for {column}"))
                })?;
                bindings.insert(*index, value.clone());
            }
        }
        Ok(bindings)
    }

    /// [`bind_tuples`](Self::bind_tuples) for single-column keys.
    pub fn bind_keys(&self, keys: &[Value]) -> Result<Bindings> {
        let tuples: Vec<Vec<Value>> = keys.iter().map(|k| vec![k.clone()]).collect();
        self.bind_tuples(&tuples)
    }
}

impl<K: fmt::Debug> fmt::Debug for ParameterizedSql<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterizedSql")
            .field("sql", &self.sql)
            .field("indexes", &self.indexes)
            .finish_non_exhaustive()
    }
}
