//! Column-keyed value maps exchanged between mapping strategies and the
//! statement generator.

use crate::schema::Column;
use crate::value::Value;

/// A column tagged with the clause it belongs to in an update statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpsertColumn {
    column: Column,
    set_clause: bool,
}

impl UpsertColumn {
    /// Column written in the SET clause.
    pub fn set(column: Column) -> Self {
        Self {
            column,
            set_clause: true,
        }
    }

    /// Column compared in the WHERE clause.
    pub fn condition(column: Column) -> Self {
        Self {
            column,
            set_clause: false,
        }
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn is_set_clause(&self) -> bool {
        self.set_clause
    }
}

/// Insertion-ordered map from a key to a [`Value`].
///
/// Inserting an existing key replaces its value in place. Equality ignores
/// order.
#[derive(Debug, Clone)]
pub struct RowValueMap<K> {
    entries: Vec<(K, Value)>,
}

/// Values keyed by plain columns (insert, select, delete).
pub type ColumnValues = RowValueMap<Column>;

/// Values keyed by SET/WHERE tagged columns (update).
pub type UpdateValues = RowValueMap<UpsertColumn>;

impl<K: PartialEq> RowValueMap<K> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Insert or replace, returning the previous value.
    pub fn insert(&mut self, key: K, value: Value) -> Option<Value> {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &K) -> Option<Value> {
        let position = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(position).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Union with another map; keys already present keep their value.
    pub fn merge(&mut self, other: RowValueMap<K>) {
        for (key, value) in other.entries {
            if !self.contains_key(&key) {
                self.entries.push((key, value));
            }
        }
    }
}

impl<K: PartialEq> Default for RowValueMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PartialEq> PartialEq for RowValueMap<K> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| o == v))
    }
}

impl<K: PartialEq> FromIterator<(K, Value)> for RowValueMap<K> {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl<K> IntoIterator for RowValueMap<K> {
    type Item = (K, Value);
    type IntoIter = std::vec::IntoIter<(K, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl UpdateValues {
    /// Columns of the SET clause, in insertion order.
    pub fn set_columns(&self) -> Vec<Column> {
        self.keys()
            .filter(|k| k.is_set_clause())
            .map(|k| k.column().clone())
            .collect()
    }

    /// Columns of the WHERE clause, in insertion order.
    pub fn where_columns(&self) -> Vec<Column> {
        self.keys()
            .filter(|k| !k.is_set_clause())
            .map(|k| k.column().clone())
            .collect()
    }

    pub fn has_set_clause(&self) -> bool {
        self.keys().any(UpsertColumn::is_set_clause)
    }

    /// Value written to `column` by the SET clause.
    pub fn set_value(&self, column: &Column) -> Option<&Value> {
        self.get(&UpsertColumn::set(column.clone()))
    }

    /// Value compared against `column` in the WHERE clause.
    pub fn condition_value(&self, column: &Column) -> Option<&Value> {
        self.get(&UpsertColumn::condition(column.clone()))
    }
}
