//! Embedded sub-strategies: value objects and collections flattened into
//! columns of the owning entity's table.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::Result;
use crate::error::{Error, TypeError};
use crate::mapping::accessor::PropertyAccessor;
use crate::row_values::{ColumnValues, UpdateValues, UpsertColumn};
use crate::schema::Column;
use crate::value::{FromValue, Value};

/// Maps a value of type `V` to a fixed set of columns.
///
/// `None` stands for an absent value and maps every column to NULL.
pub trait EmbeddedMapper<V>: Send + Sync {
    fn columns(&self) -> &[Column];

    fn insert_values(&self, value: Option<&V>) -> ColumnValues;

    /// SET-only diff between two values; same rules as the entity diff.
    fn update_values(
        &self,
        modified: Option<&V>,
        unmodified: Option<&V>,
        all_columns: bool,
    ) -> UpdateValues {
        diff_values(
            self.columns(),
            &self.insert_values(modified),
            &self.insert_values(unmodified),
            all_columns,
        )
    }

    /// Rebuild a value; `None` when the row carries no value.
    #[allow(clippy::result_large_err)]
    fn transform(&self, values: &ColumnValues) -> Result<Option<V>>;
}

/// Compare two value maps over `columns` with null-safe equality.
///
/// Columns that differ go to the SET clause with the modified value. When
/// `all_columns` is set and anything differs, the unchanged columns follow
/// with the unmodified value. Nothing differing yields an empty map.
pub fn diff_values(
    columns: &[Column],
    modified: &ColumnValues,
    unmodified: &ColumnValues,
    all_columns: bool,
) -> UpdateValues {
    let pairs: Vec<(&Column, &Value, &Value)> = columns
        .iter()
        .map(|column| {
            (
                column,
                modified.get(column).unwrap_or(&Value::Null),
                unmodified.get(column).unwrap_or(&Value::Null),
            )
        })
        .collect();

    let mut values = UpdateValues::new();
    if pairs.iter().all(|(_, m, u)| m.null_safe_eq(u)) {
        return values;
    }
    for (column, m, u) in pairs {
        if !m.null_safe_eq(u) {
            values.insert(UpsertColumn::set(column.clone()), m.clone());
        } else if all_columns {
            values.insert(UpsertColumn::set(column.clone()), u.clone());
        }
    }
    values
}

fn all_null(columns: &[Column], values: &ColumnValues) -> bool {
    columns
        .iter()
        .all(|c| values.get(c).is_none_or(Value::is_null))
}

/// Value object whose properties map one-to-one onto columns.
pub struct EmbeddedBeanMapper<V> {
    columns: Vec<Column>,
    properties: Vec<(Column, PropertyAccessor<V>)>,
    factory: Arc<dyn Fn() -> V + Send + Sync>,
}

impl<V: 'static> EmbeddedBeanMapper<V> {
    pub fn new(factory: impl Fn() -> V + Send + Sync + 'static) -> Self {
        Self {
            columns: Vec::new(),
            properties: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    /// Map one property of the value object to a column.
    pub fn property<P, G, S>(mut self, column: &Column, get: G, set: S) -> Self
    where
        P: Into<Value> + FromValue,
        G: Fn(&V) -> P + Send + Sync + 'static,
        S: Fn(&mut V, P) + Send + Sync + 'static,
    {
        self.columns.push(column.clone());
        self.properties
            .push((column.clone(), PropertyAccessor::new(get, set)));
        self
    }
}

impl<V: Send + Sync> EmbeddedMapper<V> for EmbeddedBeanMapper<V> {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn insert_values(&self, value: Option<&V>) -> ColumnValues {
        self.properties
            .iter()
            .map(|(column, accessor)| {
                let v = value.map_or(Value::Null, |v| accessor.get(v));
                (column.clone(), v)
            })
            .collect()
    }

    fn transform(&self, values: &ColumnValues) -> Result<Option<V>> {
        if all_null(&self.columns, values) {
            return Ok(None);
        }
        let mut value = (self.factory)();
        for (column, accessor) in &self.properties {
            if let Some(v) = values.get(column) {
                accessor
                    .set(&mut value, v)
                    .map_err(|e| e.in_column(&column.absolute_name()))?;
            }
        }
        Ok(Some(value))
    }
}

impl<V> fmt::Debug for EmbeddedBeanMapper<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedBeanMapper")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Indexed collection persisted as N columns, element `i` in column `i`.
///
/// Elements past the last column are not persisted. Trailing NULL columns
/// are trimmed when reading back.
#[derive(Debug)]
pub struct ColumnedCollectionMapper<E> {
    columns: Vec<Column>,
    _element: std::marker::PhantomData<fn() -> E>,
}

impl<E> ColumnedCollectionMapper<E> {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            _element: std::marker::PhantomData,
        }
    }
}

impl<E> EmbeddedMapper<Vec<E>> for ColumnedCollectionMapper<E>
where
    E: Clone + Into<Value> + FromValue,
{
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn insert_values(&self, value: Option<&Vec<E>>) -> ColumnValues {
        let elements = value.map_or(&[][..], Vec::as_slice);
        if elements.len() > self.columns.len() {
            tracing::warn!(
                elements = elements.len(),
                columns = self.columns.len(),
                "Collection larger than its column count, extra elements dropped"
            );
        }
        self.columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let v = elements.get(i).cloned().map_or(Value::Null, Into::into);
                (column.clone(), v)
            })
            .collect()
    }

    fn transform(&self, values: &ColumnValues) -> Result<Option<Vec<E>>> {
        let raw: Vec<&Value> = self
            .columns
            .iter()
            .map(|c| values.get(c).unwrap_or(&Value::Null))
            .collect();
        let len = raw.iter().rposition(|v| !v.is_null()).map_or(0, |i| i + 1);
        let mut elements = Vec::with_capacity(len);
        for (value, column) in raw.into_iter().zip(&self.columns).take(len) {
            elements.push(E::from_value(value).map_err(|e| e.in_column(&column.absolute_name()))?);
        }
        Ok(Some(elements))
    }
}

/// Map persisted as one column per known key.
#[derive(Debug)]
pub struct ColumnedMapMapper<K, V> {
    keys: Vec<(K, Column)>,
    columns: Vec<Column>,
    _value: std::marker::PhantomData<fn() -> V>,
}

impl<K, V> ColumnedMapMapper<K, V> {
    pub fn new(keys: Vec<(K, Column)>) -> Self {
        let columns = keys.iter().map(|(_, c)| c.clone()).collect();
        Self {
            keys,
            columns,
            _value: std::marker::PhantomData,
        }
    }
}

impl<K, V> EmbeddedMapper<HashMap<K, V>> for ColumnedMapMapper<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync,
    V: Clone + Into<Value> + FromValue,
{
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn insert_values(&self, value: Option<&HashMap<K, V>>) -> ColumnValues {
        if let Some(map) = value {
            let unmapped = map
                .keys()
                .filter(|k| !self.keys.iter().any(|(key, _)| key == *k))
                .count();
            if unmapped > 0 {
                tracing::warn!(unmapped, "Map keys without a column are not persisted");
            }
        }
        self.keys
            .iter()
            .map(|(key, column)| {
                let v = value
                    .and_then(|m| m.get(key))
                    .cloned()
                    .map_or(Value::Null, Into::into);
                (column.clone(), v)
            })
            .collect()
    }

    fn transform(&self, values: &ColumnValues) -> Result<Option<HashMap<K, V>>> {
        let mut map = HashMap::new();
        for (key, column) in &self.keys {
            match values.get(column) {
                Some(v) if !v.is_null() => {
                    let value =
                        V::from_value(v).map_err(|e| e.in_column(&column.absolute_name()))?;
                    map.insert(key.clone(), value);
                }
                _ => {}
            }
        }
        Ok(Some(map))
    }
}

/// Instant plus the zone it was recorded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZonedTimestamp {
    /// Microseconds since the epoch, UTC.
    pub epoch_micros: i64,
    /// Zone identifier, e.g. `Europe/Paris`.
    pub zone: String,
}

/// Zoned timestamp split across an instant column and a zone column.
#[derive(Debug)]
pub struct ZonedTimestampMapper {
    columns: [Column; 2],
}

impl ZonedTimestampMapper {
    pub fn new(instant: &Column, zone: &Column) -> Self {
        Self {
            columns: [instant.clone(), zone.clone()],
        }
    }
}

impl EmbeddedMapper<ZonedTimestamp> for ZonedTimestampMapper {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn insert_values(&self, value: Option<&ZonedTimestamp>) -> ColumnValues {
        let [instant, zone] = &self.columns;
        let mut values = ColumnValues::with_capacity(2);
        match value {
            Some(ts) => {
                values.insert(instant.clone(), Value::TimestampTz(ts.epoch_micros));
                values.insert(zone.clone(), Value::Text(ts.zone.clone()));
            }
            None => {
                values.insert(instant.clone(), Value::Null);
                values.insert(zone.clone(), Value::Null);
            }
        }
        values
    }

    fn transform(&self, values: &ColumnValues) -> Result<Option<ZonedTimestamp>> {
        let [instant, zone] = &self.columns;
        let instant_value = values.get(instant).unwrap_or(&Value::Null);
        let zone_value = values.get(zone).unwrap_or(&Value::Null);
        match (instant_value, zone_value) {
            (Value::Null, Value::Null) => Ok(None),
            (Value::Timestamp(micros) | Value::TimestampTz(micros), Value::Text(z)) => {
                Ok(Some(ZonedTimestamp {
                    epoch_micros: *micros,
                    zone: z.clone(),
                }))
            }
            (other, _) => Err(Error::Type(TypeError {
                expected: "timestamp with zone",
                actual: other.type_name().to_string(),
                column: Some(instant.absolute_name()),
            })),
        }
    }
}
