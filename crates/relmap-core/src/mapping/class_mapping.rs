//! Entity-to-table mapping strategy.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::Result;
use crate::error::{ConfigErrorKind, Error};
use crate::mapping::accessor::PropertyAccessor;
use crate::mapping::embedded::{EmbeddedMapper, diff_values};
use crate::mapping::identifier::{Identifier, IdentifierPolicy, IsNewPolicy};
use crate::row_values::{ColumnValues, UpdateValues, UpsertColumn};
use crate::schema::{Column, Table};
use crate::value::{FromValue, Value};

trait EmbeddedSlot<C>: Send + Sync {
    fn columns(&self) -> &[Column];
    fn insert_values(&self, entity: &C) -> ColumnValues;
    fn apply(&self, entity: &mut C, values: &ColumnValues) -> Result<()>;
}

type Lens<C, V> = Box<dyn for<'a> Fn(&'a C) -> Option<&'a V> + Send + Sync>;

struct EmbeddedProperty<C, V, M> {
    get: Lens<C, V>,
    set: Box<dyn Fn(&mut C, Option<V>) + Send + Sync>,
    mapper: M,
}

impl<C, V, M> EmbeddedSlot<C> for EmbeddedProperty<C, V, M>
where
    M: EmbeddedMapper<V>,
{
    fn columns(&self) -> &[Column] {
        self.mapper.columns()
    }

    fn insert_values(&self, entity: &C) -> ColumnValues {
        self.mapper.insert_values((self.get)(entity))
    }

    fn apply(&self, entity: &mut C, values: &ColumnValues) -> Result<()> {
        if !self.columns().iter().any(|c| values.contains_key(c)) {
            return Ok(());
        }
        let value = self.mapper.transform(values)?;
        (self.set)(entity, value);
        Ok(())
    }
}

/// Maps entity type `C`, identified by `I`, onto one table.
///
/// Built once per entity type and shared; holds no per-entity state.
///
/// # Example
///
/// ```ignore
/// let mapping = ClassMapping::<Toto, i64>::builder(table)
///     .identifier("a", |t: &Toto| t.a, |t, v| t.a = v)
///     .property("b", |t: &Toto| t.b, |t, v| t.b = v)
///     .property("c", |t: &Toto| t.c, |t, v| t.c = v)
///     .build()?;
/// ```
pub struct ClassMapping<C, I> {
    entity_name: &'static str,
    table: Arc<Table>,
    id_column: Column,
    id_get: Box<dyn Fn(&C) -> I + Send + Sync>,
    id_set: Box<dyn Fn(&mut C, I) + Send + Sync>,
    is_new: IsNewPolicy,
    id_policy: IdentifierPolicy<I>,
    properties: Vec<(Column, PropertyAccessor<C>)>,
    embedded: Vec<Box<dyn EmbeddedSlot<C>>>,
    columns: Vec<Column>,
    value_columns: Vec<Column>,
    factory: Box<dyn Fn() -> C + Send + Sync>,
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

impl<C, I> ClassMapping<C, I>
where
    C: Send + Sync + 'static,
    I: Identifier,
{
    /// Start a mapping whose instances are created with `C::default()`.
    pub fn builder(table: impl Into<Arc<Table>>) -> ClassMappingBuilder<C, I>
    where
        C: Default,
    {
        ClassMappingBuilder::new(table.into(), Box::new(C::default))
    }

    /// Start a mapping whose instances are created by `factory`.
    pub fn builder_with_factory(
        table: impl Into<Arc<Table>>,
        factory: impl Fn() -> C + Send + Sync + 'static,
    ) -> ClassMappingBuilder<C, I> {
        ClassMappingBuilder::new(table.into(), Box::new(factory))
    }

    /// Short type name of the mapped entity, for messages.
    pub fn entity_name(&self) -> &'static str {
        self.entity_name
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn identifier_column(&self) -> &Column {
        &self.id_column
    }

    /// Every mapped column, in table declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Mapped columns except the identifier.
    pub fn value_columns(&self) -> &[Column] {
        &self.value_columns
    }

    pub fn is_new_policy(&self) -> IsNewPolicy {
        self.is_new
    }

    pub fn identifier_policy(&self) -> &IdentifierPolicy<I> {
        &self.id_policy
    }

    pub fn get_id(&self, entity: &C) -> I {
        (self.id_get)(entity)
    }

    pub fn set_id(&self, entity: &mut C, id: I) {
        (self.id_set)(entity, id);
    }

    pub fn id_value(&self, entity: &C) -> Value {
        self.get_id(entity).to_value()
    }

    pub fn is_new(&self, entity: &C) -> bool {
        self.is_new.is_new(&self.get_id(entity))
    }

    /// Every mapped column with its current value, identifier included.
    pub fn insert_values(&self, entity: &C) -> ColumnValues {
        let mut raw = ColumnValues::with_capacity(self.columns.len());
        raw.insert(self.id_column.clone(), self.id_value(entity));
        for (column, accessor) in &self.properties {
            raw.insert(column.clone(), accessor.get(entity));
        }
        for slot in &self.embedded {
            raw.merge(slot.insert_values(entity));
        }
        self.columns
            .iter()
            .filter_map(|c| raw.remove(c).map(|v| (c.clone(), v)))
            .collect()
    }

    /// Columns that changed between `unmodified` and `modified`.
    ///
    /// Changed columns carry the modified value. With `all_columns`, as soon
    /// as one column changed every other mapped column is added with the
    /// unmodified value. The identifier of `modified` goes in the WHERE
    /// clause; an empty map means there is nothing to update.
    pub fn update_values(&self, modified: &C, unmodified: &C, all_columns: bool) -> UpdateValues {
        let mut values = diff_values(
            &self.value_columns,
            &self.insert_values(modified),
            &self.insert_values(unmodified),
            all_columns,
        );
        if !values.is_empty() {
            values.insert(
                UpsertColumn::condition(self.id_column.clone()),
                self.id_value(modified),
            );
        }
        values
    }

    /// WHERE values identifying `entity`.
    pub fn delete_values(&self, entity: &C) -> ColumnValues {
        let mut values = ColumnValues::with_capacity(1);
        values.insert(self.id_column.clone(), self.id_value(entity));
        values
    }

    /// WHERE values identifying the entity with `id`.
    pub fn select_values(&self, id: &I) -> ColumnValues {
        let mut values = ColumnValues::with_capacity(1);
        values.insert(self.id_column.clone(), id.to_value());
        values
    }

    /// Build a new instance from row values.
    pub fn transform(&self, values: &ColumnValues) -> Result<C> {
        let mut entity = (self.factory)();
        self.assemble(&mut entity, values)?;
        Ok(entity)
    }

    /// Populate an existing instance from whichever mapped columns `values`
    /// carries.
    pub fn assemble(&self, entity: &mut C, values: &ColumnValues) -> Result<()> {
        if let Some(v) = values.get(&self.id_column) {
            let id = I::from_value(v).map_err(|e| e.in_column(&self.id_column.absolute_name()))?;
            self.set_id(entity, id);
        }
        for (column, accessor) in &self.properties {
            if let Some(v) = values.get(column) {
                accessor
                    .set(entity, v)
                    .map_err(|e| e.in_column(&column.absolute_name()))?;
            }
        }
        for slot in &self.embedded {
            slot.apply(entity, values)?;
        }
        Ok(())
    }
}

impl<C, I> fmt::Debug for ClassMapping<C, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassMapping")
            .field("entity", &self.entity_name)
            .field("table", &self.table.name())
            .field("identifier", &self.id_column)
            .field("columns", &self.columns)
            .field("is_new", &self.is_new)
            .field("id_policy", &self.id_policy)
            .finish_non_exhaustive()
    }
}

type IdentifierParts<C, I> = (
    Column,
    Box<dyn Fn(&C) -> I + Send + Sync>,
    Box<dyn Fn(&mut C, I) + Send + Sync>,
);

/// Builder for [`ClassMapping`]. Errors are collected and reported by
/// [`build`](ClassMappingBuilder::build).
pub struct ClassMappingBuilder<C, I> {
    table: Arc<Table>,
    identifier: Option<IdentifierParts<C, I>>,
    is_new: Option<IsNewPolicy>,
    id_policy: IdentifierPolicy<I>,
    properties: Vec<(Column, PropertyAccessor<C>)>,
    embedded: Vec<Box<dyn EmbeddedSlot<C>>>,
    factory: Box<dyn Fn() -> C + Send + Sync>,
    error: Option<Error>,
}

impl<C, I> ClassMappingBuilder<C, I>
where
    C: Send + Sync + 'static,
    I: Identifier,
{
    fn new(table: Arc<Table>, factory: Box<dyn Fn() -> C + Send + Sync>) -> Self {
        Self {
            table,
            identifier: None,
            is_new: None,
            id_policy: IdentifierPolicy::Assigned,
            properties: Vec::new(),
            embedded: Vec::new(),
            factory,
            error: None,
        }
    }

    fn column(&mut self, name: &str) -> Option<Column> {
        match self.table.require_column(name) {
            Ok(column) => Some(column.clone()),
            Err(e) => {
                self.error.get_or_insert(e);
                None
            }
        }
    }

    /// Map the identifier property onto the primary key column `name`.
    pub fn identifier(
        mut self,
        name: &str,
        get: impl Fn(&C) -> I + Send + Sync + 'static,
        set: impl Fn(&mut C, I) + Send + Sync + 'static,
    ) -> Self {
        if let Some(column) = self.column(name) {
            self.identifier = Some((column, Box::new(get), Box::new(set)));
        }
        self
    }

    /// Map a property onto column `name`.
    pub fn property<P, G, S>(mut self, name: &str, get: G, set: S) -> Self
    where
        P: Into<Value> + FromValue,
        G: Fn(&C) -> P + Send + Sync + 'static,
        S: Fn(&mut C, P) + Send + Sync + 'static,
    {
        if let Some(column) = self.column(name) {
            self.properties
                .push((column, PropertyAccessor::new(get, set)));
        }
        self
    }

    /// Embed a value object through a sub-strategy.
    pub fn embed<V, M, G, S>(mut self, get: G, set: S, mapper: M) -> Self
    where
        V: 'static,
        M: EmbeddedMapper<V> + 'static,
        G: for<'a> Fn(&'a C) -> Option<&'a V> + Send + Sync + 'static,
        S: Fn(&mut C, Option<V>) + Send + Sync + 'static,
    {
        self.embedded.push(Box::new(EmbeddedProperty {
            get: Box::new(get),
            set: Box::new(set),
            mapper,
        }));
        self
    }

    /// Override the "is new" policy derived from the identifier type.
    pub fn is_new_policy(mut self, policy: IsNewPolicy) -> Self {
        self.is_new = Some(policy);
        self
    }

    pub fn identifier_policy(mut self, policy: IdentifierPolicy<I>) -> Self {
        self.id_policy = policy;
        self
    }

    pub fn build(self) -> Result<ClassMapping<C, I>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let primary_key = self.table.require_primary_key()?.clone();
        let Some((id_column, id_get, id_set)) = self.identifier else {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!(
                    "mapping of '{}' has no identifier",
                    short_type_name::<C>()
                ),
            ));
        };
        if id_column != primary_key {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!(
                    "identifier column '{}' is not the primary key '{}'",
                    id_column, primary_key
                ),
            ));
        }
        if matches!(self.id_policy, IdentifierPolicy::AfterInsert) && !id_column.is_auto_generated()
        {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!(
                    "identifier column '{}' must be auto-generated to be read back after insert",
                    id_column
                ),
            ));
        }

        let mut claimed = HashSet::new();
        let claims = std::iter::once(&id_column)
            .chain(self.properties.iter().map(|(c, _)| c))
            .chain(self.embedded.iter().flat_map(|slot| slot.columns().iter()));
        for column in claims {
            if !column.belongs_to(&self.table) {
                return Err(Error::config(
                    ConfigErrorKind::UnknownColumn,
                    format!(
                        "column '{}' is not part of table '{}'",
                        column,
                        self.table.name()
                    ),
                ));
            }
            if !claimed.insert(column.clone()) {
                return Err(Error::config(
                    ConfigErrorKind::ColumnCollision,
                    format!("column '{}' is mapped more than once", column),
                ));
            }
        }

        let columns: Vec<Column> = self
            .table
            .columns()
            .iter()
            .filter(|c| claimed.contains(*c))
            .cloned()
            .collect();
        let value_columns = columns
            .iter()
            .filter(|c| **c != id_column)
            .cloned()
            .collect();

        tracing::debug!(
            entity = short_type_name::<C>(),
            table = self.table.name(),
            columns = columns.len(),
            "Built class mapping"
        );

        Ok(ClassMapping {
            entity_name: short_type_name::<C>(),
            table: self.table,
            id_column,
            id_get,
            id_set,
            is_new: self.is_new.unwrap_or(I::IS_NEW),
            id_policy: self.id_policy,
            properties: self.properties,
            embedded: self.embedded,
            columns,
            value_columns,
            factory: self.factory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::embedded::EmbeddedBeanMapper;
    use crate::schema::ColumnDef;
    use crate::types::SqlType;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Toto {
        a: i64,
        b: i32,
        c: i32,
    }

    fn toto_table() -> Table {
        let mut table = Table::new("Toto").unwrap();
        table
            .add_column(ColumnDef::new("a", SqlType::BigInt).primary_key())
            .unwrap();
        table.add_column(ColumnDef::new("b", SqlType::Integer)).unwrap();
        table.add_column(ColumnDef::new("c", SqlType::Integer)).unwrap();
        table
    }

    fn toto_mapping() -> ClassMapping<Toto, i64> {
        ClassMapping::builder(toto_table())
            .identifier("a", |t: &Toto| t.a, |t, v| t.a = v)
            .property("b", |t: &Toto| t.b, |t, v| t.b = v)
            .property("c", |t: &Toto| t.c, |t, v| t.c = v)
            .build()
            .unwrap()
    }

    fn col(mapping: &ClassMapping<Toto, i64>, name: &str) -> Column {
        mapping.table().column(name).unwrap().clone()
    }

    #[test]
    fn insert_values_in_declaration_order() {
        let mapping = toto_mapping();
        let values = mapping.insert_values(&Toto { a: 1, b: 17, c: 23 });
        let names: Vec<_> = values.keys().map(Column::name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(values.get(&col(&mapping, "a")), Some(&Value::BigInt(1)));
        assert_eq!(values.get(&col(&mapping, "c")), Some(&Value::Int(23)));
    }

    #[test]
    fn update_values_only_changed_columns() {
        let mapping = toto_mapping();
        let unmodified = Toto { a: 1, b: 17, c: 23 };
        let modified = Toto { a: 1, b: 42, c: 23 };

        let values = mapping.update_values(&modified, &unmodified, false);
        assert_eq!(values.len(), 2);
        assert_eq!(values.set_columns(), vec![col(&mapping, "b")]);
        assert_eq!(values.set_value(&col(&mapping, "b")), Some(&Value::Int(42)));
        assert_eq!(
            values.condition_value(&col(&mapping, "a")),
            Some(&Value::BigInt(1))
        );
    }

    #[test]
    fn update_values_all_columns_completion() {
        let mapping = toto_mapping();
        let unmodified = Toto { a: 1, b: 17, c: 23 };
        let modified = Toto { a: 1, b: 42, c: 23 };

        let values = mapping.update_values(&modified, &unmodified, true);
        assert_eq!(values.set_columns(), vec![col(&mapping, "b"), col(&mapping, "c")]);
        assert_eq!(values.set_value(&col(&mapping, "c")), Some(&Value::Int(23)));
        assert_eq!(values.where_columns(), vec![col(&mapping, "a")]);
    }

    #[test]
    fn update_values_empty_when_nothing_changed() {
        let mapping = toto_mapping();
        let toto = Toto { a: 1, b: 17, c: 23 };
        assert!(mapping.update_values(&toto, &toto.clone(), false).is_empty());
        assert!(mapping.update_values(&toto, &toto.clone(), true).is_empty());
    }

    #[test]
    fn transform_round_trip() {
        let mapping = toto_mapping();
        let toto = Toto { a: 3, b: 4, c: 5 };
        let values = mapping.insert_values(&toto);
        assert_eq!(mapping.transform(&values).unwrap(), toto);
    }

    #[test]
    fn transform_reports_column_on_type_error() {
        let mapping = toto_mapping();
        let mut values = ColumnValues::new();
        values.insert(col(&mapping, "a"), Value::BigInt(1));
        values.insert(col(&mapping, "b"), Value::from("oops"));
        let err = mapping.transform(&values).unwrap_err();
        assert!(err.to_string().contains("Toto.b"));
    }

    #[test]
    fn is_new_from_identifier_type() {
        let mapping = toto_mapping();
        assert_eq!(mapping.is_new_policy(), IsNewPolicy::PrimitiveZero);
        assert!(mapping.is_new(&Toto::default()));
        assert!(!mapping.is_new(&Toto { a: 8, b: 0, c: 0 }));
        assert_eq!(mapping.entity_name(), "Toto");
    }

    #[test]
    fn column_collision_rejected() {
        let err = ClassMapping::<Toto, i64>::builder(toto_table())
            .identifier("a", |t: &Toto| t.a, |t, v| t.a = v)
            .property("b", |t: &Toto| t.b, |t, v| t.b = v)
            .property("B", |t: &Toto| t.c, |t, v| t.c = v)
            .build()
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::ColumnCollision));
    }

    #[test]
    fn unknown_column_and_missing_identifier() {
        let err = ClassMapping::<Toto, i64>::builder(toto_table())
            .identifier("a", |t: &Toto| t.a, |t, v| t.a = v)
            .property("zz", |t: &Toto| t.b, |t, v| t.b = v)
            .build()
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownColumn));

        let err = ClassMapping::<Toto, i64>::builder(toto_table())
            .property("b", |t: &Toto| t.b, |t, v| t.b = v)
            .build()
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::Invalid));
    }

    #[test]
    fn table_without_primary_key_rejected() {
        let mut table = Table::new("NoKey").unwrap();
        table.add_column(ColumnDef::new("a", SqlType::BigInt)).unwrap();
        let err = ClassMapping::<Toto, i64>::builder(table)
            .identifier("a", |t: &Toto| t.a, |t, v| t.a = v)
            .build()
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::MissingPrimaryKey));
    }

    #[test]
    fn after_insert_requires_generated_key() {
        let err = ClassMapping::<Toto, i64>::builder(toto_table())
            .identifier("a", |t: &Toto| t.a, |t, v| t.a = v)
            .identifier_policy(IdentifierPolicy::AfterInsert)
            .build()
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::Invalid));
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Position {
        x: i32,
        y: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Marker {
        id: i64,
        label: String,
        position: Option<Position>,
    }

    fn marker_table() -> Table {
        let mut table = Table::new("Marker").unwrap();
        table
            .add_column(ColumnDef::new("id", SqlType::BigInt).primary_key())
            .unwrap();
        table.add_column(ColumnDef::new("label", SqlType::Text)).unwrap();
        table.add_column(ColumnDef::new("x", SqlType::Integer)).unwrap();
        table.add_column(ColumnDef::new("y", SqlType::Integer)).unwrap();
        table
    }

    fn marker_mapping() -> ClassMapping<Marker, i64> {
        let table = marker_table();
        let position = EmbeddedBeanMapper::new(Position::default)
            .property(table.column("x").unwrap(), |p: &Position| p.x, |p, v| p.x = v)
            .property(table.column("y").unwrap(), |p: &Position| p.y, |p, v| p.y = v);
        ClassMapping::builder(table)
            .identifier("id", |m: &Marker| m.id, |m, v| m.id = v)
            .property("label", |m: &Marker| m.label.clone(), |m, v| m.label = v)
            .embed(
                |m: &Marker| m.position.as_ref(),
                |m, v| m.position = v,
                position,
            )
            .build()
            .unwrap()
    }

    #[test]
    fn embedded_columns_merged_by_union() {
        let mapping = marker_mapping();
        let names: Vec<_> = mapping.columns().iter().map(Column::name).collect();
        assert_eq!(names, vec!["id", "label", "x", "y"]);

        let before = Marker {
            id: 1,
            label: "home".into(),
            position: Some(Position { x: 1, y: 2 }),
        };
        let after = Marker {
            position: Some(Position { x: 1, y: 5 }),
            ..before.clone()
        };
        let values = mapping.update_values(&after, &before, false);
        let y = mapping.table().column("y").unwrap().clone();
        assert_eq!(values.set_columns(), vec![y.clone()]);
        assert_eq!(values.set_value(&y), Some(&Value::Int(5)));

        let loaded = mapping.transform(&mapping.insert_values(&after)).unwrap();
        assert_eq!(loaded, after);

        let cleared = Marker {
            position: None,
            ..before.clone()
        };
        let loaded = mapping.transform(&mapping.insert_values(&cleared)).unwrap();
        assert_eq!(loaded.position, None);
    }

    #[test]
    fn embedded_collision_with_property() {
        let table = marker_table();
        let position = EmbeddedBeanMapper::new(Position::default)
            .property(table.column("x").unwrap(), |p: &Position| p.x, |p, v| p.x = v);
        let err = ClassMapping::<Marker, i64>::builder(table)
            .identifier("id", |m: &Marker| m.id, |m, v| m.id = v)
            .property("x", |m: &Marker| m.label.len() as i64, |_, _: i64| {})
            .embed(
                |m: &Marker| m.position.as_ref(),
                |m, v| m.position = v,
                position,
            )
            .build()
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::ColumnCollision));
    }
}
