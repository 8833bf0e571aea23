//! Relation cascades.
//!
//! A cascade attaches a relation between a source entity and target
//! entities to the source persister. It registers
//!
//! - a relation node in the source join tree, with the target's own tree
//!   grafted below it, so one select loads both sides,
//! - listeners on the source persister's bus that insert, update and
//!   delete targets through the target persister, in foreign key order.
//!
//! Foreign keys owned by a relation are not mapped by either entity; they
//! are written as silent columns of the entity whose table holds them.
//! Relations must be registered on the target persister before it is
//! captured by a source relation: the graft copies the target tree as it
//! is at that point.
//!
//! ```ignore
//! let mut cities = Persister::with_defaults(city_mapping)?;
//! let cities = Arc::new(cities);
//! let mut countries = Persister::with_defaults(country_mapping)?;
//! OneToOne::owned_by_source(cities, &capital_id, |c: &Country| c.capital.clone(), |c, city| c.capital = city)
//!     .mandatory()
//!     .register(&mut countries)?;
//! ```

mod association;
mod many_to_many;
mod one_to_many;
mod one_to_one;

pub use association::{AssociationPersister, AssociationRecord, AssociationTable};
pub use many_to_many::ManyToMany;
pub use one_to_many::OneToMany;
pub use one_to_one::OneToOne;

use std::collections::HashSet;

use relmap_core::{
    Column, ConfigErrorKind, Error, Identifier, MandatoryRelationError, Result, SqlType, Table,
    Value, ValueKey,
};

use crate::entity::EntityRef;
use crate::persister::Persister;

/// A relation column must belong to `table` and stay unknown to the
/// mapping writing that table.
fn check_relation_column(
    column: &Column,
    table: &Table,
    mapped: &[Column],
    relation: &str,
) -> Result<()> {
    if !column.belongs_to(table) {
        return Err(Error::config(
            ConfigErrorKind::UnknownColumn,
            format!(
                "relation '{relation}': column {column} is not part of table {}",
                table.name()
            ),
        ));
    }
    if mapped.contains(column) {
        return Err(Error::config(
            ConfigErrorKind::ColumnCollision,
            format!("relation '{relation}': column {column} is already mapped"),
        ));
    }
    Ok(())
}

fn mandatory_error(relation: &str, entity: &str) -> Error {
    Error::MandatoryRelation(MandatoryRelationError {
        relation: relation.to_string(),
        entity: entity.to_string(),
    })
}

fn id_key<T, TI>(persister: &Persister<T, TI>, entity: &EntityRef<T>) -> ValueKey
where
    T: Send + Sync + 'static,
    TI: Identifier,
{
    ValueKey::new(persister.id_value(entity))
}

/// Entities already in the database, in order, without repeats.
fn persisted<T, TI>(
    persister: &Persister<T, TI>,
    entities: impl IntoIterator<Item = EntityRef<T>>,
) -> Vec<EntityRef<T>>
where
    T: Send + Sync + 'static,
    TI: Identifier,
{
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| !persister.is_new(e) && seen.insert(e.key()))
        .collect()
}

/// Position of an element in an indexed collection, typed after the index
/// column.
fn position(column: &Column, index: usize) -> Value {
    let index = i64::try_from(index).unwrap_or(i64::MAX);
    match column.sql_type() {
        SqlType::Integer => i32::try_from(index).map_or(Value::BigInt(index), Value::Int),
        _ => Value::BigInt(index),
    }
}
