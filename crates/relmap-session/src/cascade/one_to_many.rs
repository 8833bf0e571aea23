//! One-to-many relation cascade, foreign key on the target table.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use relmap_core::{Column, Identifier, Result, Value, ValueKey};
use relmap_query::JoinType;

use super::{check_relation_column, id_key, persisted, position};
use crate::context::{PersistContext, SilentGuard};
use crate::entity::EntityRef;
use crate::events::{UpdatePair, WriteListener};
use crate::join_tree::{EntityInflater, JoinOn, relation_fixer};
use crate::persister::Persister;

type Getter<C, T> = Arc<dyn Fn(&C) -> Vec<EntityRef<T>> + Send + Sync>;
type Adder<C, T> = Arc<dyn Fn(&mut C, EntityRef<T>) + Send + Sync>;

/// Relation from a source entity `C` to a collection of targets `T` whose
/// table references the source.
pub struct OneToMany<C, T, TI> {
    name: String,
    get: Getter<C, T>,
    add: Adder<C, T>,
    foreign_key: Column,
    index: Option<Column>,
    orphan_removal: bool,
    target: Arc<Persister<T, TI>>,
}

impl<C, T, TI> OneToMany<C, T, TI>
where
    C: Send + Sync + 'static,
    T: Send + Sync + 'static,
    TI: Identifier,
{
    /// `get` returns the collection in order; `add` appends one loaded
    /// target.
    pub fn new(
        target: Arc<Persister<T, TI>>,
        foreign_key: &Column,
        get: impl Fn(&C) -> Vec<EntityRef<T>> + Send + Sync + 'static,
        add: impl Fn(&mut C, EntityRef<T>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: target.mapping().entity_name().to_string(),
            get: Arc::new(get),
            add: Arc::new(add),
            foreign_key: foreign_key.clone(),
            index: None,
            orphan_removal: false,
            target,
        }
    }

    /// Keep the collection order in `column` of the target table.
    #[must_use]
    pub fn indexed_by(mut self, column: &Column) -> Self {
        self.index = Some(column.clone());
        self
    }

    #[must_use]
    pub fn orphan_removal(mut self) -> Self {
        self.orphan_removal = true;
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn register<I: Identifier>(self, source: &mut Persister<C, I>) -> Result<()> {
        let target_mapping = self.target.mapping();
        for column in std::iter::once(&self.foreign_key).chain(&self.index) {
            check_relation_column(
                column,
                target_mapping.table(),
                target_mapping.columns(),
                &self.name,
            )?;
        }
        let on = JoinOn::new(source.mapping().identifier_column(), &self.foreign_key);
        let add = Arc::clone(&self.add);
        let fixer = relation_fixer(move |source: &mut C, target: EntityRef<T>| add(source, target));
        let inflater: Arc<dyn EntityInflater> = target_mapping.clone();

        let tree = source.join_tree_mut();
        let root = tree.root();
        let node = tree.add_relation(root, on, JoinType::LeftOuter, inflater, fixer)?;
        if let Some(index) = &self.index {
            tree.add_order_by(node, index)?;
        }
        tree.graft(node, self.target.join_tree())?;

        tracing::debug!(
            relation = %self.name,
            foreign_key = %self.foreign_key,
            indexed = self.index.is_some(),
            "Registered one-to-many relation"
        );
        let mapping = Arc::clone(source.mapping());
        let cascade = Arc::new(Cascade {
            relation: self,
            source_id: Arc::new(move |c: &C| mapping.id_value(c)),
        });

        let listeners = source.listeners_mut();
        let after = Arc::clone(&cascade);
        listeners.insert.add(
            WriteListener::new()
                .after(move |ctx, sources: &[EntityRef<C>]| after.after_insert(ctx, sources)),
        );
        let after = Arc::clone(&cascade);
        listeners.update.add(
            WriteListener::new()
                .after(move |ctx, pairs: &[UpdatePair<C>]| after.after_update(ctx, pairs)),
        );
        for by_id in [false, true] {
            let before = Arc::clone(&cascade);
            let listener = WriteListener::new().before(move |ctx, sources: &[EntityRef<C>]| {
                before.before_delete(ctx, sources, by_id)
            });
            if by_id {
                listeners.delete_by_id.add(listener);
            } else {
                listeners.delete.add(listener);
            }
        }
        Ok(())
    }
}

impl<C, T, TI> fmt::Debug for OneToMany<C, T, TI> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneToMany")
            .field("name", &self.name)
            .field("foreign_key", &self.foreign_key)
            .field("index", &self.index)
            .field("orphan_removal", &self.orphan_removal)
            .finish_non_exhaustive()
    }
}

struct Cascade<C, T, TI> {
    relation: OneToMany<C, T, TI>,
    source_id: Arc<dyn Fn(&C) -> Value + Send + Sync>,
}

impl<C, T, TI> Cascade<C, T, TI>
where
    C: Send + Sync + 'static,
    T: Send + Sync + 'static,
    TI: Identifier,
{
    fn targets_of(&self, source: &EntityRef<C>) -> Vec<EntityRef<T>> {
        (self.relation.get)(&source.read())
    }

    /// Point `target` at its source and position.
    fn attach(
        &self,
        silent: &mut SilentGuard<'_>,
        target: &EntityRef<T>,
        source: &Value,
        at: usize,
    ) {
        silent.register(target.key(), &self.relation.foreign_key, source.clone());
        if let Some(index) = &self.relation.index {
            silent.register(target.key(), index, position(index, at));
        }
    }

    /// Write null foreign keys (and indexes) or delete the targets,
    /// depending on orphan removal.
    fn release(
        &self,
        ctx: &PersistContext<'_>,
        targets: Vec<EntityRef<T>>,
        by_id: bool,
    ) -> Result<()> {
        let target = &self.relation.target;
        if self.relation.orphan_removal {
            if by_id {
                target.delete_by_id_in(ctx, &targets)?;
            } else {
                target.delete_in(ctx, &targets)?;
            }
            return Ok(());
        }
        let mut silent = ctx.silent_scope();
        let pairs: Vec<_> = targets
            .into_iter()
            .map(|t| {
                silent.register(t.key(), &self.relation.foreign_key, Value::Null);
                if let Some(index) = &self.relation.index {
                    silent.register(t.key(), index, Value::Null);
                }
                UpdatePair::unchanged(t)
            })
            .collect();
        target.update_in(ctx, &pairs, false)?;
        Ok(())
    }

    fn after_insert(&self, ctx: &PersistContext<'_>, sources: &[EntityRef<C>]) -> Result<()> {
        let target = &self.relation.target;
        let mut silent = ctx.silent_scope();
        let mut new = Vec::new();
        let mut existing = Vec::new();
        for source in sources {
            let source_id = (self.source_id)(&source.read());
            for (at, linked) in self.targets_of(source).into_iter().enumerate() {
                self.attach(&mut silent, &linked, &source_id, at);
                if target.is_new(&linked) {
                    new.push(linked);
                } else {
                    existing.push(UpdatePair::unchanged(linked));
                }
            }
        }
        target.insert_in(ctx, &new)?;
        target.update_in(ctx, &existing, false)?;
        Ok(())
    }

    /// New targets are inserted, then kept or moved targets updated.
    /// Removed targets are nullified before both, or deleted after both
    /// with orphan removal.
    fn after_update(&self, ctx: &PersistContext<'_>, pairs: &[UpdatePair<C>]) -> Result<()> {
        let target = &self.relation.target;
        let current: Vec<Vec<EntityRef<T>>> =
            pairs.iter().map(|p| self.targets_of(&p.modified)).collect();
        let still_linked: HashSet<ValueKey> = current
            .iter()
            .flatten()
            .filter(|t| !target.is_new(t))
            .map(|t| id_key(target, t))
            .collect();

        let mut removed = Vec::new();
        let mut previous: Vec<HashMap<ValueKey, (usize, EntityRef<T>)>> = Vec::new();
        for pair in pairs {
            let mut by_id = HashMap::new();
            for (at, old) in self.targets_of(&pair.unmodified).into_iter().enumerate() {
                if target.is_new(&old) {
                    continue;
                }
                let key = id_key(target, &old);
                if !still_linked.contains(&key) {
                    removed.push(old.clone());
                }
                by_id.insert(key, (at, old));
            }
            previous.push(by_id);
        }
        let mut removed = persisted(target, removed);
        if !self.relation.orphan_removal {
            self.release(ctx, std::mem::take(&mut removed), false)?;
        }

        let mut silent = ctx.silent_scope();
        let mut new = Vec::new();
        let mut updates = Vec::new();
        for ((pair, linked), before) in pairs.iter().zip(current).zip(&previous) {
            let source_id = (self.source_id)(&pair.modified.read());
            for (at, element) in linked.into_iter().enumerate() {
                if target.is_new(&element) {
                    self.attach(&mut silent, &element, &source_id, at);
                    new.push(element);
                    continue;
                }
                match before.get(&id_key(target, &element)) {
                    Some((was_at, old)) => {
                        if let Some(index) = &self.relation.index {
                            if *was_at != at {
                                silent.register(element.key(), index, position(index, at));
                            }
                        }
                        updates.push(UpdatePair::new(element, old.clone()));
                    }
                    None => {
                        self.attach(&mut silent, &element, &source_id, at);
                        updates.push(UpdatePair::unchanged(element));
                    }
                }
            }
        }
        target.insert_in(ctx, &new)?;
        target.update_in(ctx, &updates, target.config().update_all_columns)?;
        if self.relation.orphan_removal {
            self.release(ctx, removed, false)?;
        }
        Ok(())
    }

    fn before_delete(
        &self,
        ctx: &PersistContext<'_>,
        sources: &[EntityRef<C>],
        by_id: bool,
    ) -> Result<()> {
        let target = &self.relation.target;
        let targets = persisted(target, sources.iter().flat_map(|s| self.targets_of(s)));
        self.release(ctx, targets, by_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        Call, City, Country, RecordingExecutor, city_persister, column, country_persister,
        statements,
    };
    use relmap_core::Row;

    type Cities = OneToMany<Country, City, i64>;

    fn countries(configure: impl Fn(Cities, &Column) -> Cities) -> Persister<Country, i64> {
        let cities = city_persister();
        let fk = column(cities.table(), "countryId");
        let idx = column(cities.table(), "idx");
        let mut countries = country_persister();
        let relation = OneToMany::new(
            Arc::new(cities),
            &fk,
            |c: &Country| c.cities.clone(),
            |c: &mut Country, city| c.cities.push(city),
        );
        configure(relation, &idx).register(&mut countries).unwrap();
        countries
    }

    fn with_cities(id: i64, cities: &[&EntityRef<City>]) -> EntityRef<Country> {
        let country = Country::new(id, "France");
        country.write().cities = cities.iter().map(|&c| c.clone()).collect();
        country
    }

    #[test]
    fn insert_writes_keys_and_positions() {
        let countries = countries(|r, idx| r.indexed_by(idx));
        let executor = RecordingExecutor::new();
        let paris = City::new(0, "Paris");
        let lyon = City::new(0, "Lyon");
        countries
            .insert(&executor, &[with_cities(1, &[&paris, &lyon])])
            .unwrap();

        let calls = executor.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].sql(), "insert into Country(id, name) values (?, ?)");
        for (call, at) in calls[1..].iter().zip([0, 1]) {
            let Call::Returning { sql, bindings } = call else {
                panic!("expected an insert with generated key, got {call:?}");
            };
            assert_eq!(sql, "insert into City(name, countryId, idx) values (?, ?, ?)");
            assert_eq!(bindings.get(&2), Some(&Value::BigInt(1)));
            assert_eq!(bindings.get(&3), Some(&Value::Int(at)));
        }
        assert_eq!(lyon.read().id, 101);
    }

    #[test]
    fn update_releases_inserts_and_moves() {
        let countries = countries(|r, idx| r.indexed_by(idx));
        let executor = RecordingExecutor::new();
        let lyon = City::new(5, "Lyon");
        let nice = City::new(6, "Nice");
        let marseille = City::new(0, "Marseille");
        let before = with_cities(1, &[&lyon, &nice]);
        let after = with_cities(1, &[&nice, &marseille]);
        countries
            .update(&executor, &[UpdatePair::new(after, before)], false)
            .unwrap();

        assert_eq!(
            statements(&executor),
            vec![
                "update City set countryId = ?, idx = ? where id = ?".to_string(),
                "insert into City(name, countryId, idx) values (?, ?, ?)".to_string(),
                "update City set idx = ? where id = ?".to_string(),
            ]
        );
        let calls = executor.calls();
        let Call::Batch { batch, .. } = &calls[2] else {
            panic!("expected a batch, got {:?}", calls[2]);
        };
        assert_eq!(batch[0].get(&1), Some(&Value::Int(0)));
        assert_eq!(batch[0].get(&2), Some(&Value::BigInt(6)));
    }

    #[test]
    fn orphans_deleted_after_new_and_kept_targets() {
        let countries = countries(|r, _| r.orphan_removal());
        let executor = RecordingExecutor::new();
        let lyon = City::new(5, "Lyon");
        let nice = City::new(6, "Nice");
        let nizza = City::new(6, "Nizza");
        let marseille = City::new(0, "Marseille");
        let before = with_cities(1, &[&lyon, &nice]);
        let after = with_cities(1, &[&nizza, &marseille]);
        countries
            .update(&executor, &[UpdatePair::new(after, before)], false)
            .unwrap();

        assert_eq!(
            statements(&executor),
            vec![
                "insert into City(name, countryId) values (?, ?)".to_string(),
                "update City set name = ? where id = ?".to_string(),
                "delete from City where id = ?".to_string(),
            ]
        );
        let calls = executor.calls();
        let Call::Batch { batch, .. } = &calls[2] else {
            panic!("expected a batch, got {:?}", calls[2]);
        };
        assert_eq!(batch[0].get(&1), Some(&Value::BigInt(5)));
    }

    #[test]
    fn unchanged_collection_writes_nothing() {
        let countries = countries(|r, _| r);
        let executor = RecordingExecutor::new();
        let lyon = City::new(5, "Lyon");
        let country = with_cities(1, &[&lyon]);
        countries
            .update(&executor, &[UpdatePair::unchanged(country)], false)
            .unwrap();
        assert!(executor.calls().is_empty());
    }

    #[test]
    fn delete_detaches_targets_before_source() {
        let countries = countries(|r, _| r);
        let executor = RecordingExecutor::new();
        let lyon = City::new(5, "Lyon");
        let nice = City::new(6, "Nice");
        countries
            .delete(&executor, &[with_cities(1, &[&lyon, &nice])])
            .unwrap();

        let calls = executor.calls();
        assert_eq!(calls.len(), 2);
        let Call::Batch { sql, batch } = &calls[0] else {
            panic!("expected a batch, got {:?}", calls[0]);
        };
        assert_eq!(sql, "update City set countryId = ? where id = ?");
        assert_eq!(batch.len(), 2);
        assert_eq!(calls[1].sql(), "delete from Country where id = ?");
    }

    #[test]
    fn delete_by_id_removes_orphans_in_one_statement() {
        let countries = countries(|r, _| r.orphan_removal());
        let executor = RecordingExecutor::new();
        let lyon = City::new(5, "Lyon");
        let nice = City::new(6, "Nice");
        countries
            .delete_by_id(&executor, &[with_cities(1, &[&lyon, &nice])])
            .unwrap();
        assert_eq!(
            statements(&executor),
            vec![
                "delete from City where id in (?, ?)".to_string(),
                "delete from Country where id in (?)".to_string(),
            ]
        );
    }

    #[test]
    fn select_collects_targets_in_index_order() {
        let countries = countries(|r, idx| r.indexed_by(idx));
        let executor = RecordingExecutor::new();
        let labels = || -> Vec<String> {
            ["Country_id", "Country_name", "City_id", "City_name"]
                .into_iter()
                .map(String::from)
                .collect()
        };
        let row = |city: i64, name: &str| {
            Row::new(
                labels(),
                vec![
                    Value::BigInt(1),
                    Value::from("France"),
                    Value::BigInt(city),
                    Value::from(name),
                ],
            )
        };
        executor.push_rows(vec![row(10, "Paris"), row(11, "Lyon"), row(10, "Paris")]);
        let loaded = countries.select(&executor, &[1]).unwrap();

        assert_eq!(loaded.len(), 1);
        let names: Vec<String> = loaded[0]
            .read()
            .cities
            .iter()
            .map(|c| c.read().name.clone())
            .collect();
        assert_eq!(names, vec!["Paris", "Lyon"]);
        assert!(executor.calls()[0].sql().ends_with("order by City.idx"));
    }
}
