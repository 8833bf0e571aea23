//! Relation through an association table.
//!
//! Serves many-to-many relations as well as one-to-many relations mapped
//! with an association table: the cascade never writes a foreign key into
//! the target table, it maintains `(source, target[, index])` rows instead.
//! Indexed associations keep list semantics, so the same target may appear
//! at several positions.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use relmap_core::{Identifier, Result, Value, ValueKey};
use relmap_query::JoinType;

use super::association::{AssociationPersister, AssociationRecord, AssociationTable};
use super::{id_key, persisted};
use crate::context::PersistContext;
use crate::entity::{EntityRef, distinct};
use crate::events::{UpdatePair, WriteListener};
use crate::join_tree::{EntityInflater, JoinOn, NodeRow, relation_fixer};
use crate::persister::Persister;

type Getter<C, T> = Arc<dyn Fn(&C) -> Vec<EntityRef<T>> + Send + Sync>;
type Adder<C, T> = Arc<dyn Fn(&mut C, EntityRef<T>) + Send + Sync>;

pub struct ManyToMany<C, T, TI> {
    name: String,
    get: Getter<C, T>,
    add: Adder<C, T>,
    layout: AssociationTable,
    orphan_removal: bool,
    target: Arc<Persister<T, TI>>,
}

impl<C, T, TI> ManyToMany<C, T, TI>
where
    C: Send + Sync + 'static,
    T: Send + Sync + 'static,
    TI: Identifier,
{
    pub fn new(
        target: Arc<Persister<T, TI>>,
        layout: AssociationTable,
        get: impl Fn(&C) -> Vec<EntityRef<T>> + Send + Sync + 'static,
        add: impl Fn(&mut C, EntityRef<T>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: layout.table().name().to_string(),
            get: Arc::new(get),
            add: Arc::new(add),
            layout,
            orphan_removal: false,
            target,
        }
    }

    /// Delete targets no longer referenced by their source.
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
        let layout = &self.layout;
        let target_mapping = self.target.mapping();
        let target_id = target_mapping.identifier_column().clone();
        let add = Arc::clone(&self.add);
        let fixer = relation_fixer(move |source: &mut C, target: EntityRef<T>| add(source, target));
        let inflater: Arc<dyn EntityInflater> = target_mapping.clone();
        let source_id = source.mapping().identifier_column().clone();

        let tree = source.join_tree_mut();
        let root = tree.root();
        let association = tree.add_passive(
            root,
            JoinOn::new(&source_id, layout.source()),
            JoinType::LeftOuter,
            Arc::clone(layout.table()),
            layout.index().into_iter().cloned().collect(),
        )?;
        let node = tree.add_relation(
            association,
            JoinOn::new(layout.target(), &target_id),
            JoinType::LeftOuter,
            inflater,
            fixer,
        )?;
        if let Some(index) = layout.index() {
            let index = index.clone();
            tree.add_order_by(association, &index)?;
            tree.set_relation_key(
                node,
                Arc::new(move |row: &NodeRow<'_>| {
                    Ok(vec![
                        row.value(&target_id).cloned().unwrap_or(Value::Null),
                        row.value(&index).cloned().unwrap_or(Value::Null),
                    ])
                }),
            )?;
        }
        tree.graft(node, self.target.join_tree())?;

        tracing::debug!(
            relation = %self.name,
            association = layout.table().name(),
            indexed = layout.index().is_some(),
            "Registered association relation"
        );
        let associations =
            AssociationPersister::new(self.layout.clone(), source.dml().clone(), source.config());
        let mapping = Arc::clone(source.mapping());
        let cascade = Arc::new(Cascade {
            relation: self,
            associations,
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
            let (before, after) = (Arc::clone(&cascade), Arc::clone(&cascade));
            let listener = WriteListener::new()
                .before(move |ctx, sources: &[EntityRef<C>]| before.before_delete(ctx, sources))
                .after(move |ctx, sources| after.after_delete(ctx, sources, by_id));
            if by_id {
                listeners.delete_by_id.add(listener);
            } else {
                listeners.delete.add(listener);
            }
        }
        Ok(())
    }
}

impl<C, T, TI> fmt::Debug for ManyToMany<C, T, TI> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManyToMany")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("orphan_removal", &self.orphan_removal)
            .finish_non_exhaustive()
    }
}

struct Cascade<C, T, TI> {
    relation: ManyToMany<C, T, TI>,
    associations: AssociationPersister,
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

    fn records(&self, source: &EntityRef<C>, targets: &[EntityRef<T>]) -> Vec<AssociationRecord> {
        let source_id = (self.source_id)(&source.read());
        let indexed = self.relation.layout.index().is_some();
        targets
            .iter()
            .enumerate()
            .map(|(at, t)| {
                let record =
                    AssociationRecord::new(source_id.clone(), self.relation.target.id_value(t));
                if indexed { record.at(at) } else { record }
            })
            .collect()
    }

    fn insert_new(&self, ctx: &PersistContext<'_>, targets: Vec<EntityRef<T>>) -> Result<()> {
        let target = &self.relation.target;
        let new: Vec<_> = distinct(targets).into_iter().filter(|t| target.is_new(t)).collect();
        target.insert_in(ctx, &new)?;
        Ok(())
    }

    fn after_insert(&self, ctx: &PersistContext<'_>, sources: &[EntityRef<C>]) -> Result<()> {
        let linked: Vec<_> = sources.iter().map(|s| (s, self.targets_of(s))).collect();
        self.insert_new(ctx, linked.iter().flat_map(|(_, t)| t.clone()).collect())?;
        let records: Vec<_> = linked
            .iter()
            .flat_map(|(source, targets)| self.records(source, targets))
            .collect();
        self.associations.insert(ctx, &records)?;
        Ok(())
    }

    /// New targets first, then kept targets updated, removed rows and
    /// orphans deleted, and finally added rows inserted.
    fn after_update(&self, ctx: &PersistContext<'_>, pairs: &[UpdatePair<C>]) -> Result<()> {
        let target = &self.relation.target;
        let current: Vec<Vec<EntityRef<T>>> =
            pairs.iter().map(|p| self.targets_of(&p.modified)).collect();
        self.insert_new(ctx, current.iter().flatten().cloned().collect())?;

        let mut updates = Vec::new();
        let mut removed = Vec::new();
        let mut added = Vec::new();
        let mut dropped = Vec::new();
        for (pair, linked) in pairs.iter().zip(&current) {
            let previous = self.targets_of(&pair.unmodified);
            let before: Vec<_> = persisted(target, previous.iter().cloned());
            for element in linked.iter().filter(|t| !target.is_new(t)) {
                let key = id_key(target, element);
                if let Some(old) = before.iter().find(|o| id_key(target, o) == key) {
                    updates.push(UpdatePair::new(element.clone(), old.clone()));
                }
            }

            let old_records = self.records(&pair.unmodified, &previous);
            let new_records = self.records(&pair.modified, linked);
            let old_keys: HashSet<_> = old_records.iter().map(record_key).collect();
            let new_keys: HashSet<_> = new_records.iter().map(record_key).collect();
            removed.extend(old_records.into_iter().filter(|r| !new_keys.contains(&record_key(r))));
            added.extend(new_records.into_iter().filter(|r| !old_keys.contains(&record_key(r))));
            dropped.extend(before);
        }
        target.update_in(ctx, &updates, target.config().update_all_columns)?;
        self.associations.delete(ctx, &removed)?;

        if self.relation.orphan_removal {
            let still_linked: HashSet<ValueKey> = current
                .iter()
                .flatten()
                .map(|t| id_key(target, t))
                .collect();
            dropped.retain(|t| !still_linked.contains(&id_key(target, t)));
            target.delete_in(ctx, &persisted(target, dropped))?;
        }
        self.associations.insert(ctx, &added)?;
        Ok(())
    }

    fn before_delete(&self, ctx: &PersistContext<'_>, sources: &[EntityRef<C>]) -> Result<()> {
        let ids: Vec<Value> = sources.iter().map(|s| (self.source_id)(&s.read())).collect();
        self.associations.delete_by_source(ctx, &ids)?;
        Ok(())
    }

    fn after_delete(
        &self,
        ctx: &PersistContext<'_>,
        sources: &[EntityRef<C>],
        by_id: bool,
    ) -> Result<()> {
        if !self.relation.orphan_removal {
            return Ok(());
        }
        let target = &self.relation.target;
        let orphans = persisted(target, sources.iter().flat_map(|s| self.targets_of(s)));
        if by_id {
            target.delete_by_id_in(ctx, &orphans)?;
        } else {
            target.delete_in(ctx, &orphans)?;
        }
        Ok(())
    }
}

fn record_key(record: &AssociationRecord) -> (ValueKey, Option<usize>) {
    (ValueKey::new(record.target.clone()), record.index)
}
