//! One-to-one relation cascade.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use relmap_core::{Column, Identifier, Result, Value, ValueKey};
use relmap_query::JoinType;

use super::{check_relation_column, id_key, mandatory_error, persisted};
use crate::context::PersistContext;
use crate::entity::{EntityRef, distinct};
use crate::events::{UpdatePair, WriteListener};
use crate::join_tree::{EntityInflater, JoinOn, relation_fixer};
use crate::persister::Persister;

type Getter<C, T> = Arc<dyn Fn(&C) -> Option<EntityRef<T>> + Send + Sync>;
type Setter<C, T> = Arc<dyn Fn(&mut C, Option<EntityRef<T>>) + Send + Sync>;

/// Table holding the foreign key of the relation.
#[derive(Debug, Clone)]
enum Owner {
    /// Column of the source table referencing the target identifier.
    Source(Column),
    /// Column of the target table referencing the source identifier.
    Target(Column),
}

/// Relation from a source entity `C` to at most one target `T`.
pub struct OneToOne<C, T, TI> {
    name: String,
    get: Getter<C, T>,
    set: Setter<C, T>,
    owner: Owner,
    mandatory: bool,
    orphan_removal: bool,
    target: Arc<Persister<T, TI>>,
}

impl<C, T, TI> OneToOne<C, T, TI>
where
    C: Send + Sync + 'static,
    T: Send + Sync + 'static,
    TI: Identifier,
{
    fn new(
        target: Arc<Persister<T, TI>>,
        owner: Owner,
        get: impl Fn(&C) -> Option<EntityRef<T>> + Send + Sync + 'static,
        set: impl Fn(&mut C, Option<EntityRef<T>>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: target.mapping().entity_name().to_string(),
            get: Arc::new(get),
            set: Arc::new(set),
            owner,
            mandatory: false,
            orphan_removal: false,
            target,
        }
    }

    /// The source table holds `foreign_key`, referencing the target.
    pub fn owned_by_source(
        target: Arc<Persister<T, TI>>,
        foreign_key: &Column,
        get: impl Fn(&C) -> Option<EntityRef<T>> + Send + Sync + 'static,
        set: impl Fn(&mut C, Option<EntityRef<T>>) + Send + Sync + 'static,
    ) -> Self {
        Self::new(target, Owner::Source(foreign_key.clone()), get, set)
    }

    /// The target table holds `foreign_key`, referencing the source.
    pub fn owned_by_target(
        target: Arc<Persister<T, TI>>,
        foreign_key: &Column,
        get: impl Fn(&C) -> Option<EntityRef<T>> + Send + Sync + 'static,
        set: impl Fn(&mut C, Option<EntityRef<T>>) + Send + Sync + 'static,
    ) -> Self {
        Self::new(target, Owner::Target(foreign_key.clone()), get, set)
    }

    /// Sources must always have a target.
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Delete targets detached from their source or whose source is
    /// deleted.
    #[must_use]
    pub fn orphan_removal(mut self) -> Self {
        self.orphan_removal = true;
        self
    }

    /// Name of the relation in error messages.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach the relation to `source`: join tree and listeners.
    pub fn register<I: Identifier>(self, source: &mut Persister<C, I>) -> Result<()> {
        let target_id = self.target.mapping().identifier_column().clone();
        let on = match &self.owner {
            Owner::Source(fk) => {
                check_relation_column(fk, source.table(), source.mapping().columns(), &self.name)?;
                JoinOn::new(fk, &target_id)
            }
            Owner::Target(fk) => {
                let target_mapping = self.target.mapping();
                check_relation_column(
                    fk,
                    target_mapping.table(),
                    target_mapping.columns(),
                    &self.name,
                )?;
                JoinOn::new(source.mapping().identifier_column(), fk)
            }
        };
        let join_type = if self.mandatory {
            JoinType::Inner
        } else {
            JoinType::LeftOuter
        };
        let set = Arc::clone(&self.set);
        let fixer = relation_fixer(move |source: &mut C, target: EntityRef<T>| {
            set(source, Some(target));
        });
        let inflater: Arc<dyn EntityInflater> = self.target.mapping().clone();
        let tree = source.join_tree_mut();
        let root = tree.root();
        let node = tree.add_relation(root, on, join_type, inflater, fixer)?;
        tree.graft(node, self.target.join_tree())?;

        let mapping = Arc::clone(source.mapping());
        let cascade = Arc::new(Cascade {
            source_entity: mapping.entity_name(),
            source_id: Arc::new(move |c: &C| mapping.id_value(c)),
            relation: self,
        });
        tracing::debug!(
            relation = %cascade.relation.name,
            owner = ?cascade.relation.owner,
            mandatory = cascade.relation.mandatory,
            "Registered one-to-one relation"
        );

        let listeners = source.listeners_mut();
        let (validate, before, after, on_error) = (
            Arc::clone(&cascade),
            Arc::clone(&cascade),
            Arc::clone(&cascade),
            Arc::clone(&cascade),
        );
        listeners.insert.add(
            WriteListener::new()
                .validate(move |_, sources: &[EntityRef<C>]| validate.check_mandatory(sources))
                .before(move |ctx, sources| before.before_insert(ctx, sources))
                .after(move |ctx, sources| after.after_insert(ctx, sources))
                .on_error(move |ctx, sources, _| on_error.clear_source_keys(ctx, sources)),
        );

        let (validate, before, after, on_error) = (
            Arc::clone(&cascade),
            Arc::clone(&cascade),
            Arc::clone(&cascade),
            Arc::clone(&cascade),
        );
        listeners.update.add(
            WriteListener::new()
                .validate(move |_, pairs: &[UpdatePair<C>]| {
                    let modified: Vec<_> = pairs.iter().map(|p| p.modified.clone()).collect();
                    validate.check_mandatory(&modified)
                })
                .before(move |ctx, pairs| before.before_update(ctx, pairs))
                .after(move |ctx, pairs| after.after_update(ctx, pairs))
                .on_error(move |ctx, pairs, _| {
                    let modified: Vec<_> = pairs.iter().map(|p| p.modified.clone()).collect();
                    on_error.clear_source_keys(ctx, &modified);
                }),
        );

        for by_id in [false, true] {
            let (before, after) = (Arc::clone(&cascade), Arc::clone(&cascade));
            let listener = WriteListener::new()
                .before(move |ctx, sources: &[EntityRef<C>]| {
                    before.before_delete(ctx, sources, by_id)
                })
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

impl<C, T, TI> fmt::Debug for OneToOne<C, T, TI> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneToOne")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("mandatory", &self.mandatory)
            .field("orphan_removal", &self.orphan_removal)
            .finish_non_exhaustive()
    }
}

/// Listener side of a registered relation.
struct Cascade<C, T, TI> {
    relation: OneToOne<C, T, TI>,
    source_entity: &'static str,
    source_id: Arc<dyn Fn(&C) -> Value + Send + Sync>,
}

impl<C, T, TI> Cascade<C, T, TI>
where
    C: Send + Sync + 'static,
    T: Send + Sync + 'static,
    TI: Identifier,
{
    fn target_of(&self, source: &EntityRef<C>) -> Option<EntityRef<T>> {
        (self.relation.get)(&source.read())
    }

    fn target_id(&self, target: Option<&EntityRef<T>>) -> Value {
        target.map_or(Value::Null, |t| self.relation.target.id_value(t))
    }

    fn source_id(&self, source: &EntityRef<C>) -> Value {
        (self.source_id)(&source.read())
    }

    fn check_mandatory(&self, sources: &[EntityRef<C>]) -> Result<()> {
        if self.relation.mandatory && sources.iter().any(|s| self.target_of(s).is_none()) {
            return Err(mandatory_error(&self.relation.name, self.source_entity));
        }
        Ok(())
    }

    fn clear_source_keys(&self, ctx: &PersistContext<'_>, sources: &[EntityRef<C>]) {
        if let Owner::Source(fk) = &self.relation.owner {
            for source in sources {
                ctx.silent().remove(source.key(), fk);
            }
        }
    }

    fn insert_new(&self, ctx: &PersistContext<'_>, targets: Vec<EntityRef<T>>) -> Result<()> {
        let target = &self.relation.target;
        let new: Vec<_> = distinct(targets).into_iter().filter(|t| target.is_new(t)).collect();
        target.insert_in(ctx, &new)?;
        Ok(())
    }

    /// Source-owned: targets first, their identifiers become the source's
    /// foreign key.
    fn before_insert(&self, ctx: &PersistContext<'_>, sources: &[EntityRef<C>]) -> Result<()> {
        let Owner::Source(fk) = &self.relation.owner else {
            return Ok(());
        };
        let linked: Vec<_> = sources
            .iter()
            .filter_map(|s| self.target_of(s).map(|t| (s, t)))
            .collect();
        self.insert_new(ctx, linked.iter().map(|(_, t)| t.clone()).collect())?;
        for (source, target) in &linked {
            ctx.silent()
                .register(source.key(), fk.clone(), self.target_id(Some(target)));
        }
        Ok(())
    }

    /// Target-owned: targets after their source, with the source identifier
    /// as foreign key.
    fn after_insert(&self, ctx: &PersistContext<'_>, sources: &[EntityRef<C>]) -> Result<()> {
        let fk = match &self.relation.owner {
            Owner::Source(_) => {
                self.clear_source_keys(ctx, sources);
                return Ok(());
            }
            Owner::Target(fk) => fk,
        };
        let target = &self.relation.target;
        let mut silent = ctx.silent_scope();
        let mut new = Vec::new();
        let mut existing = Vec::new();
        for source in sources {
            let Some(linked) = self.target_of(source) else {
                continue;
            };
            silent.register(linked.key(), fk, self.source_id(source));
            if target.is_new(&linked) {
                new.push(linked);
            } else {
                existing.push(UpdatePair::unchanged(linked));
            }
        }
        target.insert_in(ctx, &new)?;
        target.update_in(ctx, &existing, false)?;
        Ok(())
    }

    /// Source-owned: new targets inserted, changed targets updated, the
    /// foreign key rewritten where the target changed.
    fn before_update(&self, ctx: &PersistContext<'_>, pairs: &[UpdatePair<C>]) -> Result<()> {
        let Owner::Source(fk) = &self.relation.owner else {
            return Ok(());
        };
        let target = &self.relation.target;
        let mut new = Vec::new();
        let mut changed = Vec::new();
        for pair in pairs {
            let Some(current) = self.target_of(&pair.modified) else {
                continue;
            };
            if target.is_new(&current) {
                new.push(current);
            } else if let Some(previous) = self.target_of(&pair.unmodified) {
                if id_key(target, &previous) == id_key(target, &current) {
                    changed.push(UpdatePair::new(current, previous));
                }
            }
        }
        self.insert_new(ctx, new)?;
        target.update_in(ctx, &changed, target.config().update_all_columns)?;

        for pair in pairs {
            let current = self.target_id(self.target_of(&pair.modified).as_ref());
            let previous = self.target_id(self.target_of(&pair.unmodified).as_ref());
            if ValueKey::new(current.clone()) != ValueKey::new(previous) {
                ctx.silent()
                    .register(pair.modified.key(), fk.clone(), current);
            }
        }
        Ok(())
    }

    /// Detached targets are nullified before new and kept targets are
    /// written; orphans are deleted after them.
    fn after_update(&self, ctx: &PersistContext<'_>, pairs: &[UpdatePair<C>]) -> Result<()> {
        let target = &self.relation.target;
        let mut detached = Vec::new();
        let mut current_keys = HashSet::new();
        for pair in pairs {
            let current = self.target_of(&pair.modified);
            if let Some(current) = &current {
                current_keys.insert(current.key());
            }
            if let Some(previous) = self.target_of(&pair.unmodified) {
                let kept = current
                    .as_ref()
                    .is_some_and(|c| id_key(target, c) == id_key(target, &previous));
                if !kept {
                    detached.push(previous);
                }
            }
        }
        // a target handed over to another source of the batch stays
        detached.retain(|d| !current_keys.contains(&d.key()));

        match &self.relation.owner {
            Owner::Source(_) => {
                let modified: Vec<_> = pairs.iter().map(|p| p.modified.clone()).collect();
                self.clear_source_keys(ctx, &modified);
                if self.relation.orphan_removal {
                    target.delete_in(ctx, &persisted(target, detached))?;
                }
                Ok(())
            }
            Owner::Target(fk) => {
                let mut silent = ctx.silent_scope();
                let detached = persisted(target, detached);
                if !self.relation.orphan_removal {
                    let nullified: Vec<_> = detached
                        .iter()
                        .map(|d| {
                            silent.register(d.key(), fk, Value::Null);
                            UpdatePair::unchanged(d.clone())
                        })
                        .collect();
                    target.update_in(ctx, &nullified, false)?;
                }

                let mut new = Vec::new();
                let mut updates = Vec::new();
                for pair in pairs {
                    let Some(current) = self.target_of(&pair.modified) else {
                        continue;
                    };
                    let previous = self
                        .target_of(&pair.unmodified)
                        .filter(|p| id_key(target, p) == id_key(target, &current));
                    if target.is_new(&current) {
                        silent.register(current.key(), fk, self.source_id(&pair.modified));
                        new.push(current);
                    } else if let Some(previous) = previous {
                        updates.push(UpdatePair::new(current, previous));
                    } else {
                        // moved from another source
                        silent.register(current.key(), fk, self.source_id(&pair.modified));
                        updates.push(UpdatePair::unchanged(current));
                    }
                }
                target.insert_in(ctx, &new)?;
                target.update_in(ctx, &updates, target.config().update_all_columns)?;
                if self.relation.orphan_removal {
                    target.delete_in(ctx, &detached)?;
                }
                Ok(())
            }
        }
    }

    fn delete_targets(
        &self,
        ctx: &PersistContext<'_>,
        targets: &[EntityRef<T>],
        by_id: bool,
    ) -> Result<()> {
        let target = &self.relation.target;
        if by_id {
            target.delete_by_id_in(ctx, targets)?;
        } else {
            target.delete_in(ctx, targets)?;
        }
        Ok(())
    }

    /// Target-owned: targets go first, deleted or detached.
    fn before_delete(
        &self,
        ctx: &PersistContext<'_>,
        sources: &[EntityRef<C>],
        by_id: bool,
    ) -> Result<()> {
        let Owner::Target(fk) = &self.relation.owner else {
            return Ok(());
        };
        let target = &self.relation.target;
        let targets = persisted(target, sources.iter().filter_map(|s| self.target_of(s)));
        if self.relation.orphan_removal {
            return self.delete_targets(ctx, &targets, by_id);
        }
        let mut silent = ctx.silent_scope();
        let nullified: Vec<_> = targets
            .into_iter()
            .map(|t| {
                silent.register(t.key(), fk, Value::Null);
                UpdatePair::unchanged(t)
            })
            .collect();
        target.update_in(ctx, &nullified, false)?;
        Ok(())
    }

    /// Source-owned: orphan targets go once nothing references them.
    fn after_delete(
        &self,
        ctx: &PersistContext<'_>,
        sources: &[EntityRef<C>],
        by_id: bool,
    ) -> Result<()> {
        if !self.relation.orphan_removal || matches!(self.relation.owner, Owner::Target(_)) {
            return Ok(());
        }
        let target = &self.relation.target;
        let targets = persisted(target, sources.iter().filter_map(|s| self.target_of(s)));
        self.delete_targets(ctx, &targets, by_id)
    }
}
