//! Persister: the write and read pipeline of one entity type.
//!
//! A persister combines a [`ClassMapping`] with the statement generator and
//! runs every operation through its listener bus:
//!
//! - `insert`: insert values of the new entities, batched by row shape,
//!   with identifiers assigned, generated before the insert or read back
//!   from the database depending on the mapping's identifier policy
//! - `update`: only the columns that differ between the modified and the
//!   unmodified entity, row counts checked
//! - `update_by_id`: every mapped column, keyed by identifier
//! - `delete` / `delete_by_id`: one row per entity, or IN lists chunked by
//!   the dialect's IN size
//! - `select`: the aggregate described by the persister's join tree
//! - `persist`: insert or update depending on what the database holds
//!
//! Silent columns registered on the [`PersistContext`] are written with the
//! entity's own columns; this is how relation cascades write foreign keys
//! the entity's mapping does not know about.
//!
//! ```ignore
//! let persister = Persister::with_defaults(Arc::new(toto_mapping))?;
//! persister.insert(&executor, &[EntityRef::new(Toto { a: 1, b: 17, c: 23 })])?;
//! let loaded = persister.select(&executor, &[1])?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use relmap_core::{
    BinderRegistry, ClassMapping, Column, ColumnValues, Error, Identifier, IdentifierPolicy,
    IsNewPolicy, Result, RetryPolicy, RowCount, StatementExecutor, Table,
    UpdateValues, UpsertColumn, Value, ValueKey,
};
use relmap_query::{ColumnSql, Criteria, DmlGenerator};

use crate::config::PersisterConfig;
use crate::context::PersistContext;
use crate::entity::{AnyEntity, EntityRef, distinct};
use crate::events::{PersistListeners, UpdatePair};
use crate::graph_select::GraphSelect;
use crate::identity_cache::IdentityCache;
use crate::join_tree::{CompiledTree, JoinTree};
use crate::write_operation::Writer;

/// Persistence pipeline of entities `C` identified by `I`.
pub struct Persister<C, I> {
    mapping: Arc<ClassMapping<C, I>>,
    dml: DmlGenerator,
    config: PersisterConfig,
    retry: Box<dyn RetryPolicy>,
    listeners: PersistListeners<C, I>,
    tree: JoinTree,
    compiled: OnceLock<CompiledTree>,
}

impl<C, I> Persister<C, I>
where
    C: Send + Sync + 'static,
    I: Identifier,
{
    pub fn new(
        mapping: Arc<ClassMapping<C, I>>,
        config: PersisterConfig,
        binders: Arc<BinderRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let dml = DmlGenerator::new(binders).with_sorter(config.column_order.sorter());
        let retry = config.dialect.retry.policy();
        let tree = JoinTree::new(mapping.clone());
        tracing::debug!(
            entity = mapping.entity_name(),
            table = mapping.table().name(),
            "Created persister"
        );
        Ok(Self {
            mapping,
            dml,
            config,
            retry,
            listeners: PersistListeners::default(),
            tree,
            compiled: OnceLock::new(),
        })
    }

    /// Persister with the default configuration and binders.
    pub fn with_defaults(mapping: Arc<ClassMapping<C, I>>) -> Result<Self> {
        Self::new(
            mapping,
            PersisterConfig::default(),
            Arc::new(BinderRegistry::new()),
        )
    }

    pub fn mapping(&self) -> &Arc<ClassMapping<C, I>> {
        &self.mapping
    }

    pub fn table(&self) -> &Arc<Table> {
        self.mapping.table()
    }

    pub fn config(&self) -> &PersisterConfig {
        &self.config
    }

    pub fn dml(&self) -> &DmlGenerator {
        &self.dml
    }

    pub fn listeners(&self) -> &PersistListeners<C, I> {
        &self.listeners
    }

    pub fn listeners_mut(&mut self) -> &mut PersistListeners<C, I> {
        &mut self.listeners
    }

    pub fn join_tree(&self) -> &JoinTree {
        &self.tree
    }

    /// Mutable join tree; the compiled select is rebuilt on next use.
    pub fn join_tree_mut(&mut self) -> &mut JoinTree {
        self.compiled = OnceLock::new();
        &mut self.tree
    }

    pub fn is_new(&self, entity: &EntityRef<C>) -> bool {
        self.mapping.is_new(&entity.read())
    }

    pub fn id(&self, entity: &EntityRef<C>) -> I {
        self.mapping.get_id(&entity.read())
    }

    pub fn id_value(&self, entity: &EntityRef<C>) -> Value {
        self.mapping.id_value(&entity.read())
    }

    // ========================================================================
    // Insert
    // ========================================================================

    pub fn insert(
        &self,
        executor: &dyn StatementExecutor,
        entities: &[EntityRef<C>],
    ) -> Result<RowCount> {
        self.insert_in(&PersistContext::new(executor), entities)
    }

    /// Insert within an ongoing call.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.mapping.entity_name(), count = entities.len()))]
    pub fn insert_in(
        &self,
        ctx: &PersistContext<'_>,
        entities: &[EntityRef<C>],
    ) -> Result<RowCount> {
        let entities = distinct(entities.iter().cloned());
        if entities.is_empty() {
            return Ok(RowCount::Exact(0));
        }
        if let IdentifierPolicy::BeforeInsert(generate) = self.mapping.identifier_policy() {
            for entity in &entities {
                let mut guard = entity.write();
                if self.mapping.is_new(&guard) {
                    self.mapping.set_id(&mut guard, generate());
                }
            }
        }
        self.listeners
            .insert
            .run(ctx, &entities, || self.insert_rows(ctx, &entities))
    }

    fn insert_rows(&self, ctx: &PersistContext<'_>, entities: &[EntityRef<C>]) -> Result<RowCount> {
        let generated = matches!(
            self.mapping.identifier_policy(),
            IdentifierPolicy::AfterInsert
        );
        let id_column = self.mapping.identifier_column();
        let rows: Vec<ColumnValues> = entities
            .iter()
            .map(|entity| {
                let mut values = self.mapping.insert_values(&entity.read());
                values.merge(ctx.silent().values_for(entity.key()));
                if generated {
                    values.remove(id_column);
                }
                values
            })
            .collect();

        let count = if generated {
            self.insert_with_generated_keys(ctx, entities, rows)?
        } else {
            self.writer(ctx)
                .write_rows(rows, false, |columns| self.dml.build_insert(columns))?
        };

        if self.mapping.is_new_policy() == IsNewPolicy::PersistedFlag {
            for entity in entities {
                let mut guard = entity.write();
                let id = self.mapping.get_id(&guard).into_persisted();
                self.mapping.set_id(&mut guard, id);
            }
        }
        tracing::debug!(table = self.table().name(), rows = entities.len(), "Inserted rows");
        Ok(count)
    }

    /// Rows one by one, each identifier read back from the executor.
    fn insert_with_generated_keys(
        &self,
        ctx: &PersistContext<'_>,
        entities: &[EntityRef<C>],
        rows: Vec<ColumnValues>,
    ) -> Result<RowCount> {
        let id_column = self.mapping.identifier_column();
        let mut statement: Option<(Vec<Column>, ColumnSql)> = None;
        let mut total = RowCount::Exact(0);
        for (entity, row) in entities.iter().zip(rows) {
            let columns: Vec<Column> = row.keys().cloned().collect();
            let reuse = statement.as_ref().is_some_and(|(shape, _)| *shape == columns);
            if !reuse {
                statement = Some((columns.clone(), self.dml.build_insert(&columns)?));
            }
            let Some((_, sql)) = &statement else {
                continue;
            };
            let key = self
                .writer(ctx)
                .operation(sql.prepared())
                .execute_returning_key(&sql.bind(&row)?, id_column)?;
            let id = <I as Identifier>::from_value(&key)
                .map_err(|e| e.in_column(&id_column.absolute_name()))?;
            self.mapping.set_id(&mut entity.write(), id);
            total = total.add(RowCount::Exact(1));
        }
        Ok(total)
    }

    // ========================================================================
    // Update
    // ========================================================================

    pub fn update(
        &self,
        executor: &dyn StatementExecutor,
        pairs: &[UpdatePair<C>],
        all_columns: bool,
    ) -> Result<RowCount> {
        self.update_in(&PersistContext::new(executor), pairs, all_columns)
    }

    /// Update the columns that differ between each modified entity and its
    /// unmodified counterpart. With `all_columns`, a row that changed sends
    /// every mapped column.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.mapping.entity_name(), count = pairs.len()))]
    pub fn update_in(
        &self,
        ctx: &PersistContext<'_>,
        pairs: &[UpdatePair<C>],
        all_columns: bool,
    ) -> Result<RowCount> {
        let mut seen = std::collections::HashSet::new();
        let pairs: Vec<UpdatePair<C>> = pairs
            .iter()
            .filter(|p| seen.insert(p.modified.key()))
            .cloned()
            .collect();
        if pairs.is_empty() {
            return Ok(RowCount::Exact(0));
        }
        self.listeners.update.run(ctx, &pairs, || {
            let rows = pairs
                .iter()
                .filter_map(|pair| self.update_row(ctx, pair, all_columns))
                .collect();
            self.write_updates(ctx, rows)
        })
    }

    fn update_row(
        &self,
        ctx: &PersistContext<'_>,
        pair: &UpdatePair<C>,
        all_columns: bool,
    ) -> Option<UpdateValues> {
        let mut values = if pair.modified.ptr_eq(&pair.unmodified) {
            UpdateValues::new()
        } else {
            let modified = pair.modified.read();
            let unmodified = pair.unmodified.read();
            self.mapping.update_values(&modified, &unmodified, all_columns)
        };
        self.complete_update(ctx, &pair.modified, &mut values);
        values.has_set_clause().then_some(values)
    }

    /// Add silent columns to the SET clause and the identifier to the WHERE
    /// clause.
    fn complete_update(
        &self,
        ctx: &PersistContext<'_>,
        entity: &EntityRef<C>,
        values: &mut UpdateValues,
    ) {
        for (column, value) in ctx.silent().values_for(entity.key()) {
            values.insert(UpsertColumn::set(column), value);
        }
        let condition = UpsertColumn::condition(self.mapping.identifier_column().clone());
        if values.has_set_clause() && !values.contains_key(&condition) {
            values.insert(condition, self.id_value(entity));
        }
    }

    fn write_updates(&self, ctx: &PersistContext<'_>, rows: Vec<UpdateValues>) -> Result<RowCount> {
        let table = Arc::clone(self.table());
        self.writer(ctx).write_rows(rows, true, |keys| {
            let (set, condition): (Vec<&UpsertColumn>, Vec<&UpsertColumn>) =
                keys.iter().partition(|k| k.is_set_clause());
            let set: Vec<Column> = set.into_iter().map(|k| k.column().clone()).collect();
            let condition: Vec<Column> =
                condition.into_iter().map(|k| k.column().clone()).collect();
            tracing::trace!(table = table.name(), set = set.len(), "Building update");
            self.dml.build_update(&set, &condition)
        })
    }

    pub fn update_by_id(
        &self,
        executor: &dyn StatementExecutor,
        entities: &[EntityRef<C>],
    ) -> Result<RowCount> {
        self.update_by_id_in(&PersistContext::new(executor), entities)
    }

    /// Update every mapped column of the entities, keyed by identifier,
    /// without comparing with a previous state.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.mapping.entity_name(), count = entities.len()))]
    pub fn update_by_id_in(
        &self,
        ctx: &PersistContext<'_>,
        entities: &[EntityRef<C>],
    ) -> Result<RowCount> {
        let entities = distinct(entities.iter().cloned());
        if entities.is_empty() {
            return Ok(RowCount::Exact(0));
        }
        self.listeners.update_by_id.run(ctx, &entities, || {
            let id_column = self.mapping.identifier_column();
            let rows = entities
                .iter()
                .filter_map(|entity| {
                    let mut values: UpdateValues = self
                        .mapping
                        .insert_values(&entity.read())
                        .into_iter()
                        .map(|(column, value)| {
                            if column == *id_column {
                                (UpsertColumn::condition(column), value)
                            } else {
                                (UpsertColumn::set(column), value)
                            }
                        })
                        .collect();
                    self.complete_update(ctx, entity, &mut values);
                    values.has_set_clause().then_some(values)
                })
                .collect();
            self.write_updates(ctx, rows)
        })
    }

    // ========================================================================
    // Delete
    // ========================================================================

    pub fn delete(
        &self,
        executor: &dyn StatementExecutor,
        entities: &[EntityRef<C>],
    ) -> Result<RowCount> {
        self.delete_in(&PersistContext::new(executor), entities)
    }

    /// Delete one row per entity, each expected to exist.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.mapping.entity_name(), count = entities.len()))]
    pub fn delete_in(
        &self,
        ctx: &PersistContext<'_>,
        entities: &[EntityRef<C>],
    ) -> Result<RowCount> {
        let entities = distinct(entities.iter().cloned());
        if entities.is_empty() {
            return Ok(RowCount::Exact(0));
        }
        self.listeners.delete.run(ctx, &entities, || {
            let rows = entities
                .iter()
                .map(|entity| self.mapping.delete_values(&entity.read()))
                .collect();
            self.writer(ctx).write_rows(rows, true, |columns| {
                self.dml.build_delete(self.table(), columns)
            })
        })
    }

    pub fn delete_by_id(
        &self,
        executor: &dyn StatementExecutor,
        entities: &[EntityRef<C>],
    ) -> Result<RowCount> {
        self.delete_by_id_in(&PersistContext::new(executor), entities)
    }

    /// Delete with `in (...)` lists of identifiers, chunked by the dialect's
    /// IN size.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.mapping.entity_name(), count = entities.len()))]
    pub fn delete_by_id_in(
        &self,
        ctx: &PersistContext<'_>,
        entities: &[EntityRef<C>],
    ) -> Result<RowCount> {
        let entities = distinct(entities.iter().cloned());
        if entities.is_empty() {
            return Ok(RowCount::Exact(0));
        }
        self.listeners.delete_by_id.run(ctx, &entities, || {
            let ids: Vec<Value> = entities.iter().map(|e| self.id_value(e)).collect();
            self.writer(ctx).delete_keys(
                &self.dml,
                self.config.dialect.in_operator_max_size,
                self.table(),
                self.mapping.identifier_column(),
                &ids,
                true,
            )
        })
    }

    // ========================================================================
    // Persist
    // ========================================================================

    pub fn persist(
        &self,
        executor: &dyn StatementExecutor,
        entities: &[EntityRef<C>],
    ) -> Result<RowCount> {
        self.persist_in(&PersistContext::new(executor), entities)
    }

    /// Insert new entities and update existing ones against their database
    /// state. Entities that look persisted but are missing from the
    /// database are inserted.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.mapping.entity_name(), count = entities.len()))]
    pub fn persist_in(
        &self,
        ctx: &PersistContext<'_>,
        entities: &[EntityRef<C>],
    ) -> Result<RowCount> {
        let (mut new, existing): (Vec<_>, Vec<_>) = distinct(entities.iter().cloned())
            .into_iter()
            .partition(|e| self.is_new(e));

        let mut pairs = Vec::new();
        if !existing.is_empty() {
            let ids: Vec<I> = existing.iter().map(|e| self.id(e)).collect();
            let loaded: HashMap<ValueKey, EntityRef<C>> = self
                .select_in(ctx, &ids)?
                .into_iter()
                .map(|e| (ValueKey::new(self.id_value(&e)), e))
                .collect();
            for entity in existing {
                match loaded.get(&ValueKey::new(self.id_value(&entity))) {
                    Some(stored) => pairs.push(UpdatePair::new(entity, stored.clone())),
                    None => new.push(entity),
                }
            }
        }
        tracing::debug!(inserts = new.len(), updates = pairs.len(), "Persisting entities");
        let inserted = self.insert_in(ctx, &new)?;
        let updated = self.update_in(ctx, &pairs, self.config.update_all_columns)?;
        Ok(inserted.add(updated))
    }

    // ========================================================================
    // Select
    // ========================================================================

    pub fn select(
        &self,
        executor: &dyn StatementExecutor,
        ids: &[I],
    ) -> Result<Vec<EntityRef<C>>> {
        self.select_in(&PersistContext::new(executor), ids)
    }

    /// Select within an ongoing call, with a fresh identity cache.
    pub fn select_in(&self, ctx: &PersistContext<'_>, ids: &[I]) -> Result<Vec<EntityRef<C>>> {
        let mut cache = IdentityCache::new();
        self.select_cached(ctx, ids, None, &mut cache)
    }

    /// Select sharing instances with `cache`, which outlives the call.
    pub fn select_with_cache(
        &self,
        executor: &dyn StatementExecutor,
        ids: &[I],
        cache: &mut IdentityCache,
    ) -> Result<Vec<EntityRef<C>>> {
        self.select_cached(&PersistContext::new(executor), ids, None, cache)
    }

    /// Select by identifiers, narrowed by `criteria`.
    pub fn select_matching(
        &self,
        executor: &dyn StatementExecutor,
        ids: &[I],
        criteria: &Criteria,
    ) -> Result<Vec<EntityRef<C>>> {
        let mut cache = IdentityCache::new();
        self.select_cached(&PersistContext::new(executor), ids, Some(criteria), &mut cache)
    }

    fn select_cached(
        &self,
        ctx: &PersistContext<'_>,
        ids: &[I],
        criteria: Option<&Criteria>,
        cache: &mut IdentityCache,
    ) -> Result<Vec<EntityRef<C>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.listeners.select.run(ctx, ids, || {
            let values: Vec<Value> = ids.iter().map(Identifier::to_value).collect();
            let roots = self
                .graph_select()
                .select(ctx.executor(), &values, criteria, cache)?;
            self.typed(&roots)
        })
    }

    /// Select the roots matching `criteria` alone.
    pub fn select_where(
        &self,
        executor: &dyn StatementExecutor,
        criteria: &Criteria,
    ) -> Result<Vec<EntityRef<C>>> {
        let ctx = PersistContext::new(executor);
        let mut cache = IdentityCache::new();
        self.listeners.select.run(&ctx, &[], || {
            let roots = self
                .graph_select()
                .select_where(executor, criteria, &mut cache)?;
            self.typed(&roots)
        })
    }

    fn compiled(&self) -> &CompiledTree {
        self.compiled
            .get_or_init(|| self.tree.compile(self.dml.binders()))
    }

    fn graph_select(&self) -> GraphSelect<'_> {
        GraphSelect::new(
            &self.tree,
            self.compiled(),
            &self.dml,
            self.config.dialect.in_operator_max_size,
        )
    }

    fn typed(&self, roots: &[AnyEntity]) -> Result<Vec<EntityRef<C>>> {
        roots
            .iter()
            .map(|root| {
                EntityRef::from_any(root).ok_or_else(|| {
                    Error::Custom(format!(
                        "select of {} produced another entity type",
                        self.mapping.entity_name()
                    ))
                })
            })
            .collect()
    }

    // ========================================================================
    // Statement execution
    // ========================================================================

    pub(crate) fn writer<'a>(&'a self, ctx: &PersistContext<'a>) -> Writer<'a> {
        Writer {
            executor: ctx.executor(),
            retry: self.retry.as_ref(),
            batch_size: self.config.batch_size,
        }
    }
}

impl<C, I> fmt::Debug for Persister<C, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persister")
            .field("mapping", &self.mapping)
            .field("config", &self.config)
            .field("join_nodes", &self.tree.len())
            .finish_non_exhaustive()
    }
}
