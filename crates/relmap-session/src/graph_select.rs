//! Graph select: runs a compiled join tree and hydrates its rows.
//!
//! Identifiers are split in chunks of at most the dialect's IN list size;
//! full chunks share one statement and the last, shorter chunk gets its own.
//! Every row is walked breadth-first from the root:
//!
//! - root and relation nodes resolve their instance through the identity
//!   cache, building it only on first sight,
//! - relation nodes with a null identifier are skipped with their subtree,
//! - a child is attached to its parent once per (node, parent, relation key),
//! - merge nodes complete their parent instance once,
//! - passive nodes hand their parent down to their children.

use std::collections::{HashSet, VecDeque};

use relmap_core::{Bindings, ColumnValues, Result, Row, StatementExecutor, Value, ValueKey};
use relmap_query::{Criteria, DmlGenerator};

use crate::entity::{AnyEntity, any_key};
use crate::identity_cache::IdentityCache;
use crate::join_tree::{
    ChunkStatement, CompiledTree, EntityInflater, JoinTree, NodeId, NodeKind, NodeRow,
};

/// One select over a join tree.
pub(crate) struct GraphSelect<'t> {
    tree: &'t JoinTree,
    compiled: &'t CompiledTree,
    dml: &'t DmlGenerator,
    in_operator_max_size: usize,
}

/// What was already done while hydrating the rows of one call.
#[derive(Default)]
struct Hydration {
    roots: Vec<AnyEntity>,
    seen_roots: HashSet<usize>,
    fixed: HashSet<(NodeId, usize, Vec<ValueKey>)>,
    merged: HashSet<(NodeId, usize)>,
}

impl<'t> GraphSelect<'t> {
    pub(crate) fn new(
        tree: &'t JoinTree,
        compiled: &'t CompiledTree,
        dml: &'t DmlGenerator,
        in_operator_max_size: usize,
    ) -> Self {
        Self {
            tree,
            compiled,
            dml,
            in_operator_max_size: in_operator_max_size.max(1),
        }
    }

    /// Roots with the given identifiers, in order of first appearance in
    /// the result rows.
    #[tracing::instrument(level = "debug", skip_all, fields(ids = ids.len()))]
    pub(crate) fn select(
        &self,
        executor: &dyn StatementExecutor,
        ids: &[Value],
        criteria: Option<&Criteria>,
        cache: &mut IdentityCache,
    ) -> Result<Vec<AnyEntity>> {
        let mut seen = HashSet::new();
        let ids: Vec<Value> = ids
            .iter()
            .filter(|id| !id.is_null() && seen.insert(ValueKey::new((*id).clone())))
            .cloned()
            .collect();

        let max = self.in_operator_max_size;
        let full = if ids.len() >= max {
            Some(self.compiled.by_ids(self.dml, max, criteria)?)
        } else {
            None
        };
        let mut state = Hydration::default();
        for chunk in ids.chunks(max) {
            let remainder;
            let statement = match &full {
                Some(statement) if chunk.len() == max => statement,
                _ => {
                    remainder = self.compiled.by_ids(self.dml, chunk.len(), criteria)?;
                    &remainder
                }
            };
            let bindings = statement.bind(chunk, criteria)?;
            self.run(executor, statement, &bindings, cache, &mut state)?;
        }
        tracing::debug!(
            table = self.compiled.root_alias(),
            roots = state.roots.len(),
            "Hydrated aggregate roots"
        );
        Ok(state.roots)
    }

    /// Roots matching `criteria`.
    #[tracing::instrument(level = "debug", skip_all, fields(criteria = criteria.sql()))]
    pub(crate) fn select_where(
        &self,
        executor: &dyn StatementExecutor,
        criteria: &Criteria,
        cache: &mut IdentityCache,
    ) -> Result<Vec<AnyEntity>> {
        let statement = self.compiled.by_criteria(criteria);
        let bindings = statement.bind(&[], Some(criteria))?;
        let mut state = Hydration::default();
        self.run(executor, &statement, &bindings, cache, &mut state)?;
        Ok(state.roots)
    }

    fn run(
        &self,
        executor: &dyn StatementExecutor,
        statement: &ChunkStatement,
        bindings: &Bindings,
        cache: &mut IdentityCache,
        state: &mut Hydration,
    ) -> Result<()> {
        let sql = statement.prepared.sql();
        tracing::debug!(sql, parameters = bindings.len(), "Executing graph select");
        let rows = executor
            .execute_query(&statement.prepared, bindings)
            .map_err(|e| e.with_sql(sql))?;
        let mut count = 0_usize;
        for row in rows {
            let row = row.map_err(|e| e.with_sql(sql))?;
            self.hydrate(&row, cache, state)
                .map_err(|e| e.with_sql(sql))?;
            count += 1;
        }
        tracing::trace!(rows = count, "Read graph select rows");
        Ok(())
    }

    fn hydrate(&self, row: &Row, cache: &mut IdentityCache, state: &mut Hydration) -> Result<()> {
        let values = self.compiled.read_row(row)?;
        let mut queue: VecDeque<(NodeId, Option<AnyEntity>)> = VecDeque::new();
        queue.push_back((self.tree.root(), None));

        while let Some((id, parent)) = queue.pop_front() {
            let node = self.tree.node(id);
            let node_values = &values[id.index()];
            let current = match &node.kind {
                NodeKind::Root { inflater } => {
                    let Some(root) = resolve(inflater.as_ref(), node_values, cache)? else {
                        continue;
                    };
                    if state.seen_roots.insert(any_key(&root)) {
                        state.roots.push(root.clone());
                    }
                    Some(root)
                }
                NodeKind::Relation {
                    inflater,
                    fixer,
                    relation_key,
                } => {
                    let Some(parent) = parent else { continue };
                    let Some(child) = resolve(inflater.as_ref(), node_values, cache)? else {
                        continue;
                    };
                    let key = match relation_key {
                        Some(provider) => provider(&NodeRow::new(id, self.tree, &values))?,
                        None => vec![identifier(inflater.as_ref(), node_values)],
                    };
                    let key = key.into_iter().map(ValueKey::new).collect();
                    if state.fixed.insert((id, any_key(&parent), key)) {
                        fixer(&parent, &child)?;
                    }
                    Some(child)
                }
                NodeKind::Merge { applier } => {
                    let Some(parent) = parent else { continue };
                    let present = node_values.iter().any(|(_, v)| !v.is_null());
                    if present && state.merged.insert((id, any_key(&parent))) {
                        applier(&parent, node_values)?;
                    }
                    Some(parent)
                }
                NodeKind::Passive => parent,
            };
            for child in &node.children {
                queue.push_back((*child, current.clone()));
            }
        }
        Ok(())
    }
}

fn identifier(inflater: &dyn EntityInflater, values: &ColumnValues) -> Value {
    values
        .get(inflater.identifier_column())
        .cloned()
        .unwrap_or(Value::Null)
}

/// Cached instance for the node's identifier, `None` when it is null.
fn resolve(
    inflater: &dyn EntityInflater,
    values: &ColumnValues,
    cache: &mut IdentityCache,
) -> Result<Option<AnyEntity>> {
    let id = identifier(inflater, values);
    if id.is_null() {
        return Ok(None);
    }
    let (entity, inserted) =
        cache.get_or_insert_with(inflater.entity_type(), &id, || inflater.inflate(values))?;
    if inserted {
        tracing::trace!(entity = inflater.entity_name(), id = ?id, "Inflated entity");
    }
    Ok(Some(entity))
}
