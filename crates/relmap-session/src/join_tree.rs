//! Join tree: the shape of an aggregate select.
//!
//! The tree is built once at configuration time. Its root wraps the mapping
//! of the aggregate root; every other node is one of
//!
//! - a relation node, wrapping the mapping of a related entity and a fixer
//!   that attaches each child instance to its parent,
//! - a merge node, whose columns complete the parent instance,
//! - a passive node, joined only to reach further tables (association
//!   tables).
//!
//! Compiling the tree yields one select statement with unique table aliases
//! and `alias_column` column labels; [`GraphSelect`](crate::graph_select)
//! turns its rows back into an object graph.

use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use relmap_core::{
    BinderRegistry, Bindings, ClassMapping, Column, ColumnValues, ConfigErrorKind, Error,
    Identifier, ParameterBinder, PreparedSql, Result, Row, Table, Value,
};
use relmap_query::{
    ColumnSql, Criteria, DmlGenerator, JoinClause, JoinType, SelectQuery, column_alias,
};

use crate::entity::{AnyEntity, EntityRef};

/// Creates entity instances for a node from the node's column values.
pub trait EntityInflater: Send + Sync {
    fn entity_type(&self) -> TypeId;
    fn entity_name(&self) -> &'static str;
    fn table(&self) -> &Arc<Table>;
    fn columns(&self) -> &[Column];
    fn identifier_column(&self) -> &Column;
    fn inflate(&self, values: &ColumnValues) -> Result<AnyEntity>;
}

impl<C, I> EntityInflater for ClassMapping<C, I>
where
    C: Send + Sync + 'static,
    I: Identifier,
{
    fn entity_type(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn entity_name(&self) -> &'static str {
        ClassMapping::entity_name(self)
    }

    fn table(&self) -> &Arc<Table> {
        ClassMapping::table(self)
    }

    fn columns(&self) -> &[Column] {
        ClassMapping::columns(self)
    }

    fn identifier_column(&self) -> &Column {
        ClassMapping::identifier_column(self)
    }

    fn inflate(&self, values: &ColumnValues) -> Result<AnyEntity> {
        Ok(EntityRef::new(self.transform(values)?).into_any())
    }
}

/// Attaches a child instance to its parent instance.
pub type RelationFixer = Arc<dyn Fn(&AnyEntity, &AnyEntity) -> Result<()> + Send + Sync>;

/// Applies merge-node values onto the parent instance.
pub type MergeApplier = Arc<dyn Fn(&AnyEntity, &ColumnValues) -> Result<()> + Send + Sync>;

/// Key under which a child is attached to a parent, when the child
/// identifier alone is not enough (the same child at several positions of a
/// list).
pub type RelationKeyProvider = Arc<dyn Fn(&NodeRow<'_>) -> Result<Vec<Value>> + Send + Sync>;

fn downcast<T: Send + Sync + 'static>(entity: &AnyEntity, role: &str) -> Result<EntityRef<T>> {
    EntityRef::from_any(entity).ok_or_else(|| {
        Error::Custom(format!(
            "relation {role} is not a {}",
            std::any::type_name::<T>()
        ))
    })
}

/// Typed [`RelationFixer`].
pub fn relation_fixer<P, T>(fix: impl Fn(&mut P, EntityRef<T>) + Send + Sync + 'static) -> RelationFixer
where
    P: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    Arc::new(move |parent, child| {
        let parent = downcast::<P>(parent, "parent")?;
        let child = downcast::<T>(child, "child")?;
        fix(&mut parent.write(), child);
        Ok(())
    })
}

/// Typed [`MergeApplier`].
pub fn merge_applier<P>(
    apply: impl Fn(&mut P, &ColumnValues) -> Result<()> + Send + Sync + 'static,
) -> MergeApplier
where
    P: Send + Sync + 'static,
{
    Arc::new(move |parent, values| {
        let parent = downcast::<P>(parent, "parent")?;
        apply(&mut parent.write(), values)
    })
}

/// Index of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Single-column join condition `parent = child`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOn {
    parent: Column,
    child: Column,
}

impl JoinOn {
    pub fn new(parent: &Column, child: &Column) -> Self {
        Self {
            parent: parent.clone(),
            child: child.clone(),
        }
    }

    /// Join condition from column lists, which must hold exactly one column
    /// each.
    pub fn from_columns(parent: &[Column], child: &[Column]) -> Result<Self> {
        if parent.len() != child.len() {
            return Err(Error::config(
                ConfigErrorKind::ForeignKeyMismatch,
                format!(
                    "join compares {} columns with {} columns",
                    parent.len(),
                    child.len()
                ),
            ));
        }
        match (parent, child) {
            ([p], [c]) => Ok(Self::new(p, c)),
            _ => Err(Error::config(
                ConfigErrorKind::CompositeKeyJoin,
                format!("composite key joins are not supported ({} columns)", parent.len()),
            )),
        }
    }

    pub fn parent(&self) -> &Column {
        &self.parent
    }

    pub fn child(&self) -> &Column {
        &self.child
    }
}

#[derive(Clone)]
pub(crate) enum NodeKind {
    Root {
        inflater: Arc<dyn EntityInflater>,
    },
    Relation {
        inflater: Arc<dyn EntityInflater>,
        fixer: RelationFixer,
        relation_key: Option<RelationKeyProvider>,
    },
    Merge {
        applier: MergeApplier,
    },
    Passive,
}

impl NodeKind {
    fn name(&self) -> &'static str {
        match self {
            NodeKind::Root { .. } => "root",
            NodeKind::Relation { .. } => "relation",
            NodeKind::Merge { .. } => "merge",
            NodeKind::Passive => "passive",
        }
    }
}

#[derive(Clone)]
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) table: Arc<Table>,
    pub(crate) columns: Vec<Column>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) join: Option<(JoinOn, JoinType)>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) order_by: Vec<Column>,
}

/// Arena of join nodes rooted at an aggregate root mapping.
#[derive(Clone)]
pub struct JoinTree {
    nodes: Vec<Node>,
    identifier: Column,
}

fn check_columns(table: &Table, columns: &[Column]) -> Result<()> {
    match columns.iter().find(|c| !c.belongs_to(table)) {
        Some(c) => Err(Error::config(
            ConfigErrorKind::UnknownColumn,
            format!("column {c} is not part of table {}", table.name()),
        )),
        None => Ok(()),
    }
}

impl JoinTree {
    pub fn new(root: Arc<dyn EntityInflater>) -> Self {
        let identifier = root.identifier_column().clone();
        let node = Node {
            table: Arc::clone(root.table()),
            columns: root.columns().to_vec(),
            kind: NodeKind::Root { inflater: root },
            parent: None,
            join: None,
            children: Vec::new(),
            order_by: Vec::new(),
        };
        Self {
            nodes: vec![node],
            identifier,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id.0).map_or(&[], |n| n.children.as_slice())
    }

    /// Table joined by a node.
    pub fn table(&self, id: NodeId) -> Option<&Arc<Table>> {
        self.nodes.get(id.0).map(|n| &n.table)
    }

    fn require(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or_else(|| {
            Error::config(ConfigErrorKind::Invalid, format!("unknown join node {}", id.0))
        })
    }

    fn push(&mut self, parent: NodeId, on: JoinOn, join_type: JoinType, node: Node) -> Result<NodeId> {
        let parent_table = Arc::clone(&self.require(parent)?.table);
        check_columns(&parent_table, std::slice::from_ref(&on.parent))?;
        check_columns(&node.table, std::slice::from_ref(&on.child))?;
        check_columns(&node.table, &node.columns)?;
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: Some(parent),
            join: Some((on, join_type)),
            ..node
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Join the entity built by `inflater` under `parent`; `fixer` attaches
    /// it to the parent instance.
    pub fn add_relation(
        &mut self,
        parent: NodeId,
        on: JoinOn,
        join_type: JoinType,
        inflater: Arc<dyn EntityInflater>,
        fixer: RelationFixer,
    ) -> Result<NodeId> {
        let node = Node {
            table: Arc::clone(inflater.table()),
            columns: inflater.columns().to_vec(),
            kind: NodeKind::Relation {
                inflater,
                fixer,
                relation_key: None,
            },
            parent: None,
            join: None,
            children: Vec::new(),
            order_by: Vec::new(),
        };
        self.push(parent, on, join_type, node)
    }

    /// Join `table` and apply its `columns` onto the parent instance.
    pub fn add_merge(
        &mut self,
        parent: NodeId,
        on: JoinOn,
        join_type: JoinType,
        table: Arc<Table>,
        columns: Vec<Column>,
        applier: MergeApplier,
    ) -> Result<NodeId> {
        let node = Node {
            kind: NodeKind::Merge { applier },
            table,
            columns,
            parent: None,
            join: None,
            children: Vec::new(),
            order_by: Vec::new(),
        };
        self.push(parent, on, join_type, node)
    }

    /// Join `table` without building anything from it; `columns` are read so
    /// descendants can use them.
    pub fn add_passive(
        &mut self,
        parent: NodeId,
        on: JoinOn,
        join_type: JoinType,
        table: Arc<Table>,
        columns: Vec<Column>,
    ) -> Result<NodeId> {
        let node = Node {
            kind: NodeKind::Passive,
            table,
            columns,
            parent: None,
            join: None,
            children: Vec::new(),
            order_by: Vec::new(),
        };
        self.push(parent, on, join_type, node)
    }

    /// Key children of a relation node by `provider` instead of their
    /// identifier.
    pub fn set_relation_key(&mut self, id: NodeId, provider: RelationKeyProvider) -> Result<()> {
        let kind = self.require(id)?.kind.name();
        match &mut self.nodes[id.0].kind {
            NodeKind::Relation { relation_key, .. } => {
                *relation_key = Some(provider);
                Ok(())
            }
            _ => Err(Error::config(
                ConfigErrorKind::Invalid,
                format!("only relation nodes take a relation key, node {} is a {kind} node", id.0),
            )),
        }
    }

    /// Order rows by a column of the node's table.
    pub fn add_order_by(&mut self, id: NodeId, column: &Column) -> Result<()> {
        let table = Arc::clone(&self.require(id)?.table);
        check_columns(&table, std::slice::from_ref(column))?;
        self.nodes[id.0].order_by.push(column.clone());
        Ok(())
    }

    /// Copy everything below the root of `other` under `under`, which must
    /// join the same table as that root.
    pub fn graft(&mut self, under: NodeId, other: &JoinTree) -> Result<()> {
        let target = self.require(under)?;
        let other_root = other.node(other.root());
        if *target.table != *other_root.table {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                format!(
                    "cannot graft a tree of {} under a node of {}",
                    other_root.table.name(),
                    target.table.name()
                ),
            ));
        }
        self.nodes[under.0]
            .order_by
            .extend(other_root.order_by.iter().cloned());
        for child in &other_root.children {
            self.copy_subtree(other, *child, under);
        }
        Ok(())
    }

    fn copy_subtree(&mut self, other: &JoinTree, source: NodeId, parent: NodeId) {
        let original = other.node(source);
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            ..original.clone()
        });
        self.nodes[parent.0].children.push(id);
        for child in &original.children {
            self.copy_subtree(other, *child, id);
        }
    }

    /// Render the tree as one select statement, without its where clause.
    pub(crate) fn compile(&self, binders: &BinderRegistry) -> CompiledTree {
        let mut compiler = Compiler {
            tree: self,
            binders,
            used: HashSet::new(),
            labels: HashSet::new(),
            aliases: vec![String::new(); self.nodes.len()],
            projections: vec![Vec::new(); self.nodes.len()],
            query: SelectQuery::default(),
            order_by: Vec::new(),
        };
        let root = self.node(self.root());
        let root_alias = compiler.alias_for(&root.table);
        compiler.query = SelectQuery::new(root.table.qualified_name(), root_alias.clone());
        compiler.visit(self.root(), root_alias.clone(), false);
        let Compiler {
            query,
            order_by,
            projections,
            ..
        } = compiler;
        let query = order_by.into_iter().fold(query, |q, o| q.order_by(o));
        let sql = query.to_sql();
        tracing::debug!(sql = %sql, nodes = self.nodes.len(), "Compiled join tree");
        CompiledTree {
            query,
            root_alias,
            root_id: self.identifier.clone(),
            projections,
        }
    }
}

impl fmt::Debug for JoinTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for (i, node) in self.nodes.iter().enumerate() {
            list.entry(&format_args!(
                "#{i} {} {} <- {:?}",
                node.kind.name(),
                node.table.name(),
                node.parent.map(NodeId::index)
            ));
        }
        list.finish()
    }
}

struct Compiler<'t> {
    tree: &'t JoinTree,
    binders: &'t BinderRegistry,
    used: HashSet<String>,
    labels: HashSet<String>,
    aliases: Vec<String>,
    projections: Vec<Vec<ProjectedColumn>>,
    query: SelectQuery,
    order_by: Vec<String>,
}

impl Compiler<'_> {
    fn alias_for(&mut self, table: &Table) -> String {
        let base = table.name().to_string();
        let mut alias = base.clone();
        let mut n = 1;
        while !self.used.insert(alias.to_lowercase()) {
            alias = format!("{base}{n}");
            n += 1;
        }
        alias
    }

    /// Result labels are matched case-insensitively, so `A.b_c` and `A_b.c`
    /// must not share one.
    fn label_for(&mut self, alias: &str, column: &str) -> String {
        let base = column_alias(alias, column);
        let mut label = base.clone();
        let mut n = 1;
        while !self.labels.insert(label.to_lowercase()) {
            label = format!("{base}{n}");
            n += 1;
        }
        label
    }

    /// Pre-order walk. Below an outer join every join is outer, otherwise
    /// an inner join would drop parents without children.
    fn visit(&mut self, id: NodeId, alias: String, outer: bool) {
        let tree = self.tree;
        let node = tree.node(id);
        for column in &node.columns {
            let label = self.label_for(&alias, column.name());
            self.query = std::mem::take(&mut self.query)
                .column(format!("{alias}.{}", column.name()), label.clone());
            self.projections[id.0].push(ProjectedColumn {
                column: column.clone(),
                label,
                binder: self.binders.get_binder(column),
            });
        }
        for column in &node.order_by {
            self.order_by.push(format!("{alias}.{}", column.name()));
        }
        self.aliases[id.0] = alias.clone();
        for child_id in &node.children {
            let child = tree.node(*child_id);
            let Some((on, join_type)) = &child.join else {
                continue;
            };
            let join_type = if outer { JoinType::LeftOuter } else { *join_type };
            let child_alias = self.alias_for(&child.table);
            self.query = std::mem::take(&mut self.query).join(JoinClause::new(
                join_type,
                child.table.qualified_name(),
                child_alias.clone(),
                format!("{alias}.{}", on.parent().name()),
                format!("{child_alias}.{}", on.child().name()),
            ));
            self.visit(*child_id, child_alias, join_type == JoinType::LeftOuter);
        }
    }
}

#[derive(Clone)]
pub(crate) struct ProjectedColumn {
    column: Column,
    label: String,
    binder: Arc<dyn ParameterBinder>,
}

/// A compiled join tree.
pub(crate) struct CompiledTree {
    query: SelectQuery,
    root_alias: String,
    root_id: Column,
    projections: Vec<Vec<ProjectedColumn>>,
}

/// Statement for one chunk size.
pub(crate) struct ChunkStatement {
    pub(crate) prepared: PreparedSql,
    keys: Option<ColumnSql>,
}

impl ChunkStatement {
    /// Bind `ids` to the key placeholders and the criteria values after
    /// them.
    pub(crate) fn bind(&self, ids: &[Value], criteria: Option<&Criteria>) -> Result<Bindings> {
        let mut bindings = match &self.keys {
            Some(keys) => keys.bind_keys(ids)?,
            None => Bindings::new(),
        };
        let offset = bindings.len();
        if let Some(criteria) = criteria {
            for (i, value) in criteria.values().iter().enumerate() {
                bindings.insert(offset + i + 1, value.clone());
            }
        }
        Ok(bindings)
    }
}

impl CompiledTree {
    pub(crate) fn root_alias(&self) -> &str {
        &self.root_alias
    }

    /// Select of the roots with `count` identifiers, optionally narrowed by
    /// `criteria`.
    pub(crate) fn by_ids(
        &self,
        dml: &DmlGenerator,
        count: usize,
        criteria: Option<&Criteria>,
    ) -> Result<ChunkStatement> {
        let (predicate, keys) = dml.key_predicate(
            std::slice::from_ref(&self.root_id),
            count,
            Some(&self.root_alias),
        )?;
        let condition = match criteria {
            Some(c) => format!("{predicate} and ({})", c.sql()),
            None => predicate,
        };
        let sql = self.query.clone().filter(condition).to_sql();
        let prepared = PreparedSql::new(sql, keys.prepared().binders().clone());
        Ok(ChunkStatement {
            prepared,
            keys: Some(keys),
        })
    }

    /// Select of the roots matching `criteria` alone.
    pub(crate) fn by_criteria(&self, criteria: &Criteria) -> ChunkStatement {
        let sql = self.query.clone().filter(criteria.sql()).to_sql();
        ChunkStatement {
            prepared: PreparedSql::new(sql, Default::default()),
            keys: None,
        }
    }

    /// Column values of every node for one row, read binders applied.
    pub(crate) fn read_row(&self, row: &Row) -> Result<Vec<ColumnValues>> {
        self.projections
            .iter()
            .map(|columns| {
                let mut values = ColumnValues::with_capacity(columns.len());
                for projected in columns {
                    let raw = row.get_by_name(&projected.label).ok_or_else(|| {
                        Error::Custom(format!("result row has no column {}", projected.label))
                    })?;
                    let value = projected
                        .binder
                        .read(raw)
                        .map_err(|e| e.in_column(&projected.column.absolute_name()))?;
                    values.insert(projected.column.clone(), value);
                }
                Ok(values)
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn sql(&self) -> String {
        self.query.to_sql()
    }
}

/// Values of one result row as seen from one node.
///
/// Lookups start at the node and walk up through its ancestors, so a node
/// can read the columns of the tables it was reached through.
pub struct NodeRow<'r> {
    node: NodeId,
    tree: &'r JoinTree,
    values: &'r [ColumnValues],
}

impl<'r> NodeRow<'r> {
    pub(crate) fn new(node: NodeId, tree: &'r JoinTree, values: &'r [ColumnValues]) -> Self {
        Self { node, tree, values }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn value(&self, column: &Column) -> Option<&'r Value> {
        let mut current = Some(self.node);
        while let Some(id) = current {
            if let Some(value) = self.values.get(id.0).and_then(|v| v.get(column)) {
                return Some(value);
            }
            current = self.tree.parent(id);
        }
        None
    }
}
