//! relmap - aggregate persistence for Rust.
//!
//! relmap maps in-memory entity graphs to relational tables and back:
//!
//! - Class mappings with compile-time checked property accessors
//! - Diff-based updates sending only the columns that changed
//! - One select per aggregate, hydrated into a deduplicated object graph
//! - Relation cascades that order inserts, updates and deletes by foreign key
//!
//! Statements are executed by a caller-supplied [`StatementExecutor`]; relmap
//! never opens connections or manages transactions.
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Toto {
//!     a: i64,
//!     b: i32,
//!     c: i32,
//! }
//!
//! let mut table = Table::new("Toto")?;
//! table.add_column(ColumnDef::new("a", SqlType::BigInt).primary_key())?;
//! table.add_column(ColumnDef::new("b", SqlType::Integer))?;
//! table.add_column(ColumnDef::new("c", SqlType::Integer))?;
//!
//! let mapping = ClassMapping::builder(table)
//!     .identifier("a", |t: &Toto| t.a, |t, v| t.a = v)
//!     .property("b", |t: &Toto| t.b, |t, v| t.b = v)
//!     .property("c", |t: &Toto| t.c, |t, v| t.c = v)
//!     .build()?;
//! let persister = Persister::with_defaults(Arc::new(mapping))?;
//!
//! // insert into Toto(a, b, c) values (?, ?, ?)
//! persister.insert(&executor, &[EntityRef::new(Toto { a: 1, b: 17, c: 23 })])?;
//! let loaded = persister.select(&executor, &[1])?;
//! ```
//!
//! # Crates
//!
//! - `relmap-core`: values, table metadata, mapping strategies, errors
//! - `relmap-query`: statement generation
//! - `relmap-session`: persisters, join trees, cascades and listeners

pub use relmap_core::mapping::{
    ColumnedCollectionMapper, ColumnedMapMapper, EmbeddedBeanMapper, ZonedTimestamp,
    ZonedTimestampMapper,
};
pub use relmap_core::{
    BinderRegistry, Bindings, BoundedRetry, ClassMapping, ClassMappingBuilder, Column, ColumnDef,
    ColumnLabels, ColumnValues, ConfigError, ConfigErrorKind, DefaultBinder, Dialect,
    EmbeddedMapper, Error, ForeignKey, FromValue, Identifier, IdentifierPolicy, Index,
    IsNewPolicy, MandatoryRelationError, NoRetry, ParameterBinder, PersistableId, PreparedSql,
    QueryError, QueryErrorKind, Result, RetryConfig, RetryPolicy, Row, RowCount, RowStream,
    RowValueMap, SqlType, StaleObjectError, StatementExecutor, Table, TypeError, UpdateValues,
    UpsertColumn, Value, ValueKey,
};
pub use relmap_query::{
    ColumnSorter, ColumnSql, Criteria, DeclarationOrder, DmlGenerator, JoinClause, JoinType,
    NameOrder, ParameterizedSql, SelectQuery, UpsertSql,
};
pub use relmap_session::{
    AnyEntity, AssociationPersister, AssociationRecord, AssociationTable, ColumnOrder,
    EntityInflater, EntityRef, IdentityCache, JoinOn, JoinTree, ManyToMany, MergeApplier, NodeId,
    NodeRow, OneToMany, OneToOne, PersistContext, PersistListeners, Persister, PersisterConfig,
    RelationFixer, RelationKeyProvider, SelectListener, SilentColumns, SilentGuard, UpdatePair,
    WriteListener, merge_applier, relation_fixer,
};

/// Common imports.
///
/// ```ignore
/// use relmap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Mapping
        ClassMapping,
        Column,
        ColumnDef,
        // Query
        Criteria,
        // Session
        EntityRef,
        // Core
        Error,
        IdentifierPolicy,
        IdentityCache,
        JoinType,
        ManyToMany,
        OneToMany,
        OneToOne,
        PersistContext,
        Persister,
        PersisterConfig,
        Result,
        Row,
        RowCount,
        SqlType,
        StatementExecutor,
        Table,
        UpdatePair,
        Value,
        WriteListener,
    };
    pub use std::sync::Arc;
}
