//! Core types for relmap.
//!
//! This crate provides the foundations shared by the statement generator
//! and the persistence pipeline:
//!
//! - `Value` and `Row` for data exchanged with the database
//! - `Table`, `Column`, `ForeignKey`, `Index` table metadata
//! - `RowValueMap` maps exchanged between mapping strategies and SQL generation
//! - `ClassMapping` and embedded sub-strategies
//! - `StatementExecutor`, the caller-supplied statement execution interface
//! - binders, retry policies and dialect settings

pub mod binder;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod mapping;
pub mod naming;
pub mod retry;
pub mod row;
pub mod row_values;
pub mod schema;
pub mod types;
pub mod value;

pub use binder::{BinderRegistry, DefaultBinder, ParameterBinder};
pub use dialect::Dialect;
pub use error::{
    ConfigError, ConfigErrorKind, Error, MandatoryRelationError, QueryError, QueryErrorKind,
    Result, StaleObjectError, TypeError,
};
pub use executor::{Bindings, PreparedSql, RowCount, RowStream, StatementExecutor};
pub use mapping::{
    ClassMapping, ClassMappingBuilder, EmbeddedMapper, Identifier, IdentifierPolicy, IsNewPolicy,
    PersistableId,
};
pub use retry::{BoundedRetry, NoRetry, RetryConfig, RetryPolicy};
pub use row::{ColumnLabels, Row};
pub use row_values::{ColumnValues, RowValueMap, UpdateValues, UpsertColumn};
pub use schema::{Column, ColumnDef, ForeignKey, Index, Table};
pub use types::SqlType;
pub use value::{FromValue, Value, ValueKey};
