//! Statement generation for relmap.
//!
//! `relmap-query` turns column lists into parameterized SQL. It never talks to
//! a database: statements are handed to a `StatementExecutor` by the session
//! layer.
//!
//! - [`DmlGenerator`] builds insert, update, delete and select-by-key
//!   statements, including tuple IN lists for batched key lookups
//! - [`ParameterizedSql`] keeps the placeholder indexes and binder of every
//!   column so row values can be bound positionally
//! - [`SelectQuery`] and [`JoinClause`] render compiled join trees
//! - [`Criteria`] is an opaque where fragment supplied by callers

pub mod criteria;
pub mod dml;
pub mod select;
pub mod sorter;
pub mod statement;

pub use criteria::Criteria;
pub use dml::{DmlGenerator, ReadBinders, SelectSql};
pub use select::{JoinClause, JoinType, SelectQuery, column_alias};
pub use sorter::{ColumnSorter, DeclarationOrder, NameOrder};
pub use statement::{ColumnSql, ParameterizedSql, UpsertSql};
