//! The statement-execution collaborator.
//!
//! relmap never opens connections itself. Every statement goes through a
//! caller-supplied [`StatementExecutor`], which receives the SQL text, the
//! binder of every placeholder and the positional values to bind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::Result;
use crate::binder::ParameterBinder;
use crate::error::{Error, QueryErrorKind};
use crate::row::Row;
use crate::schema::Column;
use crate::value::Value;

/// Positional values keyed by 1-based placeholder index.
pub type Bindings = BTreeMap<usize, Value>;

/// Stream of result rows.
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<Row>> + 'a>;

/// SQL text plus the binder of each placeholder.
#[derive(Clone)]
pub struct PreparedSql {
    sql: String,
    binders: BTreeMap<usize, Arc<dyn ParameterBinder>>,
}

impl PreparedSql {
    pub fn new(sql: impl Into<String>, binders: BTreeMap<usize, Arc<dyn ParameterBinder>>) -> Self {
        Self {
            sql: sql.into(),
            binders,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Binder of a placeholder.
    pub fn binder(&self, index: usize) -> Option<&Arc<dyn ParameterBinder>> {
        self.binders.get(&index)
    }

    pub fn binders(&self) -> &BTreeMap<usize, Arc<dyn ParameterBinder>> {
        &self.binders
    }

    pub fn parameter_count(&self) -> usize {
        self.binders.len()
    }
}

impl fmt::Debug for PreparedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedSql")
            .field("sql", &self.sql)
            .field("parameters", &self.binders.len())
            .finish()
    }
}

/// Affected-row count reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCount {
    Exact(u64),
    /// The driver could not tell; row-count checks are skipped.
    NoInfo,
}

impl RowCount {
    /// Sum two counts; `NoInfo` is absorbing.
    #[must_use]
    pub fn add(self, other: RowCount) -> RowCount {
        match (self, other) {
            (RowCount::Exact(a), RowCount::Exact(b)) => RowCount::Exact(a + b),
            _ => RowCount::NoInfo,
        }
    }

    pub fn exact(self) -> Option<u64> {
        match self {
            RowCount::Exact(n) => Some(n),
            RowCount::NoInfo => None,
        }
    }

    pub fn sum(counts: impl IntoIterator<Item = RowCount>) -> RowCount {
        counts
            .into_iter()
            .fold(RowCount::Exact(0), RowCount::add)
    }
}

/// Executes statements on behalf of relmap.
///
/// Implementations apply the write binders of [`PreparedSql`] to the bound
/// values and bind placeholders that have no binder as is; relmap applies
/// read binders itself when reading rows.
pub trait StatementExecutor {
    /// Execute one write statement.
    fn execute(&self, statement: &PreparedSql, values: &Bindings) -> Result<RowCount>;

    /// Execute one write statement for each entry of a batch, in order.
    fn execute_batch(&self, statement: &PreparedSql, batch: &[Bindings]) -> Result<Vec<RowCount>>;

    /// Execute a query and stream its rows.
    fn execute_query<'a>(
        &'a self,
        statement: &PreparedSql,
        values: &Bindings,
    ) -> Result<RowStream<'a>>;

    /// Execute an insert and return the key generated for `key_column`.
    fn execute_returning_key(
        &self,
        statement: &PreparedSql,
        values: &Bindings,
        key_column: &Column,
    ) -> Result<Value> {
        let _ = (values, key_column);
        Err(Error::query(
            QueryErrorKind::Unsupported,
            "executor does not report generated keys",
        )
        .with_sql(statement.sql()))
    }
}
