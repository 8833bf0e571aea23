//! Insert, update, delete and select-by-key statement generation.
//!
//! Every builder takes columns and returns a [`ParameterizedSql`]: the SQL
//! text, the placeholder indexes of each column and its binder. No database
//! access happens here.
//!
//! ```ignore
//! let dml = DmlGenerator::new(Arc::new(BinderRegistry::new()));
//! let insert = dml.build_insert(&[a, b, c])?;
//! assert_eq!(insert.sql(), "insert into Toto(a, b, c) values (?, ?, ?)");
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use relmap_core::{
    BinderRegistry, Column, ConfigErrorKind, Error, ParameterBinder, Result, Table, UpsertColumn,
};

use crate::sorter::{ColumnSorter, DeclarationOrder};
use crate::statement::{ColumnSql, ParameterizedSql, UpsertSql};

/// Read binders of a projection, keyed by lowercase column name or alias.
pub type ReadBinders = HashMap<String, Arc<dyn ParameterBinder>>;

/// A select statement with its projection.
#[derive(Debug, Clone)]
pub struct SelectSql {
    pub statement: ColumnSql,
    pub projection: Vec<Column>,
    pub read_binders: ReadBinders,
}

/// Generates DML for the columns of one table at a time.
#[derive(Debug, Clone)]
pub struct DmlGenerator {
    binders: Arc<BinderRegistry>,
    sorter: Arc<dyn ColumnSorter>,
}

fn require_columns(columns: &[Column], what: &str) -> Result<()> {
    if columns.is_empty() {
        return Err(Error::config(
            ConfigErrorKind::Invalid,
            format!("cannot build {what} statement without columns"),
        ));
    }
    Ok(())
}

fn check_table(table: &Table, columns: &[Column]) -> Result<()> {
    match columns.iter().find(|c| !c.belongs_to(table)) {
        Some(c) => Err(Error::config(
            ConfigErrorKind::UnknownColumn,
            format!("column {c} does not belong to table {}", table.name()),
        )),
        None => Ok(()),
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl DmlGenerator {
    pub fn new(binders: Arc<BinderRegistry>) -> Self {
        Self {
            binders,
            sorter: Arc::new(DeclarationOrder),
        }
    }

    #[must_use]
    pub fn with_sorter(mut self, sorter: Arc<dyn ColumnSorter>) -> Self {
        self.sorter = sorter;
        self
    }

    pub fn binders(&self) -> &Arc<BinderRegistry> {
        &self.binders
    }

    fn sorted(&self, columns: &[Column]) -> Vec<Column> {
        let mut sorted = columns.to_vec();
        self.sorter.sort(&mut sorted);
        sorted
    }

    /// `insert into T(c1, c2) values (?, ?)`
    pub fn build_insert(&self, columns: &[Column]) -> Result<ColumnSql> {
        require_columns(columns, "insert")?;
        let columns = self.sorted(columns);
        let table = columns[0].qualified_table_name();
        let names: Vec<&str> = columns.iter().map(Column::name).collect();
        let sql = format!(
            "insert into {}({}) values ({})",
            table,
            names.join(", "),
            placeholders(columns.len())
        );
        let mut statement = ParameterizedSql::new(sql);
        for (i, column) in columns.into_iter().enumerate() {
            let binder = self.binders.get_binder(&column);
            statement.push_key(column, vec![i + 1], binder);
        }
        tracing::trace!(sql = statement.sql(), "Built insert");
        Ok(statement)
    }

    /// `update T set c1 = ?, c2 = ? where w1 = ? and w2 = ?`
    pub fn build_update(&self, set_columns: &[Column], where_columns: &[Column]) -> Result<UpsertSql> {
        require_columns(set_columns, "update")?;
        require_columns(where_columns, "update")?;
        let set_columns = self.sorted(set_columns);
        let where_columns = self.sorted(where_columns);
        let table = set_columns[0].qualified_table_name();
        let sets: Vec<String> = set_columns.iter().map(|c| format!("{} = ?", c.name())).collect();
        let conditions: Vec<String> = where_columns
            .iter()
            .map(|c| format!("{} = ?", c.name()))
            .collect();
        let sql = format!(
            "update {} set {} where {}",
            table,
            sets.join(", "),
            conditions.join(" and ")
        );
        let mut statement = ParameterizedSql::new(sql);
        let keys = set_columns
            .into_iter()
            .map(UpsertColumn::set)
            .chain(where_columns.into_iter().map(UpsertColumn::condition));
        for (i, key) in keys.enumerate() {
            let binder = self.binders.get_binder(key.column());
            statement.push_key(key, vec![i + 1], binder);
        }
        tracing::trace!(sql = statement.sql(), "Built update");
        Ok(statement)
    }

    /// `delete from T where w1 = ?`
    pub fn build_delete(&self, table: &Table, where_columns: &[Column]) -> Result<ColumnSql> {
        require_columns(where_columns, "delete")?;
        check_table(table, where_columns)?;
        let where_columns = self.sorted(where_columns);
        let conditions: Vec<String> = where_columns
            .iter()
            .map(|c| format!("{} = ?", c.name()))
            .collect();
        let sql = format!(
            "delete from {} where {}",
            table.qualified_name(),
            conditions.join(" and ")
        );
        let mut statement = ParameterizedSql::new(sql);
        for (i, column) in where_columns.into_iter().enumerate() {
            let binder = self.binders.get_binder(&column);
            statement.push_key(column, vec![i + 1], binder);
        }
        Ok(statement)
    }

    /// `delete from T where k in (?, ?)`, or with a composite key
    /// `delete from T where (k1, k2) in ((?, ?), (?, ?))`.
    pub fn build_delete_by_key(
        &self,
        table: &Table,
        key_columns: &[Column],
        tuple_count: usize,
    ) -> Result<ColumnSql> {
        check_table(table, key_columns)?;
        let (predicate, mut statement) = self.key_predicate(key_columns, tuple_count, None)?;
        statement.sql = format!("delete from {} where {}", table.qualified_name(), predicate);
        Ok(statement)
    }

    /// `select c1, c2 from T where w1 = ?`
    pub fn build_select(
        &self,
        table: &Table,
        columns: &[Column],
        where_columns: &[Column],
    ) -> Result<SelectSql> {
        require_columns(columns, "select")?;
        require_columns(where_columns, "select")?;
        check_table(table, columns)?;
        check_table(table, where_columns)?;
        let projection = self.sorted(columns);
        let where_columns = self.sorted(where_columns);
        let conditions: Vec<String> = where_columns
            .iter()
            .map(|c| format!("{} = ?", c.name()))
            .collect();
        let sql = format!(
            "select {} from {} where {}",
            projection_list(&projection),
            table.qualified_name(),
            conditions.join(" and ")
        );
        let mut statement = ParameterizedSql::new(sql);
        for (i, column) in where_columns.into_iter().enumerate() {
            let binder = self.binders.get_binder(&column);
            statement.push_key(column, vec![i + 1], binder);
        }
        let read_binders = self.read_binders(&projection);
        Ok(SelectSql {
            statement,
            projection,
            read_binders,
        })
    }

    /// `select c1, c2 from T where k in (?, ?)`
    pub fn build_select_by_key(
        &self,
        table: &Table,
        columns: &[Column],
        key_columns: &[Column],
        tuple_count: usize,
    ) -> Result<SelectSql> {
        require_columns(columns, "select")?;
        check_table(table, columns)?;
        check_table(table, key_columns)?;
        let projection = self.sorted(columns);
        let (predicate, mut statement) = self.key_predicate(key_columns, tuple_count, None)?;
        statement.sql = format!(
            "select {} from {} where {}",
            projection_list(&projection),
            table.qualified_name(),
            predicate
        );
        let read_binders = self.read_binders(&projection);
        Ok(SelectSql {
            statement,
            projection,
            read_binders,
        })
    }

    /// IN predicate over `key_columns` for `tuple_count` tuples.
    ///
    /// Placeholder `k * key_columns.len() + p` (p 1-based) holds the p-th key
    /// column of the k-th tuple. Columns are rendered as `qualifier.name`
    /// when a qualifier is given. The returned statement carries the
    /// predicate as its SQL.
    pub fn key_predicate(
        &self,
        key_columns: &[Column],
        tuple_count: usize,
        qualifier: Option<&str>,
    ) -> Result<(String, ColumnSql)> {
        require_columns(key_columns, "key")?;
        if tuple_count == 0 {
            return Err(Error::config(
                ConfigErrorKind::Invalid,
                "cannot build an IN list for zero keys",
            ));
        }
        let width = key_columns.len();
        let render = |c: &Column| match qualifier {
            Some(q) => format!("{q}.{}", c.name()),
            None => c.name().to_string(),
        };
        let predicate = if width == 1 {
            format!("{} in ({})", render(&key_columns[0]), placeholders(tuple_count))
        } else {
            let names: Vec<String> = key_columns.iter().map(render).collect();
            let tuple = format!("({})", placeholders(width));
            format!("({}) in ({})", names.join(", "), vec![tuple; tuple_count].join(", "))
        };
        let mut statement = ParameterizedSql::new(predicate.clone());
        for (p, column) in key_columns.iter().enumerate() {
            let indexes = (0..tuple_count).map(|k| k * width + p + 1).collect();
            statement.push_key(column.clone(), indexes, self.binders.get_binder(column));
        }
        Ok((predicate, statement))
    }

    fn read_binders(&self, projection: &[Column]) -> ReadBinders {
        projection
            .iter()
            .map(|c| (c.name().to_lowercase(), self.binders.get_binder(c)))
            .collect()
    }
}

fn projection_list(columns: &[Column]) -> String {
    columns.iter().map(Column::name).collect::<Vec<_>>().join(", ")
}
