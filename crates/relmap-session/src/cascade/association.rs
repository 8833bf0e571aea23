//! Association table rows linking a source to its targets.

use std::fmt;
use std::sync::Arc;

use relmap_core::{
    Column, ColumnValues, ConfigErrorKind, Error, Result, RetryPolicy, RowCount, Table, Value,
};
use relmap_query::DmlGenerator;

use super::position;
use crate::config::PersisterConfig;
use crate::context::PersistContext;
use crate::write_operation::Writer;

/// Layout of an association table: `(source, target[, index])`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationTable {
    table: Arc<Table>,
    source: Column,
    target: Column,
    index: Option<Column>,
}

impl AssociationTable {
    pub fn new(table: impl Into<Arc<Table>>, source: &Column, target: &Column) -> Result<Self> {
        let table = table.into();
        check_column(&table, source)?;
        check_column(&table, target)?;
        if source == target {
            return Err(Error::config(
                ConfigErrorKind::ColumnCollision,
                format!("association {}: source and target are both {source}", table.name()),
            ));
        }
        Ok(Self {
            table,
            source: source.clone(),
            target: target.clone(),
            index: None,
        })
    }

    /// Store the position of each target in `column`.
    pub fn indexed_by(mut self, column: &Column) -> Result<Self> {
        check_column(&self.table, column)?;
        if *column == self.source || *column == self.target {
            return Err(Error::config(
                ConfigErrorKind::ColumnCollision,
                format!("association {}: index {column} is a key column", self.table.name()),
            ));
        }
        self.index = Some(column.clone());
        Ok(self)
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn source(&self) -> &Column {
        &self.source
    }

    pub fn target(&self) -> &Column {
        &self.target
    }

    pub fn index(&self) -> Option<&Column> {
        self.index.as_ref()
    }
}

fn check_column(table: &Table, column: &Column) -> Result<()> {
    if column.belongs_to(table) {
        Ok(())
    } else {
        Err(Error::config(
            ConfigErrorKind::UnknownColumn,
            format!("column {column} is not part of association {}", table.name()),
        ))
    }
}

/// One association row.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationRecord {
    pub source: Value,
    pub target: Value,
    /// Position of the target, for indexed associations.
    pub index: Option<usize>,
}

impl AssociationRecord {
    pub fn new(source: Value, target: Value) -> Self {
        Self {
            source,
            target,
            index: None,
        }
    }

    #[must_use]
    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

/// Writes association rows.
pub struct AssociationPersister {
    layout: AssociationTable,
    dml: DmlGenerator,
    retry: Box<dyn RetryPolicy>,
    batch_size: usize,
    in_operator_max_size: usize,
}

impl AssociationPersister {
    pub fn new(layout: AssociationTable, dml: DmlGenerator, config: &PersisterConfig) -> Self {
        Self {
            layout,
            dml,
            retry: config.dialect.retry.policy(),
            batch_size: config.batch_size,
            in_operator_max_size: config.dialect.in_operator_max_size,
        }
    }

    pub fn layout(&self) -> &AssociationTable {
        &self.layout
    }

    fn writer<'a>(&'a self, ctx: &PersistContext<'a>) -> Writer<'a> {
        Writer {
            executor: ctx.executor(),
            retry: self.retry.as_ref(),
            batch_size: self.batch_size,
        }
    }

    fn values(&self, record: &AssociationRecord) -> ColumnValues {
        let mut values = ColumnValues::with_capacity(3);
        values.insert(self.layout.source.clone(), record.source.clone());
        values.insert(self.layout.target.clone(), record.target.clone());
        if let (Some(column), Some(at)) = (&self.layout.index, record.index) {
            values.insert(column.clone(), position(column, at));
        }
        values
    }

    pub fn insert(
        &self,
        ctx: &PersistContext<'_>,
        records: &[AssociationRecord],
    ) -> Result<RowCount> {
        if records.is_empty() {
            return Ok(RowCount::Exact(0));
        }
        tracing::debug!(
            table = self.layout.table.name(),
            rows = records.len(),
            "Inserting associations"
        );
        let rows = records.iter().map(|r| self.values(r)).collect();
        self.writer(ctx)
            .write_rows(rows, false, |columns| self.dml.build_insert(columns))
    }

    /// Delete one row per record; each must exist.
    pub fn delete(
        &self,
        ctx: &PersistContext<'_>,
        records: &[AssociationRecord],
    ) -> Result<RowCount> {
        if records.is_empty() {
            return Ok(RowCount::Exact(0));
        }
        tracing::debug!(
            table = self.layout.table.name(),
            rows = records.len(),
            "Deleting associations"
        );
        let rows = records.iter().map(|r| self.values(r)).collect();
        self.writer(ctx).write_rows(rows, true, |columns| {
            self.dml.build_delete(&self.layout.table, columns)
        })
    }

    /// Delete every row of the given sources.
    pub fn delete_by_source(
        &self,
        ctx: &PersistContext<'_>,
        sources: &[Value],
    ) -> Result<RowCount> {
        if sources.is_empty() {
            return Ok(RowCount::Exact(0));
        }
        self.writer(ctx).delete_keys(
            &self.dml,
            self.in_operator_max_size,
            &self.layout.table,
            &self.layout.source,
            sources,
            false,
        )
    }
}

impl fmt::Debug for AssociationPersister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationPersister")
            .field("layout", &self.layout)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
