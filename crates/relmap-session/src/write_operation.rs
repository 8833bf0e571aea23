//! Batched execution of one write statement.
//!
//! Rows are accumulated and sent to the executor in batches of at most
//! `batch_size` entries. Each batch (or single execution) is retried under
//! the persister's retry policy, and the failing SQL is attached to the error
//! that escapes.

use std::fmt;

use relmap_core::retry::run_with_retry;
use relmap_core::{
    Bindings, Column, Error, PreparedSql, Result, RetryPolicy, RowCount, RowValueMap,
    StatementExecutor, StaleObjectError, Table, Value,
};
use relmap_query::{DmlGenerator, ParameterizedSql};

pub(crate) struct WriteOperation<'a> {
    statement: PreparedSql,
    executor: &'a dyn StatementExecutor,
    retry: &'a dyn RetryPolicy,
    batch_size: usize,
    pending: Vec<Bindings>,
    counts: Vec<RowCount>,
}

impl<'a> WriteOperation<'a> {
    pub(crate) fn new(
        statement: PreparedSql,
        executor: &'a dyn StatementExecutor,
        retry: &'a dyn RetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            statement,
            executor,
            retry,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            counts: Vec::new(),
        }
    }

    /// Queue one row, sending the batch once it is full.
    pub(crate) fn add_batch(&mut self, bindings: Bindings) -> Result<()> {
        self.pending.push(bindings);
        if self.pending.len() >= self.batch_size {
            self.execute_batch()?;
        }
        Ok(())
    }

    fn execute_batch(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(sql = self.statement.sql(), rows = self.pending.len(), "Executing batch");
        let (executor, statement, pending) = (self.executor, &self.statement, &self.pending);
        let counts = run_with_retry(self.retry, statement.sql(), || {
            executor.execute_batch(statement, pending)
        })?;
        self.pending.clear();
        self.counts.extend(counts);
        Ok(())
    }

    /// Send what is left and return one count per queued row, in order.
    pub(crate) fn finish(mut self) -> Result<Vec<RowCount>> {
        self.execute_batch()?;
        Ok(self.counts)
    }

    /// Execute a single statement outside of any batch.
    pub(crate) fn execute(&self, bindings: &Bindings) -> Result<RowCount> {
        tracing::debug!(sql = self.statement.sql(), "Executing statement");
        run_with_retry(self.retry, self.statement.sql(), || {
            self.executor.execute(&self.statement, bindings)
        })
    }

    /// Execute an insert and read back the generated key.
    pub(crate) fn execute_returning_key(&self, bindings: &Bindings, key: &Column) -> Result<Value> {
        tracing::debug!(sql = self.statement.sql(), key = %key, "Executing insert with generated key");
        run_with_retry(self.retry, self.statement.sql(), || {
            self.executor
                .execute_returning_key(&self.statement, bindings, key)
        })
    }
}

/// Executor and batching settings of the statements of one call.
#[derive(Clone, Copy)]
pub(crate) struct Writer<'a> {
    pub(crate) executor: &'a dyn StatementExecutor,
    pub(crate) retry: &'a dyn RetryPolicy,
    pub(crate) batch_size: usize,
}

impl<'a> Writer<'a> {
    pub(crate) fn operation(&self, statement: PreparedSql) -> WriteOperation<'a> {
        WriteOperation::new(statement, self.executor, self.retry, self.batch_size)
    }

    /// Write `rows`, one batch per run of consecutive rows with the same
    /// keys. With `check_rows`, every row must affect exactly one row.
    pub(crate) fn write_rows<K>(
        &self,
        rows: Vec<RowValueMap<K>>,
        check_rows: bool,
        build: impl Fn(&[K]) -> Result<ParameterizedSql<K>>,
    ) -> Result<RowCount>
    where
        K: PartialEq + Clone + fmt::Debug,
    {
        let mut total = RowCount::Exact(0);
        let mut rows = rows.into_iter().peekable();
        while let Some(first) = rows.next() {
            let shape: Vec<K> = first.keys().cloned().collect();
            let statement = build(&shape)?;
            let mut op = self.operation(statement.prepared());
            op.add_batch(statement.bind(&first)?)?;
            while let Some(row) = rows.next_if(|r| r.keys().eq(shape.iter())) {
                op.add_batch(statement.bind(&row)?)?;
            }
            let counts = op.finish()?;
            if check_rows {
                for count in &counts {
                    check_row_count(statement.sql(), 1, *count)?;
                }
            }
            total = total.add(RowCount::sum(counts));
        }
        Ok(total)
    }

    /// `delete from T where key in (...)` over chunks of at most `max`
    /// identifiers. Full chunks share one statement. With `check_rows`,
    /// each chunk must remove one row per identifier.
    pub(crate) fn delete_keys(
        &self,
        dml: &DmlGenerator,
        max: usize,
        table: &Table,
        key: &Column,
        ids: &[Value],
        check_rows: bool,
    ) -> Result<RowCount> {
        let max = max.max(1);
        let key = std::slice::from_ref(key);
        let full = if ids.len() >= max {
            Some(dml.build_delete_by_key(table, key, max)?)
        } else {
            None
        };
        let mut total = RowCount::Exact(0);
        for chunk in ids.chunks(max) {
            let remainder;
            let statement = match &full {
                Some(statement) if chunk.len() == max => statement,
                _ => {
                    remainder = dml.build_delete_by_key(table, key, chunk.len())?;
                    &remainder
                }
            };
            let count = self
                .operation(statement.prepared())
                .execute(&statement.bind_keys(chunk)?)?;
            if check_rows {
                check_row_count(statement.sql(), chunk.len() as u64, count)?;
            }
            total = total.add(count);
        }
        Ok(total)
    }
}

/// Fail when the driver reported a count other than `expected`.
///
/// `NoInfo` counts are never checked.
pub(crate) fn check_row_count(sql: &str, expected: u64, actual: RowCount) -> Result<()> {
    match actual {
        RowCount::Exact(n) if n != expected => Err(Error::StaleObject(StaleObjectError {
            sql: sql.to_string(),
            expected,
            actual: n,
        })),
        _ => Ok(()),
    }
}
