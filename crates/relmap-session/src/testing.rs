//! Test doubles shared by the unit tests of this crate.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;

use relmap_core::{
    BinderRegistry, Bindings, ClassMapping, Column, ColumnDef, Error, IdentifierPolicy,
    PreparedSql, Result, Row, RowCount, RowStream, SqlType, StatementExecutor, Table, Value,
};

use crate::config::PersisterConfig;
use crate::entity::EntityRef;
use crate::persister::Persister;

/// One statement received by [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Execute { sql: String, bindings: Bindings },
    Batch { sql: String, batch: Vec<Bindings> },
    Query { sql: String, bindings: Bindings },
    Returning { sql: String, bindings: Bindings },
}

impl Call {
    pub(crate) fn sql(&self) -> String {
        match self {
            Call::Execute { sql, .. }
            | Call::Batch { sql, .. }
            | Call::Query { sql, .. }
            | Call::Returning { sql, .. } => sql.clone(),
        }
    }
}

/// Records statements and answers from queued results.
///
/// Queries return the queued row sets in order (no rows once exhausted),
/// writes return queued counts (`NoInfo` for single statements and one row
/// per batch entry once exhausted), generated keys count up from 100.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    calls: RefCell<Vec<Call>>,
    rows: RefCell<VecDeque<Vec<Row>>>,
    counts: RefCell<VecDeque<RowCount>>,
    failures: RefCell<VecDeque<Error>>,
    next_key: Cell<i64>,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Self {
        Self {
            next_key: Cell::new(100),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub(crate) fn push_rows(&self, rows: Vec<Row>) {
        self.rows.borrow_mut().push_back(rows);
    }

    pub(crate) fn push_counts(&self, counts: Vec<RowCount>) {
        self.counts.borrow_mut().extend(counts);
    }

    /// Fail the next statement with `error`.
    pub(crate) fn fail_next(&self, error: Error) {
        self.failures.borrow_mut().push_back(error);
    }

    fn record(&self, call: Call) -> Result<()> {
        self.calls.borrow_mut().push(call);
        match self.failures.borrow_mut().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl StatementExecutor for RecordingExecutor {
    fn execute(&self, statement: &PreparedSql, values: &Bindings) -> Result<RowCount> {
        self.record(Call::Execute {
            sql: statement.sql().to_string(),
            bindings: values.clone(),
        })?;
        Ok(self.counts.borrow_mut().pop_front().unwrap_or(RowCount::NoInfo))
    }

    fn execute_batch(&self, statement: &PreparedSql, batch: &[Bindings]) -> Result<Vec<RowCount>> {
        self.record(Call::Batch {
            sql: statement.sql().to_string(),
            batch: batch.to_vec(),
        })?;
        let mut counts = self.counts.borrow_mut();
        Ok(batch
            .iter()
            .map(|_| counts.pop_front().unwrap_or(RowCount::Exact(1)))
            .collect())
    }

    fn execute_query<'a>(
        &'a self,
        statement: &PreparedSql,
        values: &Bindings,
    ) -> Result<RowStream<'a>> {
        self.record(Call::Query {
            sql: statement.sql().to_string(),
            bindings: values.clone(),
        })?;
        let rows = self.rows.borrow_mut().pop_front().unwrap_or_default();
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn execute_returning_key(
        &self,
        statement: &PreparedSql,
        values: &Bindings,
        _key_column: &Column,
    ) -> Result<Value> {
        self.record(Call::Returning {
            sql: statement.sql().to_string(),
            bindings: values.clone(),
        })?;
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        Ok(Value::BigInt(key))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Toto {
    pub(crate) a: i64,
    pub(crate) b: i32,
    pub(crate) c: i32,
}

pub(crate) fn toto_mapping() -> ClassMapping<Toto, i64> {
    let mut table = Table::new("Toto").unwrap();
    table
        .add_column(ColumnDef::new("a", SqlType::BigInt).primary_key())
        .unwrap();
    table.add_column(ColumnDef::new("b", SqlType::Integer)).unwrap();
    table.add_column(ColumnDef::new("c", SqlType::Integer)).unwrap();
    ClassMapping::builder(table)
        .identifier("a", |t: &Toto| t.a, |t, v| t.a = v)
        .property("b", |t: &Toto| t.b, |t, v| t.b = v)
        .property("c", |t: &Toto| t.c, |t, v| t.c = v)
        .build()
        .unwrap()
}

pub(crate) fn toto_persister(config: PersisterConfig) -> Persister<Toto, i64> {
    Persister::new(Arc::new(toto_mapping()), config, Arc::new(BinderRegistry::new())).unwrap()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct City {
    pub(crate) id: i64,
    pub(crate) name: String,
}

impl City {
    pub(crate) fn new(id: i64, name: &str) -> EntityRef<City> {
        EntityRef::new(City {
            id,
            name: name.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Country {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) capital: Option<EntityRef<City>>,
    pub(crate) cities: Vec<EntityRef<City>>,
}

impl Country {
    pub(crate) fn new(id: i64, name: &str) -> EntityRef<Country> {
        EntityRef::new(Country {
            id,
            name: name.to_string(),
            ..Country::default()
        })
    }
}

/// `City(id, name, countryId, idx)`; only `id` and `name` are mapped,
/// identifiers are generated by the database.
pub(crate) fn city_persister() -> Persister<City, i64> {
    let mut table = Table::new("City").unwrap();
    table
        .add_column(ColumnDef::new("id", SqlType::BigInt).primary_key().auto_generated())
        .unwrap();
    table.add_column(ColumnDef::new("name", SqlType::VarChar)).unwrap();
    table.add_column(ColumnDef::new("countryId", SqlType::BigInt)).unwrap();
    table.add_column(ColumnDef::new("idx", SqlType::Integer)).unwrap();
    let mapping = ClassMapping::builder(table)
        .identifier("id", |c: &City| c.id, |c, v| c.id = v)
        .property("name", |c: &City| c.name.clone(), |c, v| c.name = v)
        .identifier_policy(IdentifierPolicy::AfterInsert)
        .build()
        .unwrap();
    Persister::with_defaults(Arc::new(mapping)).unwrap()
}

/// `Country(id, name, capitalId)`; only `id` and `name` are mapped.
pub(crate) fn country_persister() -> Persister<Country, i64> {
    let mut table = Table::new("Country").unwrap();
    table
        .add_column(ColumnDef::new("id", SqlType::BigInt).primary_key())
        .unwrap();
    table.add_column(ColumnDef::new("name", SqlType::VarChar)).unwrap();
    table.add_column(ColumnDef::new("capitalId", SqlType::BigInt)).unwrap();
    let mapping = ClassMapping::builder(table)
        .identifier("id", |c: &Country| c.id, |c, v| c.id = v)
        .property("name", |c: &Country| c.name.clone(), |c, v| c.name = v)
        .build()
        .unwrap();
    Persister::with_defaults(Arc::new(mapping)).unwrap()
}

pub(crate) fn column(table: &Table, name: &str) -> Column {
    table.column(name).unwrap().clone()
}

/// SQL of every recorded call, in order.
pub(crate) fn statements(executor: &RecordingExecutor) -> Vec<String> {
    executor.calls().iter().map(Call::sql).collect()
}
