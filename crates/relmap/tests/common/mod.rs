//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use relmap::{
    Bindings, ClassMapping, Column, ColumnDef, Error, IdentifierPolicy, Persister, PreparedSql,
    Result, Row, RowCount, RowStream, SqlType, StatementExecutor, Table, Value,
};
use relmap::{EntityRef, PersisterConfig};
use std::sync::Arc;

/// What the executor was asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Execute,
    Batch,
    Query,
    Returning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: Kind,
    pub sql: String,
    /// One entry per row sent; single statements have exactly one.
    pub bindings: Vec<Bindings>,
}

/// In-memory executor recording every statement.
///
/// Queries answer the queued row sets in order, writes the queued counts
/// (one row per statement once exhausted). Generated keys count up from
/// 100.
pub struct RecordingExecutor {
    statements: RefCell<Vec<Statement>>,
    rows: RefCell<VecDeque<Vec<Row>>>,
    counts: RefCell<VecDeque<RowCount>>,
    failures: RefCell<VecDeque<Error>>,
    next_key: Cell<i64>,
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self {
            statements: RefCell::default(),
            rows: RefCell::default(),
            counts: RefCell::default(),
            failures: RefCell::default(),
            next_key: Cell::new(100),
        }
    }
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.statements.borrow().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements.borrow().iter().map(|s| s.sql.clone()).collect()
    }

    pub fn push_rows(&self, rows: Vec<Row>) {
        self.rows.borrow_mut().push_back(rows);
    }

    pub fn push_count(&self, count: RowCount) {
        self.counts.borrow_mut().push_back(count);
    }

    pub fn fail_next(&self, error: Error) {
        self.failures.borrow_mut().push_back(error);
    }

    pub fn clear(&self) {
        self.statements.borrow_mut().clear();
    }

    fn record(&self, kind: Kind, statement: &PreparedSql, bindings: Vec<Bindings>) -> Result<()> {
        self.statements.borrow_mut().push(Statement {
            kind,
            sql: statement.sql().to_string(),
            bindings,
        });
        match self.failures.borrow_mut().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_count(&self) -> RowCount {
        self.counts.borrow_mut().pop_front().unwrap_or(RowCount::Exact(1))
    }
}

impl StatementExecutor for RecordingExecutor {
    fn execute(&self, statement: &PreparedSql, values: &Bindings) -> Result<RowCount> {
        self.record(Kind::Execute, statement, vec![values.clone()])?;
        Ok(self.next_count())
    }

    fn execute_batch(&self, statement: &PreparedSql, batch: &[Bindings]) -> Result<Vec<RowCount>> {
        self.record(Kind::Batch, statement, batch.to_vec())?;
        Ok(batch.iter().map(|_| self.next_count()).collect())
    }

    fn execute_query<'a>(
        &'a self,
        statement: &PreparedSql,
        values: &Bindings,
    ) -> Result<RowStream<'a>> {
        self.record(Kind::Query, statement, vec![values.clone()])?;
        let rows = self.rows.borrow_mut().pop_front().unwrap_or_default();
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn execute_returning_key(
        &self,
        statement: &PreparedSql,
        values: &Bindings,
        _key_column: &Column,
    ) -> Result<Value> {
        self.record(Kind::Returning, statement, vec![values.clone()])?;
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        Ok(Value::BigInt(key))
    }
}

pub fn row(labels: &[&str], values: Vec<Value>) -> Row {
    Row::new(labels.iter().map(|l| (*l).to_string()).collect(), values)
}

pub fn column(table: &Table, name: &str) -> Column {
    table.column(name).unwrap().clone()
}

// ============================================================================
// Toto
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Toto {
    pub a: i64,
    pub b: i32,
    pub c: i32,
}

pub fn toto(a: i64, b: i32, c: i32) -> EntityRef<Toto> {
    EntityRef::new(Toto { a, b, c })
}

pub fn toto_mapping() -> ClassMapping<Toto, i64> {
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

pub fn toto_persister(config: PersisterConfig) -> Persister<Toto, i64> {
    Persister::new(
        Arc::new(toto_mapping()),
        config,
        Arc::new(relmap::BinderRegistry::new()),
    )
    .unwrap()
}

// ============================================================================
// Country / City
// ============================================================================

#[derive(Debug, Default)]
pub struct City {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct Country {
    pub id: i64,
    pub name: String,
    pub capital: Option<EntityRef<City>>,
    pub cities: Vec<EntityRef<City>>,
}

pub fn city(id: i64, name: &str) -> EntityRef<City> {
    EntityRef::new(City {
        id,
        name: name.to_string(),
    })
}

pub fn country(id: i64, name: &str) -> EntityRef<Country> {
    EntityRef::new(Country {
        id,
        name: name.to_string(),
        ..Country::default()
    })
}

/// `City(id, name, countryId, idx)` with database-generated identifiers.
pub fn city_persister() -> Persister<City, i64> {
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

/// `Country(id, name, capitalId)` with assigned identifiers.
pub fn country_persister() -> Persister<Country, i64> {
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
