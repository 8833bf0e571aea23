//! Table metadata: tables, columns, foreign keys and indexes.
//!
//! Tables are built once at configuration time and then shared behind an
//! `Arc`. Columns are cheap handles that remember their owning table, so a
//! column alone is enough to generate SQL for it.
//!
//! # Example
//!
//! ```ignore
//! let mut toto = Table::new("Toto")?;
//! let a = toto.add_column(ColumnDef::new("a", SqlType::BigInt).primary_key())?;
//! let b = toto.add_column(ColumnDef::new("b", SqlType::Integer))?;
//! assert_eq!(a.absolute_name(), "Toto.a");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::Result;
use crate::error::{ConfigErrorKind, Error};
use crate::naming::validate_identifier;
use crate::types::SqlType;

#[derive(Debug)]
struct ColumnInner {
    table: String,
    qualified_table: String,
    name: String,
    sql_type: SqlType,
    size: Option<u32>,
    nullable: bool,
    primary_key: bool,
    auto_generated: bool,
    key: String,
}

/// A column of a [`Table`].
///
/// Identity is `table.name + "." + column.name`, compared case-insensitively.
#[derive(Clone)]
pub struct Column(Arc<ColumnInner>);

impl Column {
    /// Column name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Owning table name.
    pub fn table_name(&self) -> &str {
        &self.0.table
    }

    /// Owning table name including its schema, if any.
    pub fn qualified_table_name(&self) -> &str {
        &self.0.qualified_table
    }

    /// `Table.column`
    pub fn absolute_name(&self) -> String {
        format!("{}.{}", self.0.table, self.0.name)
    }

    pub fn sql_type(&self) -> SqlType {
        self.0.sql_type
    }

    pub fn size(&self) -> Option<u32> {
        self.0.size
    }

    pub fn is_nullable(&self) -> bool {
        self.0.nullable
    }

    pub fn is_primary_key(&self) -> bool {
        self.0.primary_key
    }

    pub fn is_auto_generated(&self) -> bool {
        self.0.auto_generated
    }

    /// Does this column belong to `table`?
    pub fn belongs_to(&self, table: &Table) -> bool {
        self.0.table.eq_ignore_ascii_case(&table.name)
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.0.key == other.0.key
    }
}

impl Eq for Column {}

impl Hash for Column {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.key.hash(state);
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Column({}.{})", self.0.table, self.0.name)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0.table, self.0.name)
    }
}

/// Definition of a column about to be added to a table.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    name: String,
    sql_type: SqlType,
    size: Option<u32>,
    nullable: bool,
    primary_key: bool,
    auto_generated: bool,
}

impl ColumnDef {
    /// A nullable column of the given type.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            size: None,
            nullable: true,
            primary_key: false,
            auto_generated: false,
        }
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark as primary key (implies not null).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Mark as generated by the database. Only legal on the primary key.
    pub fn auto_generated(mut self) -> Self {
        self.auto_generated = true;
        self
    }
}

/// Named mapping from source columns to target columns of another table.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    name: String,
    pairs: Vec<(Column, Column)>,
}

impl ForeignKey {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// (source, target) column pairs in declaration order.
    pub fn column_pairs(&self) -> &[(Column, Column)] {
        &self.pairs
    }

    pub fn source_table_name(&self) -> &str {
        self.pairs[0].0.table_name()
    }

    pub fn target_table_name(&self) -> &str {
        self.pairs[0].1.table_name()
    }
}

/// Named index over columns of the owning table.
#[derive(Debug, Clone)]
pub struct Index {
    name: String,
    columns: Vec<Column>,
    unique: bool,
}

impl Index {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }
}

/// A database table.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    schema: Option<String>,
    columns: Vec<Column>,
    primary_key: Option<Column>,
    indexes: Vec<Index>,
    foreign_keys: Vec<ForeignKey>,
}

impl Table {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_identifier("table", &name)?;
        Ok(Self {
            name,
            schema: None,
            columns: Vec::new(),
            primary_key: None,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        })
    }

    /// Create an empty table in a schema.
    pub fn in_schema(schema: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        validate_identifier("schema", &schema)?;
        let mut table = Self::new(name)?;
        table.schema = Some(schema);
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// `schema.name`, or just the name when there is no schema.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    /// Add a column.
    ///
    /// Fails on duplicate names (case-insensitive), on a second primary key
    /// and on `auto_generated` columns that are not the primary key.
    pub fn add_column(&mut self, def: ColumnDef) -> Result<Column> {
        validate_identifier("column", &def.name)?;
        if self.column(&def.name).is_some() {
            return Err(Error::config(
                ConfigErrorKind::DuplicateColumn,
                format!("column '{}' already exists in table '{}'", def.name, self.name),
            ));
        }
        if def.auto_generated && !def.primary_key {
            return Err(Error::config(
                ConfigErrorKind::AutoGeneratedNonKey,
                format!(
                    "column '{}.{}' is auto-generated but not the primary key",
                    self.name, def.name
                ),
            ));
        }
        if def.primary_key {
            if let Some(existing) = &self.primary_key {
                return Err(Error::config(
                    ConfigErrorKind::Invalid,
                    format!(
                        "table '{}' already has primary key '{}'",
                        self.name,
                        existing.name()
                    ),
                ));
            }
        }
        let key = format!("{}.{}", self.name, def.name).to_lowercase();
        let column = Column(Arc::new(ColumnInner {
            table: self.name.clone(),
            qualified_table: self.qualified_name(),
            name: def.name,
            sql_type: def.sql_type,
            size: def.size,
            nullable: def.nullable,
            primary_key: def.primary_key,
            auto_generated: def.auto_generated,
            key,
        }));
        if column.is_primary_key() {
            self.primary_key = Some(column.clone());
        }
        self.columns.push(column.clone());
        Ok(column)
    }

    /// Find a column by name, case-insensitively.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }

    /// Find a column by name or fail with a configuration error.
    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownColumn,
                format!("table '{}' has no column '{}'", self.name, name),
            )
        })
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Declaration position of a column of this table.
    pub fn position_of(&self, column: &Column) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn primary_key(&self) -> Option<&Column> {
        self.primary_key.as_ref()
    }

    /// The primary key, or a configuration error.
    pub fn require_primary_key(&self) -> Result<&Column> {
        self.primary_key.as_ref().ok_or_else(|| {
            Error::config(
                ConfigErrorKind::MissingPrimaryKey,
                format!("table '{}' has no primary key", self.name),
            )
        })
    }

    /// Add an index over columns of this table.
    pub fn add_index(
        &mut self,
        name: impl Into<String>,
        columns: &[Column],
        unique: bool,
    ) -> Result<&Index> {
        let name = name.into();
        validate_identifier("index", &name)?;
        self.check_own_columns(columns)?;
        self.indexes.push(Index {
            name,
            columns: columns.to_vec(),
            unique,
        });
        Ok(&self.indexes[self.indexes.len() - 1])
    }

    /// Add a foreign key from columns of this table to columns of another.
    pub fn add_foreign_key(
        &mut self,
        name: impl Into<String>,
        source: &[Column],
        target: &[Column],
    ) -> Result<ForeignKey> {
        let name = name.into();
        validate_identifier("foreign key", &name)?;
        if source.is_empty() || source.len() != target.len() {
            return Err(Error::config(
                ConfigErrorKind::ForeignKeyMismatch,
                format!(
                    "foreign key '{}' maps {} column(s) to {}",
                    name,
                    source.len(),
                    target.len()
                ),
            ));
        }
        self.check_own_columns(source)?;
        let target_table = target[0].table_name();
        if target
            .iter()
            .any(|c| !c.table_name().eq_ignore_ascii_case(target_table))
        {
            return Err(Error::config(
                ConfigErrorKind::ForeignKeyMismatch,
                format!("foreign key '{}' targets more than one table", name),
            ));
        }
        let fk = ForeignKey {
            name,
            pairs: source.iter().cloned().zip(target.iter().cloned()).collect(),
        };
        self.foreign_keys.push(fk.clone());
        Ok(fk)
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    fn check_own_columns(&self, columns: &[Column]) -> Result<()> {
        match columns.iter().find(|c| !c.belongs_to(self)) {
            Some(foreign) => Err(Error::config(
                ConfigErrorKind::UnknownColumn,
                format!("column '{}' is not part of table '{}'", foreign, self.name),
            )),
            None => Ok(()),
        }
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for Table {}

#[cfg(test)]
mod tests {
    use super::*;

    fn toto() -> Table {
        let mut table = Table::new("Toto").unwrap();
        table
            .add_column(ColumnDef::new("a", SqlType::BigInt).primary_key())
            .unwrap();
        table.add_column(ColumnDef::new("b", SqlType::Integer)).unwrap();
        table.add_column(ColumnDef::new("c", SqlType::Integer)).unwrap();
        table
    }

    #[test]
    fn column_identity_is_case_insensitive() {
        let table = toto();
        let mut other = Table::new("TOTO").unwrap();
        let b = other.add_column(ColumnDef::new("B", SqlType::Integer)).unwrap();
        assert_eq!(table.column("b").unwrap(), &b);
        assert_eq!(table.column("B").unwrap().name(), "b");
        assert_eq!(table, other);
    }

    #[test]
    fn duplicate_column_rejected() {
        let mut table = toto();
        let err = table
            .add_column(ColumnDef::new("A", SqlType::Text))
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::DuplicateColumn));
    }

    #[test]
    fn auto_generated_only_on_primary_key() {
        let mut table = Table::new("Tata").unwrap();
        let err = table
            .add_column(ColumnDef::new("x", SqlType::BigInt).auto_generated())
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::AutoGeneratedNonKey));

        let id = table
            .add_column(
                ColumnDef::new("id", SqlType::BigInt)
                    .primary_key()
                    .auto_generated(),
            )
            .unwrap();
        assert!(id.is_auto_generated());
        assert!(!id.is_nullable());
    }

    #[test]
    fn single_primary_key() {
        let mut table = toto();
        assert_eq!(table.primary_key().unwrap().name(), "a");
        assert!(
            table
                .add_column(ColumnDef::new("z", SqlType::BigInt).primary_key())
                .is_err()
        );
        let empty = Table::new("Empty").unwrap();
        let err = empty.require_primary_key().unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::MissingPrimaryKey));
    }

    #[test]
    fn foreign_key_validation() {
        let toto = toto();
        let mut tata = Table::new("Tata").unwrap();
        tata.add_column(ColumnDef::new("id", SqlType::BigInt).primary_key())
            .unwrap();
        let toto_id = tata
            .add_column(ColumnDef::new("toto_id", SqlType::BigInt))
            .unwrap();

        let fk = tata
            .add_foreign_key(
                "fk_tata_toto",
                &[toto_id.clone()],
                &[toto.primary_key().unwrap().clone()],
            )
            .unwrap();
        assert_eq!(fk.source_table_name(), "Tata");
        assert_eq!(fk.target_table_name(), "Toto");

        let err = tata
            .add_foreign_key("fk_bad", &[toto_id], &[])
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::ForeignKeyMismatch));

        let foreign = toto.column("b").unwrap().clone();
        let err = tata
            .add_foreign_key("fk_other", &[foreign.clone()], &[foreign])
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownColumn));
    }

    #[test]
    fn schema_qualified_names() {
        let mut table = Table::in_schema("app", "Person").unwrap();
        let id = table
            .add_column(ColumnDef::new("id", SqlType::BigInt).primary_key())
            .unwrap();
        assert_eq!(table.qualified_name(), "app.Person");
        assert_eq!(id.qualified_table_name(), "app.Person");
        assert_eq!(id.absolute_name(), "Person.id");
    }

    #[test]
    fn index_over_own_columns() {
        let mut table = toto();
        let b = table.column("b").unwrap().clone();
        let index = table.add_index("idx_toto_b", &[b], true).unwrap();
        assert!(index.is_unique());
        assert_eq!(index.columns().len(), 1);
    }
}
