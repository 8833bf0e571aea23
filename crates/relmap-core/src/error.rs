//! Error types for relmap operations.

use std::fmt;

/// The primary error type for all relmap operations.
#[derive(Debug)]
pub enum Error {
    /// Invalid mapping or table configuration, raised eagerly at construction
    Config(ConfigError),
    /// Query execution errors reported by the statement executor
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Row-count mismatch after an update or delete
    StaleObject(StaleObjectError),
    /// A non-nullable relation has no target
    MandatoryRelation(MandatoryRelationError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// Mapped table has no primary key
    MissingPrimaryKey,
    /// Column name already used in the table
    DuplicateColumn,
    /// Two strategies claim the same column
    ColumnCollision,
    /// `auto_generated` set on a non primary key column
    AutoGeneratedNonKey,
    /// Join on more than one column pair
    CompositeKeyJoin,
    /// Not a valid SQL identifier
    InvalidIdentifier,
    /// Foreign key column lists do not line up
    ForeignKeyMismatch,
    /// Column is not part of the table
    UnknownColumn,
    /// Any other invalid setting
    Invalid,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Deadlock detected
    Deadlock,
    /// Serialization failure (retry may succeed)
    Serialization,
    /// Statement timeout
    Timeout,
    /// Feature not provided by the executor
    Unsupported,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct StaleObjectError {
    pub sql: String,
    pub expected: u64,
    pub actual: u64,
}

#[derive(Debug)]
pub struct MandatoryRelationError {
    pub relation: String,
    pub entity: String,
}

impl Error {
    /// Build a configuration error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Build a query error of the given kind.
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            sql: None,
            message: message.into(),
            source: None,
        })
    }

    /// Is this a retryable error (deadlock, serialization failure, timeout)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock | QueryErrorKind::Serialization | QueryErrorKind::Timeout
            ),
            _ => false,
        }
    }

    /// Configuration error kind, if this is one.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Error::Config(c) => Some(c.kind),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::StaleObject(s) => Some(&s.sql),
            _ => None,
        }
    }

    /// Attach the failing statement to a query error that does not carry one yet.
    pub fn with_sql(self, sql: &str) -> Self {
        match self {
            Error::Query(mut q) => {
                if q.sql.is_none() {
                    q.sql = Some(sql.to_string());
                }
                Error::Query(q)
            }
            other => other,
        }
    }

    /// Attach a column name to a type error.
    pub fn in_column(self, column: &str) -> Self {
        match self {
            Error::Type(mut t) => {
                if t.column.is_none() {
                    t.column = Some(column.to_string());
                }
                Error::Type(t)
            }
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Query(e) => {
                if let Some(sql) = &e.sql {
                    write!(f, "Query error: {} (sql: {})", e.message, sql)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::StaleObject(e) => write!(f, "Stale object: {}", e),
            Error::MandatoryRelation(e) => write!(f, "Mandatory relation: {}", e),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for StaleObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {} row(s) to be affected, got {} (sql: {})",
            self.expected, self.actual, self.sql
        )
    }
}

impl fmt::Display for MandatoryRelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relation '{}' of {} is not nullable but has no target",
            self.relation, self.entity
        )
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<StaleObjectError> for Error {
    fn from(err: StaleObjectError) -> Self {
        Error::StaleObject(err)
    }
}

impl From<MandatoryRelationError> for Error {
    fn from(err: MandatoryRelationError) -> Self {
        Error::MandatoryRelation(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for relmap operations.
pub type Result<T> = std::result::Result<T, Error>;
