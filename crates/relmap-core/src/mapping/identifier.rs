//! Identifier types, "is new" policies and identifier insertion policies.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::value::{FromValue, Value};

/// How to tell a not-yet-persisted entity from a persisted one.
///
/// Chosen once per mapping from [`Identifier::IS_NEW`] and stored as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsNewPolicy {
    /// Reference-like identifier: new while unset.
    Nullable,
    /// Primitive numeric identifier: new while zero.
    PrimitiveZero,
    /// Identifier that tracks its own persistence state.
    PersistedFlag,
}

impl IsNewPolicy {
    pub fn is_new<I: Identifier>(self, id: &I) -> bool {
        match self {
            IsNewPolicy::Nullable => id.to_value().is_null(),
            IsNewPolicy::PrimitiveZero => {
                let value = id.to_value();
                value.is_null() || value.is_zero()
            }
            IsNewPolicy::PersistedFlag => !id.is_persisted(),
        }
    }
}

/// An entity identifier type.
pub trait Identifier: Clone + Send + Sync + fmt::Debug + 'static {
    /// Default "is new" policy for this identifier type.
    const IS_NEW: IsNewPolicy;

    fn to_value(&self) -> Value;

    /// Rebuild from a value read from the database.
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;

    /// Persistence flag, only meaningful for [`IsNewPolicy::PersistedFlag`].
    fn is_persisted(&self) -> bool {
        false
    }

    /// Same identifier marked as persisted.
    #[must_use]
    fn into_persisted(self) -> Self {
        self
    }
}

macro_rules! primitive_identifier {
    ($($ty:ty),*) => {
        $(
            impl Identifier for $ty {
                const IS_NEW: IsNewPolicy = IsNewPolicy::PrimitiveZero;

                fn to_value(&self) -> Value {
                    Value::from(*self)
                }

                fn from_value(value: &Value) -> Result<Self> {
                    <$ty as FromValue>::from_value(value)
                }
            }
        )*
    };
}

primitive_identifier!(i16, i32, i64);

impl Identifier for String {
    const IS_NEW: IsNewPolicy = IsNewPolicy::Nullable;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self> {
        <String as FromValue>::from_value(value)
    }
}

impl Identifier for [u8; 16] {
    const IS_NEW: IsNewPolicy = IsNewPolicy::Nullable;

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        <[u8; 16] as FromValue>::from_value(value)
    }
}

impl<T: Identifier> Identifier for Option<T> {
    const IS_NEW: IsNewPolicy = IsNewPolicy::Nullable;

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, T::to_value)
    }

    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// Identifier that remembers whether its entity was persisted.
///
/// Values read back from the database are persisted; freshly created ones
/// are not until the insert succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PersistableId<T> {
    value: T,
    persisted: bool,
}

impl<T> PersistableId<T> {
    /// A not-yet-persisted identifier.
    pub fn new(value: T) -> Self {
        Self {
            value,
            persisted: false,
        }
    }

    /// An identifier of an entity already in the database.
    pub fn persisted(value: T) -> Self {
        Self {
            value,
            persisted: true,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T> Identifier for PersistableId<T>
where
    T: Into<Value> + FromValue + Clone + Send + Sync + fmt::Debug + 'static,
{
    const IS_NEW: IsNewPolicy = IsNewPolicy::PersistedFlag;

    fn to_value(&self) -> Value {
        self.value.clone().into()
    }

    fn from_value(value: &Value) -> Result<Self> {
        T::from_value(value).map(Self::persisted)
    }

    fn is_persisted(&self) -> bool {
        self.persisted
    }

    fn into_persisted(self) -> Self {
        Self::persisted(self.value)
    }
}

/// How identifiers get their value on insert.
pub enum IdentifierPolicy<I> {
    /// The caller sets the identifier before inserting.
    Assigned,
    /// Generated right before the insert statement for new entities.
    BeforeInsert(Arc<dyn Fn() -> I + Send + Sync>),
    /// Generated by the database; the key column is left out of the insert
    /// and read back through the executor.
    AfterInsert,
}

impl<I> IdentifierPolicy<I> {
    pub fn before_insert(generator: impl Fn() -> I + Send + Sync + 'static) -> Self {
        IdentifierPolicy::BeforeInsert(Arc::new(generator))
    }
}

impl<I> Clone for IdentifierPolicy<I> {
    fn clone(&self) -> Self {
        match self {
            IdentifierPolicy::Assigned => IdentifierPolicy::Assigned,
            IdentifierPolicy::BeforeInsert(generator) => {
                IdentifierPolicy::BeforeInsert(Arc::clone(generator))
            }
            IdentifierPolicy::AfterInsert => IdentifierPolicy::AfterInsert,
        }
    }
}

impl<I> fmt::Debug for IdentifierPolicy<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierPolicy::Assigned => write!(f, "Assigned"),
            IdentifierPolicy::BeforeInsert(_) => write!(f, "BeforeInsert(..)"),
            IdentifierPolicy::AfterInsert => write!(f, "AfterInsert"),
        }
    }
}
