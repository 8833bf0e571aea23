//! Mapping strategies: how an entity type is laid out in its table.
//!
//! A [`ClassMapping`] pairs typed property accessors with columns of one
//! table and derives from them everything the write and read pipelines
//! need:
//!
//! - `insert_values`: every mapped column with its current value
//! - `update_values`: only the columns that changed, plus the identifier
//! - `delete_values` / `select_values`: identifier-only WHERE values
//! - `transform` / `assemble`: entity instances from row values
//!
//! Value objects and fixed-size collections stored in the same table are
//! handled by [`EmbeddedMapper`] sub-strategies.

pub mod accessor;
pub mod class_mapping;
pub mod embedded;
pub mod identifier;

pub use accessor::PropertyAccessor;
pub use class_mapping::{ClassMapping, ClassMappingBuilder};
pub use embedded::{
    ColumnedCollectionMapper, ColumnedMapMapper, EmbeddedBeanMapper, EmbeddedMapper,
    ZonedTimestamp, ZonedTimestampMapper, diff_values,
};
pub use identifier::{Identifier, IdentifierPolicy, IsNewPolicy, PersistableId};
