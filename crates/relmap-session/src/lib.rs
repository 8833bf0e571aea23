//! Persistence pipeline for relmap.
//!
//! `relmap-session` turns class mappings into working persisters and wires
//! them into aggregates.
//!
//! # Role In The Architecture
//!
//! - **Persister**: insert, update, delete and select of one entity type,
//!   built on the statement generator of `relmap-query`.
//! - **Join tree**: describes the aggregate loaded by one select; a graph
//!   select hydrates it with an identity cache.
//! - **Listener bus**: validate, before, after and error callbacks around
//!   every write operation.
//! - **Cascades**: relations expressed as join tree nodes plus listeners,
//!   writing foreign keys as silent columns.
//!
//! # Example
//!
//! ```ignore
//! let cities = Arc::new(Persister::with_defaults(Arc::new(city_mapping))?);
//! let mut countries = Persister::with_defaults(Arc::new(country_mapping))?;
//! OneToMany::new(cities, &country_id, |c: &Country| c.cities.clone(), |c, city| c.cities.push(city))
//!     .indexed_by(&idx)
//!     .register(&mut countries)?;
//!
//! countries.persist(&executor, &[france])?;
//! let loaded = countries.select(&executor, &[1])?;
//! ```

pub mod cascade;
pub mod config;
pub mod context;
pub mod entity;
pub mod events;
pub mod identity_cache;
pub mod join_tree;
pub mod persister;

mod graph_select;
mod write_operation;

#[cfg(test)]
mod testing;

pub use cascade::{
    AssociationPersister, AssociationRecord, AssociationTable, ManyToMany, OneToMany, OneToOne,
};
pub use config::{ColumnOrder, PersisterConfig};
pub use context::{PersistContext, SilentColumns, SilentGuard};
pub use entity::{AnyEntity, EntityRef, any_key};
pub use events::{
    PersistListeners, SelectListener, SelectListeners, UpdatePair, WriteListener, WriteListeners,
};
pub use identity_cache::IdentityCache;
pub use join_tree::{
    EntityInflater, JoinOn, JoinTree, MergeApplier, NodeId, NodeRow, RelationFixer,
    RelationKeyProvider, merge_applier, relation_fixer,
};
pub use persister::Persister;
