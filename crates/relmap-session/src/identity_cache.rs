//! Identity cache: one entity instance per (entity type, identifier).
//!
//! A fresh cache is built for every select unless the caller supplies one.
//! Entries are type-erased [`EntityRef`]s; typed accessors downcast them
//! back.
//!
//! ```ignore
//! let mut cache = IdentityCache::new();
//! let first = persister.select_with_cache(&executor, &[1], &mut cache)?;
//! let again = persister.select_with_cache(&executor, &[1], &mut cache)?;
//! assert!(first[0].ptr_eq(&again[0]));
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use relmap_core::{Value, ValueKey};

use crate::entity::{AnyEntity, EntityRef};

type CacheKey = (TypeId, ValueKey);

/// Map from (entity type, identifier) to the shared instance.
#[derive(Default)]
pub struct IdentityCache {
    entries: HashMap<CacheKey, AnyEntity>,
}

impl IdentityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instance of `entity_type` with `id`, if cached.
    pub fn get(&self, entity_type: TypeId, id: &Value) -> Option<&AnyEntity> {
        self.entries.get(&(entity_type, ValueKey::new(id.clone())))
    }

    /// Cached instance or the one built by `inflate`, with whether it was
    /// just inserted.
    pub fn get_or_insert_with<E>(
        &mut self,
        entity_type: TypeId,
        id: &Value,
        inflate: impl FnOnce() -> Result<AnyEntity, E>,
    ) -> Result<(AnyEntity, bool), E> {
        let key = (entity_type, ValueKey::new(id.clone()));
        if let Some(existing) = self.entries.get(&key) {
            return Ok((existing.clone(), false));
        }
        let entity = inflate()?;
        self.entries.insert(key, entity.clone());
        Ok((entity, true))
    }

    /// Typed lookup.
    pub fn get_entity<C: Send + Sync + 'static>(&self, id: &Value) -> Option<EntityRef<C>> {
        self.get(TypeId::of::<C>(), id)
            .and_then(EntityRef::from_any)
    }

    /// Cache `entity` under `id`, replacing any previous instance.
    pub fn insert_entity<C: Send + Sync + 'static>(&mut self, id: &Value, entity: EntityRef<C>) {
        self.entries.insert(
            (TypeId::of::<C>(), ValueKey::new(id.clone())),
            entity.into_any(),
        );
    }

    pub fn contains<C: 'static>(&self, id: &Value) -> bool {
        self.entries
            .contains_key(&(TypeId::of::<C>(), ValueKey::new(id.clone())))
    }

    pub fn remove<C: 'static>(&mut self, id: &Value) -> bool {
        self.entries
            .remove(&(TypeId::of::<C>(), ValueKey::new(id.clone())))
            .is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct City {
        name: &'static str,
    }

    #[derive(Debug)]
    struct Country;

    #[test]
    fn same_id_same_instance() {
        let mut cache = IdentityCache::new();
        let (first, inserted) = cache
            .get_or_insert_with(TypeId::of::<City>(), &Value::BigInt(1), || {
                Ok::<_, ()>(EntityRef::new(City { name: "Paris" }).into_any())
            })
            .unwrap();
        assert!(inserted);
        let (second, inserted) = cache
            .get_or_insert_with(TypeId::of::<City>(), &Value::Int(1), || {
                Ok::<_, ()>(EntityRef::new(City { name: "Lyon" }).into_any())
            })
            .unwrap();
        assert!(!inserted);
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert_eq!(
            cache.get_entity::<City>(&Value::BigInt(1)).unwrap().read().name,
            "Paris"
        );
    }

    #[test]
    fn types_have_separate_namespaces() {
        let mut cache = IdentityCache::new();
        cache.insert_entity(&Value::BigInt(1), EntityRef::new(City { name: "Paris" }));
        cache.insert_entity(&Value::BigInt(1), EntityRef::new(Country));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains::<Country>(&Value::BigInt(1)));
        assert!(cache.get_entity::<City>(&Value::BigInt(2)).is_none());

        assert!(cache.remove::<Country>(&Value::BigInt(1)));
        assert!(!cache.contains::<Country>(&Value::BigInt(1)));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn inflate_error_caches_nothing() {
        let mut cache = IdentityCache::new();
        let result = cache.get_or_insert_with(TypeId::of::<City>(), &Value::BigInt(1), || {
            Err::<AnyEntity, _>("broken row")
        });
        assert_eq!(result.unwrap_err(), "broken row");
        assert!(cache.is_empty());
    }
}
