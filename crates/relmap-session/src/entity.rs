//! Shared entity handles.
//!
//! Every entity taking part in a graph lives behind an [`EntityRef`]: the
//! select pipeline hands the same instance to every parent that references
//! it, and writes see the identifiers generated during an insert.
//!
//! ```ignore
//! let city = EntityRef::new(City { id: 0, name: "Grenoble".into() });
//! let country = EntityRef::new(Country { id: 0, capital: Some(city.clone()), ..Default::default() });
//! persister.insert(&executor, &[country])?;
//! assert_ne!(city.read().id, 0);
//! ```

use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Type-erased entity as stored in identity caches and join trees.
pub type AnyEntity = Arc<dyn Any + Send + Sync>;

/// Address of a type-erased entity, equal to [`EntityRef::key`] of the same
/// instance.
pub fn any_key(entity: &AnyEntity) -> usize {
    Arc::as_ptr(entity).cast::<()>() as usize
}

/// Shared, interior-mutable handle to an entity.
///
/// Cloning the handle shares the instance. Lock poisoning is ignored: a
/// panic while holding the lock leaves the entity as the panicking code
/// left it.
pub struct EntityRef<T>(Arc<RwLock<T>>);

impl<T> EntityRef<T> {
    pub fn new(entity: T) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Do both handles point to the same instance?
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the instance, stable while any handle is alive.
    pub fn key(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl<T: Send + Sync + 'static> EntityRef<T> {
    pub fn into_any(self) -> AnyEntity {
        self.0
    }

    /// Recover a typed handle, `None` when `entity` holds another type.
    pub fn from_any(entity: &AnyEntity) -> Option<Self> {
        Arc::clone(entity).downcast::<RwLock<T>>().ok().map(Self)
    }
}

impl<T> Clone for EntityRef<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// Structural equality; the same instance is always equal to itself.
impl<T: PartialEq> PartialEq for EntityRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || *self.read() == *other.read()
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read().fmt(f)
    }
}

impl<T> From<T> for EntityRef<T> {
    fn from(entity: T) -> Self {
        Self::new(entity)
    }
}

/// Handles in input order, without repeated instances.
pub(crate) fn distinct<T>(entities: impl IntoIterator<Item = EntityRef<T>>) -> Vec<EntityRef<T>> {
    let mut seen = std::collections::HashSet::new();
    entities.into_iter().filter(|e| seen.insert(e.key())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tag(&'static str);

    #[test]
    fn shared_instance() {
        let a = EntityRef::new(Tag("x"));
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.key(), b.key());
        b.write().0 = "y";
        assert_eq!(a.read().0, "y");
    }

    #[test]
    fn structural_equality() {
        let a = EntityRef::new(Tag("x"));
        let b = EntityRef::new(Tag("x"));
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn type_erasure_round_trip() {
        let a = EntityRef::new(Tag("x"));
        let any = a.clone().into_any();
        assert_eq!(any_key(&any), a.key());
        let back = EntityRef::<Tag>::from_any(&any).unwrap();
        assert!(back.ptr_eq(&a));
        assert!(EntityRef::<String>::from_any(&any).is_none());
    }

    #[test]
    fn distinct_keeps_first_occurrence() {
        let a = EntityRef::new(Tag("a"));
        let b = EntityRef::new(Tag("b"));
        let all = distinct(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(all.len(), 2);
        assert!(all[0].ptr_eq(&a));
        assert!(all[1].ptr_eq(&b));
    }
}
