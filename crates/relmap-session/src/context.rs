//! Per-call persistence context and silent columns.
//!
//! Silent columns are values written to columns the entity's own mapping
//! does not know about, typically a foreign key owned by a relation. The
//! cascade pushes them for one entity right before the entity is written and
//! removes them once the write is over, whatever its outcome.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use relmap_core::{Column, ColumnValues, StatementExecutor, Value};

/// Silent column values per entity, keyed by [`EntityRef::key`].
///
/// [`EntityRef::key`]: crate::EntityRef::key
#[derive(Debug, Default)]
pub struct SilentColumns {
    entries: RefCell<HashMap<usize, ColumnValues>>,
}

impl SilentColumns {
    pub fn register(&self, entity: usize, column: Column, value: Value) {
        self.entries
            .borrow_mut()
            .entry(entity)
            .or_default()
            .insert(column, value);
    }

    pub fn remove(&self, entity: usize, column: &Column) {
        let mut entries = self.entries.borrow_mut();
        if let Some(values) = entries.get_mut(&entity) {
            values.remove(column);
            if values.is_empty() {
                entries.remove(&entity);
            }
        }
    }

    /// Silent values registered for an entity.
    pub fn values_for(&self, entity: usize) -> ColumnValues {
        self.entries
            .borrow()
            .get(&entity)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of entities with silent values.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// Removes the silent values it registered when dropped.
#[must_use = "silent values are removed as soon as the guard is dropped"]
pub struct SilentGuard<'c> {
    silent: &'c SilentColumns,
    registered: Vec<(usize, Column)>,
}

impl SilentGuard<'_> {
    pub fn register(&mut self, entity: usize, column: &Column, value: Value) {
        self.silent.register(entity, column.clone(), value);
        self.registered.push((entity, column.clone()));
    }
}

impl Drop for SilentGuard<'_> {
    fn drop(&mut self) {
        for (entity, column) in self.registered.drain(..) {
            self.silent.remove(entity, &column);
        }
    }
}

/// State shared by every persister taking part in one call.
pub struct PersistContext<'a> {
    executor: &'a dyn StatementExecutor,
    silent: SilentColumns,
}

impl<'a> PersistContext<'a> {
    pub fn new(executor: &'a dyn StatementExecutor) -> Self {
        Self {
            executor,
            silent: SilentColumns::default(),
        }
    }

    pub fn executor(&self) -> &'a dyn StatementExecutor {
        self.executor
    }

    pub fn silent(&self) -> &SilentColumns {
        &self.silent
    }

    /// Register silent values for the lifetime of the returned guard.
    pub fn silent_scope(&self) -> SilentGuard<'_> {
        SilentGuard {
            silent: &self.silent,
            registered: Vec::new(),
        }
    }
}

impl fmt::Debug for PersistContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistContext")
            .field("silent", &self.silent.len())
            .finish_non_exhaustive()
    }
}
