//! Listener bus of a persister.
//!
//! Every write operation runs its listeners around the statements it issues:
//!
//! 1. `validate` of every listener, in registration order
//! 2. `before` of every listener
//! 3. the operation itself
//! 4. `after` of every listener
//!
//! When any step fails, `on_error` of every listener receives the batch and
//! the error, then the error is propagated unchanged. Relation cascades are
//! listeners too: the persister never knows about relationships.
//!
//! ```ignore
//! persister.listeners_mut().insert.add(
//!     WriteListener::new().before(|_ctx, countries: &[EntityRef<Country>]| {
//!         tracing::info!(count = countries.len(), "Inserting countries");
//!         Ok(())
//!     }),
//! );
//! ```

use std::fmt;

use relmap_core::{Error, Result};

use crate::context::PersistContext;
use crate::entity::EntityRef;

type Hook<T> = Box<dyn Fn(&PersistContext<'_>, &[T]) -> Result<()> + Send + Sync>;
type ErrorHook<T> = Box<dyn Fn(&PersistContext<'_>, &[T], &Error) + Send + Sync>;

/// An entity before and after modification.
#[derive(Debug)]
pub struct UpdatePair<C> {
    pub modified: EntityRef<C>,
    pub unmodified: EntityRef<C>,
}

impl<C> UpdatePair<C> {
    pub fn new(modified: EntityRef<C>, unmodified: EntityRef<C>) -> Self {
        Self {
            modified,
            unmodified,
        }
    }

    /// Pair of an entity with itself: no mapped column differs, only silent
    /// columns get written.
    pub fn unchanged(entity: EntityRef<C>) -> Self {
        Self {
            modified: entity.clone(),
            unmodified: entity,
        }
    }
}

impl<C> Clone for UpdatePair<C> {
    fn clone(&self) -> Self {
        Self {
            modified: self.modified.clone(),
            unmodified: self.unmodified.clone(),
        }
    }
}

/// Callbacks around one kind of write operation.
pub struct WriteListener<T> {
    validate: Option<Hook<T>>,
    before: Option<Hook<T>>,
    after: Option<Hook<T>>,
    on_error: Option<ErrorHook<T>>,
}

impl<T> Default for WriteListener<T> {
    fn default() -> Self {
        Self {
            validate: None,
            before: None,
            after: None,
            on_error: None,
        }
    }
}

impl<T> WriteListener<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checked before anything else; failing here issues no SQL.
    #[must_use]
    pub fn validate(
        mut self,
        hook: impl Fn(&PersistContext<'_>, &[T]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn before(
        mut self,
        hook: impl Fn(&PersistContext<'_>, &[T]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.before = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn after(
        mut self,
        hook: impl Fn(&PersistContext<'_>, &[T]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.after = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn on_error(
        mut self,
        hook: impl Fn(&PersistContext<'_>, &[T], &Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }
}

impl<T> fmt::Debug for WriteListener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteListener")
            .field("validate", &self.validate.is_some())
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Ordered listeners of one write operation.
pub struct WriteListeners<T> {
    listeners: Vec<WriteListener<T>>,
}

impl<T> Default for WriteListeners<T> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<T> WriteListeners<T> {
    pub fn add(&mut self, listener: WriteListener<T>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Run `operation` surrounded by the listeners.
    #[allow(clippy::result_large_err)]
    pub fn run<R>(
        &self,
        ctx: &PersistContext<'_>,
        batch: &[T],
        operation: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        let result = self.run_phases(ctx, batch, operation);
        if let Err(err) = &result {
            for hook in self.listeners.iter().filter_map(|l| l.on_error.as_ref()) {
                hook(ctx, batch, err);
            }
        }
        result
    }

    fn run_phases<R>(
        &self,
        ctx: &PersistContext<'_>,
        batch: &[T],
        operation: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        for hook in self.listeners.iter().filter_map(|l| l.validate.as_ref()) {
            hook(ctx, batch)?;
        }
        for hook in self.listeners.iter().filter_map(|l| l.before.as_ref()) {
            hook(ctx, batch)?;
        }
        let outcome = operation()?;
        for hook in self.listeners.iter().filter_map(|l| l.after.as_ref()) {
            hook(ctx, batch)?;
        }
        Ok(outcome)
    }
}

impl<T> fmt::Debug for WriteListeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.listeners).finish()
    }
}

type SelectHook<I> = Box<dyn Fn(&PersistContext<'_>, &[I]) -> Result<()> + Send + Sync>;
type LoadedHook<C> = Box<dyn Fn(&PersistContext<'_>, &[EntityRef<C>]) -> Result<()> + Send + Sync>;
type SelectErrorHook<I> = Box<dyn Fn(&PersistContext<'_>, &[I], &Error) + Send + Sync>;

/// Callbacks around a select by identifiers.
pub struct SelectListener<C, I> {
    before: Option<SelectHook<I>>,
    after: Option<LoadedHook<C>>,
    on_error: Option<SelectErrorHook<I>>,
}

impl<C, I> Default for SelectListener<C, I> {
    fn default() -> Self {
        Self {
            before: None,
            after: None,
            on_error: None,
        }
    }
}

impl<C, I> SelectListener<C, I> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn before(
        mut self,
        hook: impl Fn(&PersistContext<'_>, &[I]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.before = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn after(
        mut self,
        hook: impl Fn(&PersistContext<'_>, &[EntityRef<C>]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.after = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn on_error(
        mut self,
        hook: impl Fn(&PersistContext<'_>, &[I], &Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }
}

/// Ordered listeners of the select operation.
pub struct SelectListeners<C, I> {
    listeners: Vec<SelectListener<C, I>>,
}

impl<C, I> Default for SelectListeners<C, I> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<C, I> SelectListeners<C, I> {
    pub fn add(&mut self, listener: SelectListener<C, I>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    #[allow(clippy::result_large_err)]
    pub fn run(
        &self,
        ctx: &PersistContext<'_>,
        ids: &[I],
        operation: impl FnOnce() -> Result<Vec<EntityRef<C>>>,
    ) -> Result<Vec<EntityRef<C>>> {
        let result = self.run_phases(ctx, ids, operation);
        if let Err(err) = &result {
            for hook in self.listeners.iter().filter_map(|l| l.on_error.as_ref()) {
                hook(ctx, ids, err);
            }
        }
        result
    }

    fn run_phases(
        &self,
        ctx: &PersistContext<'_>,
        ids: &[I],
        operation: impl FnOnce() -> Result<Vec<EntityRef<C>>>,
    ) -> Result<Vec<EntityRef<C>>> {
        for hook in self.listeners.iter().filter_map(|l| l.before.as_ref()) {
            hook(ctx, ids)?;
        }
        let loaded = operation()?;
        for hook in self.listeners.iter().filter_map(|l| l.after.as_ref()) {
            hook(ctx, &loaded)?;
        }
        Ok(loaded)
    }
}

/// Every listener list of a persister of `C` identified by `I`.
pub struct PersistListeners<C, I> {
    pub insert: WriteListeners<EntityRef<C>>,
    pub update: WriteListeners<UpdatePair<C>>,
    pub update_by_id: WriteListeners<EntityRef<C>>,
    pub delete: WriteListeners<EntityRef<C>>,
    pub delete_by_id: WriteListeners<EntityRef<C>>,
    pub select: SelectListeners<C, I>,
}

impl<C, I> Default for PersistListeners<C, I> {
    fn default() -> Self {
        Self {
            insert: WriteListeners::default(),
            update: WriteListeners::default(),
            update_by_id: WriteListeners::default(),
            delete: WriteListeners::default(),
            delete_by_id: WriteListeners::default(),
            select: SelectListeners::default(),
        }
    }
}

impl<C, I> fmt::Debug for PersistListeners<C, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistListeners")
            .field("insert", &self.insert.len())
            .field("update", &self.update.len())
            .field("update_by_id", &self.update_by_id.len())
            .field("delete", &self.delete.len())
            .field("delete_by_id", &self.delete_by_id.len())
            .field("select", &self.select.len())
            .finish()
    }
}
