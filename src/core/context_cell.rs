// src/core/context_cell.rs

//! Shared handle over the context value threaded through a pipeline run.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// A wrapper for the run context providing shared ownership and interior
/// mutability via `parking_lot::RwLock`.
///
/// Every user callable (body, predicate, splitter, rejoiner, hook) receives a
/// cheap clone of the cell. Lock guards are blocking and MUST NOT be held
/// across `.await` suspension points.
#[derive(Debug)]
pub struct ContextCell<C: Send + Sync + 'static>(Arc<RwLock<C>>);

impl<C: Send + Sync + 'static> ContextCell<C> {
  pub fn new(value: C) -> Self {
    ContextCell(Arc::new(RwLock::new(value)))
  }

  /// Acquires a read lock. The returned guard MUST be dropped before any
  /// `.await` point.
  pub fn read(&self) -> RwLockReadGuard<'_, C> {
    self.0.read()
  }

  /// Acquires a write lock. The returned guard MUST be dropped before any
  /// `.await` point.
  pub fn write(&self) -> RwLockWriteGuard<'_, C> {
    self.0.write()
  }

  /// Swaps the held context for `value`, returning the previous one.
  pub fn replace(&self, value: C) -> C {
    std::mem::replace(&mut *self.0.write(), value)
  }

  /// Clones the current context out of the cell.
  pub fn snapshot(&self) -> C
  where
    C: Clone,
  {
    self.0.read().clone()
  }

  /// Recovers the context by value. Returns `None` when another handle to the
  /// same cell is still alive (e.g. a hook kept a clone past the run).
  pub fn into_inner(self) -> Option<C> {
    Arc::try_unwrap(self.0).ok().map(RwLock::into_inner)
  }
}

impl<C: Send + Sync + 'static> Clone for ContextCell<C> {
  fn clone(&self) -> Self {
    ContextCell(Arc::clone(&self.0))
  }
}

impl<C: Send + Sync + 'static + Default> Default for ContextCell<C> {
  fn default() -> Self {
    Self::new(Default::default())
  }
}
