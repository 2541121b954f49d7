// src/pipeline/definition.rs

//! The frozen `Pipeline<C>` value type.

use crate::builder::ActionHandle;
use crate::core::activity::{ActivityDef, PipelineId, TerminalFn};
use crate::hooks::HookDispatcher;
use std::sync::Arc;

/// An immutable, insertion-ordered list of activities plus optional hook
/// dispatcher, terminal callback and parent action.
///
/// Produced by [`crate::Builder::build`]; may be executed any number of times
/// and shared freely across workers and concurrent `pipe` calls. All per-run
/// state is transient to the run.
pub struct Pipeline<C: Send + Sync + 'static> {
  pub(crate) id: PipelineId,
  pub(crate) activities: Vec<ActivityDef<C>>,
  pub(crate) hooks: Option<Arc<HookDispatcher<C>>>,
  pub(crate) terminal: Option<TerminalFn<C>>,
  pub(crate) action: Option<ActionHandle<C>>,
}

impl<C: Send + Sync + 'static> Pipeline<C> {
  pub(crate) fn new_frozen(
    id: PipelineId,
    activities: Vec<ActivityDef<C>>,
    hooks: Option<Arc<HookDispatcher<C>>>,
    terminal: Option<TerminalFn<C>>,
    action: Option<ActionHandle<C>>,
  ) -> Self {
    Self {
      id,
      activities,
      hooks,
      terminal,
      action,
    }
  }

  /// The stable pipeline id minted when the builder was created.
  pub fn id(&self) -> PipelineId {
    self.id
  }

  pub fn len(&self) -> usize {
    self.activities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.activities.is_empty()
  }

  /// Activity names in insertion order.
  pub fn activity_names(&self) -> Vec<&str> {
    self.activities.iter().map(|a| a.name()).collect()
  }

  pub fn activities(&self) -> &[ActivityDef<C>] {
    &self.activities
  }

  pub fn has_hooks(&self) -> bool {
    self.hooks.is_some()
  }

  /// The resolved hook dispatcher, when a hook source was configured. It
  /// exposes the underlying hook set so callers may schedule `setup` and
  /// `cleanup` themselves.
  pub fn hook_dispatcher(&self) -> Option<&Arc<HookDispatcher<C>>> {
    self.hooks.as_ref()
  }

  pub fn has_terminal(&self) -> bool {
    self.terminal.is_some()
  }

  pub fn parent_action(&self) -> Option<&ActionHandle<C>> {
    self.action.as_ref()
  }
}

impl<C: Send + Sync + 'static> std::fmt::Debug for Pipeline<C> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Pipeline")
      .field("id", &self.id)
      .field("activities", &self.activity_names())
      .field("hooks", &self.hooks.is_some())
      .field("terminal", &self.terminal.is_some())
      .finish()
  }
}
