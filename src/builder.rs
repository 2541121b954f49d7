// src/builder.rs

//! Fluent registration of activities and pipeline configuration, frozen into
//! an immutable [`Pipeline`] by [`Builder::build`].

use crate::core::activity::{
  ActivityDef, ActivityKind, Body, OpFn, PipelineId, PredicateFn, RejoinerFn, SplitterFn,
  TerminalFn,
};
use crate::core::context_cell::ContextCell;
use crate::core::control::{Settled, StepValue};
use crate::error::SkeinError;
use crate::hooks::{HookDispatcher, HookModuleLoader, HookModuleOptions, HookSet, HooksConfig, DEFAULT_HOOK_TIMEOUT};
use crate::pipeline::definition::Pipeline;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{event, Level};

/// A parent action: the owner of a pipeline's callbacks.
///
/// `setup` is invoked once, when a builder carrying the action is first
/// built; it may register further activities or configuration. Re-entry from
/// nested builders sharing the same [`ActionHandle`] is a no-op.
pub trait Action<C: Send + Sync + 'static>: Send + Sync + 'static {
  fn setup(&self, builder: &mut Builder<C>) -> Result<(), SkeinError> {
    let _ = builder;
    Ok(())
  }
}

/// A shareable handle to an [`Action`] plus its one-time setup tag.
pub struct ActionHandle<C: Send + Sync + 'static> {
  action: Arc<dyn Action<C>>,
  tag: Arc<AtomicBool>,
}

impl<C: Send + Sync + 'static> ActionHandle<C> {
  pub fn new(action: impl Action<C>) -> Self {
    Self::from_arc(Arc::new(action))
  }

  pub fn from_arc(action: Arc<dyn Action<C>>) -> Self {
    Self {
      action,
      tag: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Whether `setup` has already run for this action.
  pub fn setup_has_run(&self) -> bool {
    self.tag.load(Ordering::SeqCst)
  }

  pub(crate) fn run_setup_once(&self, builder: &mut Builder<C>) -> Result<(), SkeinError> {
    if self.tag.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    self.action.setup(builder)
  }
}

impl<C: Send + Sync + 'static> Clone for ActionHandle<C> {
  fn clone(&self) -> Self {
    Self {
      action: Arc::clone(&self.action),
      tag: Arc::clone(&self.tag),
    }
  }
}

impl<C: Send + Sync + 'static> std::fmt::Debug for ActionHandle<C> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ActionHandle")
      .field("setup_has_run", &self.setup_has_run())
      .finish()
  }
}

/// A nested body passed to the `do_*_pipeline` registrations: either a
/// not-yet-built [`Builder`] (frozen when the parent builds) or a pre-built
/// pipeline.
pub enum NestedDraft<C: Send + Sync + 'static> {
  Deferred(Builder<C>),
  Built(Arc<Pipeline<C>>),
}

/// Conversion into a nested activity body.
pub trait NestedBody<C: Send + Sync + 'static> {
  fn into_nested(self) -> NestedDraft<C>;
}

impl<C: Send + Sync + 'static> NestedBody<C> for Builder<C> {
  fn into_nested(self) -> NestedDraft<C> {
    NestedDraft::Deferred(self)
  }
}

impl<C: Send + Sync + 'static> NestedBody<C> for Pipeline<C> {
  fn into_nested(self) -> NestedDraft<C> {
    NestedDraft::Built(Arc::new(self))
  }
}

impl<C: Send + Sync + 'static> NestedBody<C> for Arc<Pipeline<C>> {
  fn into_nested(self) -> NestedDraft<C> {
    NestedDraft::Built(self)
  }
}

enum BodyDraft<C: Send + Sync + 'static> {
  Op(OpFn<C>),
  Nested(NestedDraft<C>),
}

struct ActivityDraft<C: Send + Sync + 'static> {
  name: String,
  kind: ActivityKind,
  pred: Option<PredicateFn<C>>,
  splitter: Option<SplitterFn<C>>,
  rejoiner: Option<RejoinerFn<C>>,
  body: Option<BodyDraft<C>>,
  action: Option<ActionHandle<C>>,
}

impl<C: Send + Sync + 'static> ActivityDraft<C> {
  fn freeze(self) -> Result<ActivityDef<C>, SkeinError> {
    let body = match self.body {
      None => None,
      Some(BodyDraft::Op(op)) => Some(Body::Op(op)),
      Some(BodyDraft::Nested(NestedDraft::Built(p))) => Some(Body::Pipeline(p)),
      Some(BodyDraft::Nested(NestedDraft::Deferred(builder))) => {
        Some(Body::Pipeline(Arc::new(builder.build()?)))
      }
    };
    Ok(ActivityDef {
      name: self.name,
      kind: self.kind,
      pred: self.pred,
      splitter: self.splitter,
      rejoiner: self.rejoiner,
      body,
      action: self.action,
    })
  }
}

/// Accumulates activity definitions and configuration; [`Builder::build`]
/// freezes it into an immutable, re-runnable [`Pipeline`].
pub struct Builder<C: Send + Sync + 'static> {
  id: PipelineId,
  drafts: Vec<ActivityDraft<C>>,
  hooks: Option<HooksConfig<C>>,
  hook_loader: Option<Arc<dyn HookModuleLoader<C>>>,
  hook_timeout: Duration,
  action: Option<ActionHandle<C>>,
  terminal: Option<TerminalFn<C>>,
}

impl<C: Send + Sync + 'static> Builder<C> {
  pub fn new() -> Self {
    Self {
      id: PipelineId::next(),
      drafts: Vec::new(),
      hooks: None,
      hook_loader: None,
      hook_timeout: DEFAULT_HOOK_TIMEOUT,
      action: None,
      terminal: None,
    }
  }

  /// The read-only id this builder will stamp onto its pipeline.
  pub fn tag(&self) -> PipelineId {
    self.id
  }

  // --- Activity registration ---

  /// Registers an activity that runs its body exactly once.
  pub fn do_once<F, Fut>(&mut self, name: impl Into<String>, op: F) -> Result<&mut Self, SkeinError>
  where
    F: Fn(ContextCell<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<StepValue<C>>> + Send + 'static,
  {
    self.register(name.into(), ActivityKind::Once, None, None, None, Some(BodyDraft::Op(wrap_op(op))))
  }

  /// Registers a ONCE activity whose body is a nested pipeline.
  pub fn do_once_pipeline(
    &mut self,
    name: impl Into<String>,
    nested: impl NestedBody<C>,
  ) -> Result<&mut Self, SkeinError> {
    self.register(
      name.into(),
      ActivityKind::Once,
      None,
      None,
      None,
      Some(BodyDraft::Nested(nested.into_nested())),
    )
  }

  /// Registers a pre-checked loop: the predicate is evaluated before each
  /// iteration and the body runs while it is true.
  pub fn do_while<P, PFut, F, Fut>(
    &mut self,
    name: impl Into<String>,
    pred: P,
    op: F,
  ) -> Result<&mut Self, SkeinError>
  where
    P: Fn(ContextCell<C>) -> PFut + Send + Sync + 'static,
    PFut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    F: Fn(ContextCell<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<StepValue<C>>> + Send + 'static,
  {
    self.register(
      name.into(),
      ActivityKind::While,
      Some(wrap_pred(pred)),
      None,
      None,
      Some(BodyDraft::Op(wrap_op(op))),
    )
  }

  pub fn do_while_pipeline<P, PFut>(
    &mut self,
    name: impl Into<String>,
    pred: P,
    nested: impl NestedBody<C>,
  ) -> Result<&mut Self, SkeinError>
  where
    P: Fn(ContextCell<C>) -> PFut + Send + Sync + 'static,
    PFut: Future<Output = anyhow::Result<bool>> + Send + 'static,
  {
    self.register(
      name.into(),
      ActivityKind::While,
      Some(wrap_pred(pred)),
      None,
      None,
      Some(BodyDraft::Nested(nested.into_nested())),
    )
  }

  /// Registers a post-checked loop: the body runs, then the predicate is
  /// evaluated; iteration repeats while it is false.
  pub fn do_until<P, PFut, F, Fut>(
    &mut self,
    name: impl Into<String>,
    pred: P,
    op: F,
  ) -> Result<&mut Self, SkeinError>
  where
    P: Fn(ContextCell<C>) -> PFut + Send + Sync + 'static,
    PFut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    F: Fn(ContextCell<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<StepValue<C>>> + Send + 'static,
  {
    self.register(
      name.into(),
      ActivityKind::Until,
      Some(wrap_pred(pred)),
      None,
      None,
      Some(BodyDraft::Op(wrap_op(op))),
    )
  }

  pub fn do_until_pipeline<P, PFut>(
    &mut self,
    name: impl Into<String>,
    pred: P,
    nested: impl NestedBody<C>,
  ) -> Result<&mut Self, SkeinError>
  where
    P: Fn(ContextCell<C>) -> PFut + Send + Sync + 'static,
    PFut: Future<Output = anyhow::Result<bool>> + Send + 'static,
  {
    self.register(
      name.into(),
      ActivityKind::Until,
      Some(wrap_pred(pred)),
      None,
      None,
      Some(BodyDraft::Nested(nested.into_nested())),
    )
  }

  /// Registers a conditional: the body runs at most once, only if the
  /// predicate is true.
  pub fn do_if<P, PFut, F, Fut>(
    &mut self,
    name: impl Into<String>,
    pred: P,
    op: F,
  ) -> Result<&mut Self, SkeinError>
  where
    P: Fn(ContextCell<C>) -> PFut + Send + Sync + 'static,
    PFut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    F: Fn(ContextCell<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<StepValue<C>>> + Send + 'static,
  {
    self.register(
      name.into(),
      ActivityKind::If,
      Some(wrap_pred(pred)),
      None,
      None,
      Some(BodyDraft::Op(wrap_op(op))),
    )
  }

  pub fn do_if_pipeline<P, PFut>(
    &mut self,
    name: impl Into<String>,
    pred: P,
    nested: impl NestedBody<C>,
  ) -> Result<&mut Self, SkeinError>
  where
    P: Fn(ContextCell<C>) -> PFut + Send + Sync + 'static,
    PFut: Future<Output = anyhow::Result<bool>> + Send + 'static,
  {
    self.register(
      name.into(),
      ActivityKind::If,
      Some(wrap_pred(pred)),
      None,
      None,
      Some(BodyDraft::Nested(nested.into_nested())),
    )
  }

  /// Registers a parallel fan-out: `splitter` expands the context into
  /// sub-contexts, the body runs on each, and `rejoiner` folds the settled
  /// results (in splitter order) into a replacement context.
  pub fn do_split<S, SFut, R, RFut, F, Fut>(
    &mut self,
    name: impl Into<String>,
    splitter: S,
    rejoiner: R,
    op: F,
  ) -> Result<&mut Self, SkeinError>
  where
    S: Fn(ContextCell<C>) -> SFut + Send + Sync + 'static,
    SFut: Future<Output = anyhow::Result<Vec<C>>> + Send + 'static,
    R: Fn(ContextCell<C>, Vec<Settled<C>>) -> RFut + Send + Sync + 'static,
    RFut: Future<Output = anyhow::Result<C>> + Send + 'static,
    F: Fn(ContextCell<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<StepValue<C>>> + Send + 'static,
  {
    self.register(
      name.into(),
      ActivityKind::Split,
      None,
      Some(wrap_splitter(splitter)),
      Some(wrap_rejoiner(rejoiner)),
      Some(BodyDraft::Op(wrap_op(op))),
    )
  }

  pub fn do_split_pipeline<S, SFut, R, RFut>(
    &mut self,
    name: impl Into<String>,
    splitter: S,
    rejoiner: R,
    nested: impl NestedBody<C>,
  ) -> Result<&mut Self, SkeinError>
  where
    S: Fn(ContextCell<C>) -> SFut + Send + Sync + 'static,
    SFut: Future<Output = anyhow::Result<Vec<C>>> + Send + 'static,
    R: Fn(ContextCell<C>, Vec<Settled<C>>) -> RFut + Send + Sync + 'static,
    RFut: Future<Output = anyhow::Result<C>> + Send + 'static,
  {
    self.register(
      name.into(),
      ActivityKind::Split,
      None,
      Some(wrap_splitter(splitter)),
      Some(wrap_rejoiner(rejoiner)),
      Some(BodyDraft::Nested(nested.into_nested())),
    )
  }

  /// Registers a BREAK marker: when the predicate is true, the enclosing
  /// loop is signalled to exit and the rest of this pipeline pass is skipped.
  pub fn do_break<P, PFut>(&mut self, name: impl Into<String>, pred: P) -> Result<&mut Self, SkeinError>
  where
    P: Fn(ContextCell<C>) -> PFut + Send + Sync + 'static,
    PFut: Future<Output = anyhow::Result<bool>> + Send + 'static,
  {
    self.register(name.into(), ActivityKind::Break, Some(wrap_pred(pred)), None, None, None)
  }

  /// Registers a CONTINUE marker: when the predicate is true, the rest of
  /// this pipeline pass is skipped and the enclosing loop re-checks.
  pub fn do_continue<P, PFut>(&mut self, name: impl Into<String>, pred: P) -> Result<&mut Self, SkeinError>
  where
    P: Fn(ContextCell<C>) -> PFut + Send + Sync + 'static,
    PFut: Future<Output = anyhow::Result<bool>> + Send + 'static,
  {
    self.register(name.into(), ActivityKind::Continue, Some(wrap_pred(pred)), None, None, None)
  }

  fn register(
    &mut self,
    name: String,
    kind: ActivityKind,
    pred: Option<PredicateFn<C>>,
    splitter: Option<SplitterFn<C>>,
    rejoiner: Option<RejoinerFn<C>>,
    body: Option<BodyDraft<C>>,
  ) -> Result<&mut Self, SkeinError> {
    if self.drafts.iter().any(|d| d.name == name) {
      return Err(SkeinError::DuplicateActivity { activity: name });
    }
    event!(Level::DEBUG, pipeline = %self.id, activity = %name, %kind, "Activity registered.");
    self.drafts.push(ActivityDraft {
      name,
      kind,
      pred,
      splitter,
      rejoiner,
      body,
      action: self.action.clone(),
    });
    Ok(self)
  }

  // --- Configuration ---

  /// Configures the hook set for this pipeline. Mutually exclusive with
  /// [`Builder::with_hooks_file`]; passing the same `Arc` again is a no-op.
  pub fn with_hooks(&mut self, hooks: Arc<HookSet<C>>) -> Result<&mut Self, SkeinError> {
    match &self.hooks {
      None => {
        self.hooks = Some(HooksConfig::Inline(hooks));
        Ok(self)
      }
      Some(HooksConfig::Inline(existing)) if Arc::ptr_eq(existing, &hooks) => Ok(self),
      Some(_) => Err(SkeinError::HooksAlreadyConfigured),
    }
  }

  /// Configures the hook set from a module file, resolved at build time by
  /// the loader from [`Builder::with_hook_loader`]. Mutually exclusive with
  /// [`Builder::with_hooks`]; repeating the same path and export is a no-op.
  pub fn with_hooks_file(
    &mut self,
    path: impl Into<PathBuf>,
    export_name: impl Into<String>,
  ) -> Result<&mut Self, SkeinError> {
    let path = path.into();
    let export_name = export_name.into();
    match &self.hooks {
      None => {
        self.hooks = Some(HooksConfig::File { path, export_name });
        Ok(self)
      }
      Some(HooksConfig::File { path: p, export_name: e }) if *p == path && *e == export_name => Ok(self),
      Some(_) => Err(SkeinError::HooksAlreadyConfigured),
    }
  }

  /// Supplies the collaborator that resolves a hook file configuration.
  pub fn with_hook_loader(&mut self, loader: Arc<dyn HookModuleLoader<C>>) -> &mut Self {
    self.hook_loader = Some(loader);
    self
  }

  /// Overrides the wall-clock bound for each `before`/`after` hook call.
  pub fn with_hook_timeout(&mut self, timeout: Duration) -> &mut Self {
    self.hook_timeout = timeout;
    self
  }

  /// Sets the parent action if unset, and back-fills it onto every
  /// already-registered activity that has none.
  pub fn with_action(&mut self, action: ActionHandle<C>) -> &mut Self {
    if self.action.is_none() {
      self.action = Some(action);
    }
    let effective = self.action.clone();
    for draft in &mut self.drafts {
      if draft.action.is_none() {
        draft.action = effective.clone();
      }
    }
    self
  }

  /// Registers the terminal callback; the last registration wins.
  pub fn done<F, Fut>(&mut self, terminal: F) -> &mut Self
  where
    F: Fn(Settled<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<C>> + Send + 'static,
  {
    self.terminal = Some(Arc::new(move |settled| Box::pin(terminal(settled))));
    self
  }

  /// Freezes the builder into an immutable pipeline.
  ///
  /// Runs the action's `setup` once (tracked on the action handle, so nested
  /// re-entry is a no-op), resolves a file-configured hook set through the
  /// loader, and recursively builds deferred nested builders.
  pub fn build(mut self) -> Result<Pipeline<C>, SkeinError> {
    if let Some(action) = self.action.clone() {
      action.run_setup_once(&mut self)?;
    }

    let dispatcher = match self.hooks.take() {
      None => None,
      Some(HooksConfig::Inline(set)) => Some(Arc::new(HookDispatcher::new(set, self.hook_timeout))),
      Some(HooksConfig::File { path, export_name }) => {
        let loader = self
          .hook_loader
          .clone()
          .ok_or_else(|| SkeinError::HookLoaderMissing { path: path.clone() })?;
        let set = loader.load(&path, &export_name, HookModuleOptions::default())?;
        Some(Arc::new(HookDispatcher::new(set, self.hook_timeout)))
      }
    };

    let mut activities = Vec::with_capacity(self.drafts.len());
    for draft in self.drafts {
      activities.push(draft.freeze()?);
    }

    event!(Level::DEBUG, pipeline = %self.id, num_activities = activities.len(), "Pipeline built.");
    Ok(Pipeline::new_frozen(self.id, activities, dispatcher, self.terminal, self.action))
  }
}

impl<C: Send + Sync + 'static> Default for Builder<C> {
  fn default() -> Self {
    Self::new()
  }
}

impl<C: Send + Sync + 'static> std::fmt::Debug for Builder<C> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Builder")
      .field("id", &self.id)
      .field("activities", &self.drafts.iter().map(|d| d.name.as_str()).collect::<Vec<_>>())
      .field("hooks_configured", &self.hooks.is_some())
      .field("terminal_present", &self.terminal.is_some())
      .finish()
  }
}

fn wrap_op<C, F, Fut>(op: F) -> OpFn<C>
where
  C: Send + Sync + 'static,
  F: Fn(ContextCell<C>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = anyhow::Result<StepValue<C>>> + Send + 'static,
{
  Arc::new(move |ctx| Box::pin(op(ctx)))
}

fn wrap_pred<C, P, PFut>(pred: P) -> PredicateFn<C>
where
  C: Send + Sync + 'static,
  P: Fn(ContextCell<C>) -> PFut + Send + Sync + 'static,
  PFut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
  Arc::new(move |ctx| Box::pin(pred(ctx)))
}

fn wrap_splitter<C, S, SFut>(splitter: S) -> SplitterFn<C>
where
  C: Send + Sync + 'static,
  S: Fn(ContextCell<C>) -> SFut + Send + Sync + 'static,
  SFut: Future<Output = anyhow::Result<Vec<C>>> + Send + 'static,
{
  Arc::new(move |ctx| Box::pin(splitter(ctx)))
}

fn wrap_rejoiner<C, R, RFut>(rejoiner: R) -> RejoinerFn<C>
where
  C: Send + Sync + 'static,
  R: Fn(ContextCell<C>, Vec<Settled<C>>) -> RFut + Send + Sync + 'static,
  RFut: Future<Output = anyhow::Result<C>> + Send + 'static,
{
  Arc::new(move |ctx, settled| Box::pin(rejoiner(ctx, settled)))
}
