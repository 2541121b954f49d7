// src/core/activity.rs

//! Activity kinds, the frozen activity record, and the callable aliases the
//! runtime accepts from user code.

use crate::builder::ActionHandle;
use crate::core::context_cell::ContextCell;
use crate::core::control::{Settled, StepValue};
use crate::pipeline::definition::Pipeline;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable identity of a pipeline, minted when its builder is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(u64);

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

impl PipelineId {
  pub(crate) fn next() -> Self {
    PipelineId(NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed))
  }
}

impl std::fmt::Display for PipelineId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "pipeline#{}", self.0)
  }
}

/// The six activity kinds. Exactly one per activity; the plain enum makes
/// multi-kind activities unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
  /// Execute the body exactly once.
  Once,
  /// Evaluate the predicate before each iteration; run the body while true.
  While,
  /// Run the body, then evaluate the predicate; repeat while false.
  Until,
  /// Run the body at most once, only if the predicate is true.
  If,
  /// Fan the context out into sub-contexts, run the body on each in parallel,
  /// fold the settled results.
  Split,
  /// When the predicate is true, signal the enclosing loop to exit.
  Break,
  /// When the predicate is true, abandon the rest of this pipeline pass.
  Continue,
}

impl ActivityKind {
  /// Kinds driven by a predicate.
  pub fn needs_pred(self) -> bool {
    !matches!(self, ActivityKind::Once | ActivityKind::Split)
  }

  /// Kinds that carry a body.
  pub fn needs_body(self) -> bool {
    !matches!(self, ActivityKind::Break | ActivityKind::Continue)
  }
}

impl std::fmt::Display for ActivityKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      ActivityKind::Once => "ONCE",
      ActivityKind::While => "WHILE",
      ActivityKind::Until => "UNTIL",
      ActivityKind::If => "IF",
      ActivityKind::Split => "SPLIT",
      ActivityKind::Break => "BREAK",
      ActivityKind::Continue => "CONTINUE",
    };
    f.write_str(s)
  }
}

/// Boxed future alias used by every callable the runtime stores.
pub type BoxFut<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A body operation: receives the context cell, yields the next
/// [`StepValue`]. Failures are opaque `anyhow` causes, wrapped by the
/// interpreter into `ActivityFailure`.
pub type OpFn<C> = Arc<dyn Fn(ContextCell<C>) -> BoxFut<anyhow::Result<StepValue<C>>> + Send + Sync>;

/// A predicate: truth value drives loop and conditional kinds.
pub type PredicateFn<C> = Arc<dyn Fn(ContextCell<C>) -> BoxFut<anyhow::Result<bool>> + Send + Sync>;

/// A splitter: expands the context into an ordered list of sub-contexts.
pub type SplitterFn<C> = Arc<dyn Fn(ContextCell<C>) -> BoxFut<anyhow::Result<Vec<C>>> + Send + Sync>;

/// A rejoiner: folds the settled sub-results back into a replacement context.
/// Receives the original context cell and one settlement record per
/// sub-context, in splitter order.
pub type RejoinerFn<C> =
  Arc<dyn Fn(ContextCell<C>, Vec<Settled<C>>) -> BoxFut<anyhow::Result<C>> + Send + Sync>;

/// The terminal (`done`) callback: receives the run's settlement and produces
/// the final result.
pub type TerminalFn<C> = Arc<dyn Fn(Settled<C>) -> BoxFut<anyhow::Result<C>> + Send + Sync>;

/// The body of an activity: a user operation or a nested pipeline.
pub enum Body<C: Send + Sync + 'static> {
  Op(OpFn<C>),
  Pipeline(Arc<Pipeline<C>>),
}

/// One named, kinded step in a frozen pipeline.
pub struct ActivityDef<C: Send + Sync + 'static> {
  pub(crate) name: String,
  pub(crate) kind: ActivityKind,
  pub(crate) pred: Option<PredicateFn<C>>,
  pub(crate) splitter: Option<SplitterFn<C>>,
  pub(crate) rejoiner: Option<RejoinerFn<C>>,
  pub(crate) body: Option<Body<C>>,
  pub(crate) action: Option<ActionHandle<C>>,
}

impl<C: Send + Sync + 'static> ActivityDef<C> {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> ActivityKind {
    self.kind
  }

  pub fn parent_action(&self) -> Option<&ActionHandle<C>> {
    self.action.as_ref()
  }
}

impl<C: Send + Sync + 'static> std::fmt::Debug for ActivityDef<C> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ActivityDef")
      .field("name", &self.name)
      .field("kind", &self.kind)
      .field("pred_present", &self.pred.is_some())
      .field("body_present", &self.body.is_some())
      .finish()
  }
}
