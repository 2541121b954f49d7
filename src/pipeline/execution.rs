// src/pipeline/execution.rs

//! The interpreter: drives one pipeline run activity by activity, implements
//! the kind semantics, propagates break/continue through the signal hub, and
//! invokes the terminal callback at the top level.

use crate::builder::ActionHandle;
use crate::core::activity::{ActivityDef, ActivityKind, Body};
use crate::core::context_cell::ContextCell;
use crate::core::control::{Settled, StepValue};
use crate::error::SkeinError;
use crate::hooks::{HookDispatcher, HookEvent};
use crate::pipeline::definition::Pipeline;
use crate::pipeline::pool::{fan_out, DEFAULT_MAX_CONCURRENT};
use crate::pipeline::signal::{ScopeId, SignalHub};
use futures::future::{join_all, BoxFuture};
use std::sync::Arc;
use tracing::{event, instrument, Level};

/// The hook source and parent action a run inherits from its enclosing
/// pipeline. A nested pipeline's own configuration always wins; attachment of
/// the outer one is implicit and therefore idempotent.
pub(crate) struct Env<C: Send + Sync + 'static> {
  pub(crate) hooks: Option<Arc<HookDispatcher<C>>>,
  pub(crate) action: Option<ActionHandle<C>>,
}

impl<C: Send + Sync + 'static> Clone for Env<C> {
  fn clone(&self) -> Self {
    Self {
      hooks: self.hooks.clone(),
      action: self.action.clone(),
    }
  }
}

impl<C: Send + Sync + 'static> Pipeline<C> {
  /// Executes the pipeline on `seed` and returns the final context.
  ///
  /// This is a top-level run: break/continue markers are illegal at this
  /// nesting level, and the terminal callback (when registered) runs exactly
  /// once, on success or failure.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(pipeline = %self.id, num_activities = self.activities.len()),
    err(Display)
  )]
  pub async fn run(&self, seed: C) -> Result<C, SkeinError> {
    self.run_with(seed, None).await
  }

  /// Top-level run with an inherited hook dispatcher. Used by the SPLIT
  /// fan-out, where each sub-context runs the nested pipeline as its own
  /// top-level execution with the outer hook source attached when the nested
  /// pipeline has none.
  pub(crate) async fn run_with(
    &self,
    seed: C,
    inherited_hooks: Option<Arc<HookDispatcher<C>>>,
  ) -> Result<C, SkeinError> {
    event!(Level::DEBUG, pipeline = %self.id, "Pipeline execution starting.");
    let cell = ContextCell::new(seed);
    let exec = Exec::new();
    let env = Env {
      hooks: inherited_hooks,
      action: None,
    };
    let outcome = exec.run_pipeline(self, cell.clone(), None, env).await;
    self.finish(cell, outcome).await
  }

  /// Recovers the final context and applies the terminal (`done`) semantics:
  /// the terminal always runs at the top level, receives the settlement of
  /// the run, and its own failure compounds with a prior activity error.
  async fn finish(
    &self,
    cell: ContextCell<C>,
    outcome: Result<(), SkeinError>,
  ) -> Result<C, SkeinError> {
    let outcome: Result<C, SkeinError> = match outcome {
      Ok(()) => cell.into_inner().ok_or(SkeinError::ContextRetained),
      Err(e) => Err(e),
    };

    let Some(terminal) = &self.terminal else {
      return outcome;
    };

    let (settled, prior) = match outcome {
      Ok(ctx) => (Settled::Fulfilled(ctx), None),
      Err(e) => {
        event!(Level::DEBUG, pipeline = %self.id, error = %e, "Run failed; terminal receives the error.");
        let reason = Arc::new(e);
        (Settled::Rejected(Arc::clone(&reason)), Some(reason))
      }
    };

    match terminal(settled).await {
      Ok(ctx) => Ok(ctx),
      Err(source) => Err(SkeinError::TerminalFailure { source, prior }),
    }
  }
}

/// Per-run interpreter state. All of it is transient: nothing survives the
/// run, and concurrent runs of the same pipeline never share an `Exec`.
pub(crate) struct Exec {
  hub: SignalHub,
}

impl Exec {
  pub(crate) fn new() -> Self {
    Self {
      hub: SignalHub::new(),
    }
  }

  /// Runs every activity of `pipeline` in insertion order against `cell`.
  ///
  /// `parent_loop` is the scope of the lexically enclosing loop, when this
  /// pipeline executes as a loop body; it is what makes BREAK/CONTINUE legal
  /// here and what a BREAK publishes. Returning early (without error) is how
  /// a fired marker abandons the rest of the pass.
  fn run_pipeline<'a, C: Send + Sync + 'static>(
    &'a self,
    pipeline: &'a Pipeline<C>,
    cell: ContextCell<C>,
    parent_loop: Option<ScopeId>,
    inherited: Env<C>,
  ) -> BoxFuture<'a, Result<(), SkeinError>> {
    Box::pin(async move {
      let env = Env {
        hooks: pipeline.hooks.clone().or(inherited.hooks),
        action: pipeline.action.clone().or(inherited.action),
      };

      for (index, activity) in pipeline.activities.iter().enumerate() {
        event!(
          Level::DEBUG,
          pipeline = %pipeline.id,
          activity = %activity.name,
          kind = %activity.kind,
          index,
          "Processing activity."
        );

        if matches!(activity.kind, ActivityKind::Break | ActivityKind::Continue) {
          let Some(target) = parent_loop else {
            event!(Level::ERROR, pipeline = %pipeline.id, activity = %activity.name, "Control-flow marker outside any loop.");
            return Err(SkeinError::ControlFlowOutsideLoop {
              activity: activity.name.clone(),
              kind: activity.kind.to_string(),
              pipeline: pipeline.id,
            });
          };
          if !self.eval_pred(pipeline, activity, &cell).await? {
            continue;
          }
          if activity.kind == ActivityKind::Break {
            event!(Level::DEBUG, pipeline = %pipeline.id, activity = %activity.name, %target, "Break signalled; abandoning this pass.");
            self.hub.emit_break(target);
          } else {
            event!(Level::DEBUG, pipeline = %pipeline.id, activity = %activity.name, "Continue; abandoning this pass.");
          }
          return Ok(());
        }

        self.hook(&env, HookEvent::Before, &activity.name, &cell).await?;
        self.run_activity(pipeline, activity, &cell, &env).await?;
        self.hook(&env, HookEvent::After, &activity.name, &cell).await?;
      }

      event!(Level::DEBUG, pipeline = %pipeline.id, "Pipeline pass completed.");
      Ok(())
    })
  }

  async fn run_activity<C: Send + Sync + 'static>(
    &self,
    pipeline: &Pipeline<C>,
    activity: &ActivityDef<C>,
    cell: &ContextCell<C>,
    env: &Env<C>,
  ) -> Result<(), SkeinError> {
    match activity.kind {
      ActivityKind::Once => {
        let scope = ScopeId::next();
        self.exec_body(pipeline, activity, cell, env, scope).await
      }

      ActivityKind::If => {
        if self.eval_pred(pipeline, activity, cell).await? {
          let scope = ScopeId::next();
          self.exec_body(pipeline, activity, cell, env, scope).await
        } else {
          event!(Level::TRACE, activity = %activity.name, "IF predicate false; body skipped.");
          Ok(())
        }
      }

      ActivityKind::While => {
        let scope = ScopeId::next();
        loop {
          if !self.eval_pred(pipeline, activity, cell).await? {
            break;
          }
          let mut listener = self.hub.subscribe();
          self.exec_body(pipeline, activity, cell, env, scope).await?;
          if listener.fired_for(scope) {
            event!(Level::DEBUG, activity = %activity.name, %scope, "WHILE exited via break.");
            break;
          }
        }
        Ok(())
      }

      ActivityKind::Until => {
        let scope = ScopeId::next();
        loop {
          let mut listener = self.hub.subscribe();
          self.exec_body(pipeline, activity, cell, env, scope).await?;
          if listener.fired_for(scope) {
            event!(Level::DEBUG, activity = %activity.name, %scope, "UNTIL exited via break.");
            break;
          }
          if self.eval_pred(pipeline, activity, cell).await? {
            break;
          }
        }
        Ok(())
      }

      ActivityKind::Split => self.run_split(pipeline, activity, cell, env).await,

      ActivityKind::Break | ActivityKind::Continue => Err(SkeinError::Internal(format!(
        "control-flow marker '{}' dispatched as a bodied activity",
        activity.name
      ))),
    }
  }

  /// Executes an activity body once: a user op (whose return value may
  /// replace the context or descend into a dynamically returned builder) or
  /// a nested pipeline run scoped to `scope`.
  async fn exec_body<C: Send + Sync + 'static>(
    &self,
    pipeline: &Pipeline<C>,
    activity: &ActivityDef<C>,
    cell: &ContextCell<C>,
    env: &Env<C>,
    scope: ScopeId,
  ) -> Result<(), SkeinError> {
    let body = activity.body.as_ref().ok_or_else(|| SkeinError::MissingBody {
      activity: activity.name.clone(),
      kind: activity.kind.to_string(),
    })?;

    match body {
      Body::Op(op) => {
        let step = op(cell.clone())
          .await
          .map_err(|source| activity_failure(pipeline, activity, source))?;
        self.apply_step(pipeline, activity, step, cell, env, scope).await
      }
      Body::Pipeline(nested) => {
        self
          .run_pipeline(nested.as_ref(), cell.clone(), Some(scope), env.clone())
          .await
      }
    }
  }

  async fn apply_step<C: Send + Sync + 'static>(
    &self,
    pipeline: &Pipeline<C>,
    activity: &ActivityDef<C>,
    step: StepValue<C>,
    cell: &ContextCell<C>,
    env: &Env<C>,
    scope: ScopeId,
  ) -> Result<(), SkeinError> {
    match step {
      StepValue::Keep => Ok(()),
      StepValue::Replace(next) => {
        cell.replace(next);
        Ok(())
      }
      StepValue::Nested(builder) => {
        event!(Level::DEBUG, activity = %activity.name, nested = %builder.tag(), "Body returned a builder; descending.");
        let nested = builder
          .build()
          .map_err(|e| activity_failure(pipeline, activity, anyhow::Error::new(e)))?;
        self
          .run_pipeline(&nested, cell.clone(), Some(scope), env.clone())
          .await
      }
    }
  }

  async fn run_split<C: Send + Sync + 'static>(
    &self,
    pipeline: &Pipeline<C>,
    activity: &ActivityDef<C>,
    cell: &ContextCell<C>,
    env: &Env<C>,
  ) -> Result<(), SkeinError> {
    let splitter = activity.splitter.as_ref().ok_or_else(|| SkeinError::SplitIncomplete {
      activity: activity.name.clone(),
    })?;
    let rejoiner = activity.rejoiner.as_ref().ok_or_else(|| SkeinError::SplitIncomplete {
      activity: activity.name.clone(),
    })?;
    let body = activity.body.as_ref().ok_or_else(|| SkeinError::MissingBody {
      activity: activity.name.clone(),
      kind: activity.kind.to_string(),
    })?;

    let subs = splitter(cell.clone())
      .await
      .map_err(|source| activity_failure(pipeline, activity, source))?;
    event!(Level::DEBUG, activity = %activity.name, count = subs.len(), "Split produced sub-contexts.");

    // Sub-failures never short-circuit: every sub-context settles and the
    // rejoiner sees all outcomes, in splitter order.
    let settled: Vec<Settled<C>> = match body {
      Body::Pipeline(nested) => {
        // Each sub-context is its own top-level run of the nested pipeline
        // (its terminal runs per item), fanned out with the pool's bounded
        // concurrency and the outer hook source attached when it has none.
        fan_out(nested.as_ref(), subs, DEFAULT_MAX_CONCURRENT, env.hooks.clone()).await?
      }
      Body::Op(op) => {
        let runs = subs
          .into_iter()
          .map(|sub| {
            let op = Arc::clone(op);
            let scope = ScopeId::next();
            async move {
              let sub_cell = ContextCell::new(sub);
              let outcome = match op(sub_cell.clone()).await {
                Ok(step) => {
                  self
                    .apply_step(pipeline, activity, step, &sub_cell, env, scope)
                    .await
                }
                Err(source) => Err(activity_failure(pipeline, activity, source)),
              };
              match outcome {
                Ok(()) => match sub_cell.into_inner() {
                  Some(value) => Settled::Fulfilled(value),
                  None => Settled::rejected(SkeinError::ContextRetained),
                },
                Err(e) => Settled::rejected(e),
              }
            }
          })
          .collect::<Vec<_>>();
        join_all(runs).await
      }
    };

    let next = rejoiner(cell.clone(), settled)
      .await
      .map_err(|source| activity_failure(pipeline, activity, source))?;
    cell.replace(next);
    Ok(())
  }

  async fn eval_pred<C: Send + Sync + 'static>(
    &self,
    pipeline: &Pipeline<C>,
    activity: &ActivityDef<C>,
    cell: &ContextCell<C>,
  ) -> Result<bool, SkeinError> {
    let pred = activity.pred.as_ref().ok_or_else(|| {
      SkeinError::Internal(format!(
        "activity '{}' of kind {} has no predicate",
        activity.name, activity.kind
      ))
    })?;
    pred(cell.clone())
      .await
      .map_err(|source| activity_failure(pipeline, activity, source))
  }

  async fn hook<C: Send + Sync + 'static>(
    &self,
    env: &Env<C>,
    event: HookEvent,
    activity: &str,
    cell: &ContextCell<C>,
  ) -> Result<(), SkeinError> {
    match &env.hooks {
      Some(dispatcher) => dispatcher.call(event, activity, cell.clone()).await,
      None => Ok(()),
    }
  }
}

/// Wraps a user-callable failure with the activity name and owning pipeline
/// id. Failures of nested pipeline runs are already tagged and pass through
/// unchanged.
fn activity_failure<C: Send + Sync + 'static>(
  pipeline: &Pipeline<C>,
  activity: &ActivityDef<C>,
  source: anyhow::Error,
) -> SkeinError {
  SkeinError::ActivityFailure {
    activity: activity.name.clone(),
    pipeline: pipeline.id,
    source,
  }
}
