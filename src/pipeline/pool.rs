// src/pipeline/pool.rs

//! The worker pool ("piper"): feeds many independent seed contexts through
//! one pipeline with a concurrency cap and returns per-item settlements.
//!
//! Workers are cooperative futures driven together on the caller's task, one
//! logical task per worker; there is no pre-emption. Each worker atomically
//! claims the next unclaimed item and runs the full pipeline on it before
//! claiming again.

use crate::core::control::Settled;
use crate::error::SkeinError;
use crate::hooks::HookDispatcher;
use crate::pipeline::definition::Pipeline;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{event, instrument, Level};

/// Default cap on in-flight pipeline runs per `pipe` call. SPLIT's
/// nested-pipeline fan-out uses the same cap.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// The seed batch accepted by `pipe`. A bare context converts to a
/// single-item batch.
pub struct Seeds<C>(Vec<C>);

impl<C> Seeds<C> {
  pub fn into_vec(self) -> Vec<C> {
    self.0
  }
}

impl<C> From<C> for Seeds<C> {
  fn from(seed: C) -> Self {
    Seeds(vec![seed])
  }
}

impl<C> From<Vec<C>> for Seeds<C> {
  fn from(seeds: Vec<C>) -> Self {
    Seeds(seeds)
  }
}

impl<C> FromIterator<C> for Seeds<C> {
  fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
    Seeds(iter.into_iter().collect())
  }
}

/// Shared item queue: a global claim index over take-once slots.
struct ClaimQueue<C> {
  next: AtomicUsize,
  slots: Vec<Mutex<Option<C>>>,
}

impl<C> ClaimQueue<C> {
  fn new(items: Vec<C>) -> Self {
    Self {
      next: AtomicUsize::new(0),
      slots: items.into_iter().map(|item| Mutex::new(Some(item))).collect(),
    }
  }

  /// Atomically claims the next unclaimed item, together with its original
  /// index. `None` once the queue is drained.
  fn claim(&self) -> Option<(usize, C)> {
    loop {
      let index = self.next.fetch_add(1, Ordering::SeqCst);
      if index >= self.slots.len() {
        return None;
      }
      if let Some(item) = self.slots[index].lock().take() {
        return Some((index, item));
      }
    }
  }
}

/// Runs every item through `pipeline` with at most `max_concurrent` in
/// flight, settling each outcome at the item's original index.
///
/// Per-item pipeline failures settle as `Rejected` and never surface here;
/// structural errors (a malformed pipeline) abort the whole fan-out. Setup
/// and cleanup are deliberately NOT invoked on this path: `pipe` owns the
/// lifecycle, and the SPLIT fan-out belongs to an outer run whose lifecycle
/// already ran.
pub(crate) async fn fan_out<C: Send + Sync + 'static>(
  pipeline: &Pipeline<C>,
  items: Vec<C>,
  max_concurrent: usize,
  inherited_hooks: Option<Arc<HookDispatcher<C>>>,
) -> Result<Vec<Settled<C>>, SkeinError> {
  let total = items.len();
  if total == 0 {
    return Ok(Vec::new());
  }

  let worker_count = max_concurrent.max(1).min(total);
  let queue = ClaimQueue::new(items);
  let queue_ref = &queue;

  let workers = (0..worker_count)
    .map(|worker| {
      let hooks = inherited_hooks.clone();
      async move {
        let mut settled: Vec<(usize, Settled<C>)> = Vec::new();
        while let Some((index, seed)) = queue_ref.claim() {
          event!(Level::TRACE, worker, index, "Worker claimed item.");
          match pipeline.run_with(seed, hooks.clone()).await {
            Ok(ctx) => settled.push((index, Settled::Fulfilled(ctx))),
            Err(e) if e.is_structural() => {
              event!(Level::ERROR, worker, index, error = %e, "Structural pipeline error; aborting fan-out.");
              return Err(e);
            }
            Err(e) => settled.push((index, Settled::rejected(e))),
          }
        }
        Ok(settled)
      }
    })
    .collect::<Vec<_>>();

  let outcomes = join_all(workers).await;

  let mut slots: Vec<Option<Settled<C>>> = (0..total).map(|_| None).collect();
  let mut structural: Option<SkeinError> = None;
  for outcome in outcomes {
    match outcome {
      Ok(list) => {
        for (index, record) in list {
          slots[index] = Some(record);
        }
      }
      Err(e) => structural = structural.or(Some(e)),
    }
  }
  if let Some(e) = structural {
    return Err(e);
  }

  Ok(
    slots
      .into_iter()
      .map(|slot| {
        slot.unwrap_or_else(|| {
          Settled::rejected(SkeinError::Internal("worker abandoned a claimed item".into()))
        })
      })
      .collect(),
  )
}

impl<C: Send + Sync + 'static> Pipeline<C> {
  /// Feeds the seeds through the pipeline with the default concurrency cap.
  /// See [`Pipeline::pipe_bounded`].
  pub async fn pipe(&self, seeds: impl Into<Seeds<C>>) -> Result<Vec<Settled<C>>, SkeinError>
  where
    C: Clone,
  {
    self.pipe_bounded(seeds, DEFAULT_MAX_CONCURRENT).await
  }

  /// Feeds the seeds through the pipeline with at most `max_concurrent`
  /// in-flight runs, returning one settlement record per seed in input order.
  ///
  /// The hook set's `setup` runs once before any item, with a snapshot of the
  /// full seed list; its failure fails the whole call with `SetupFailure`.
  /// `cleanup` runs once after the last worker finishes, and its failure is
  /// surfaced as `CleanupFailure` even when every item succeeded. Per-item
  /// pipeline failures settle as `Rejected` records and never fail the call;
  /// structural errors do.
  #[instrument(
    name = "Pipeline::pipe",
    skip_all,
    fields(pipeline = %self.id, max_concurrent),
    err(Display)
  )]
  pub async fn pipe_bounded(
    &self,
    seeds: impl Into<Seeds<C>>,
    max_concurrent: usize,
  ) -> Result<Vec<Settled<C>>, SkeinError>
  where
    C: Clone,
  {
    let items = seeds.into().into_vec();
    event!(Level::DEBUG, pipeline = %self.id, num_items = items.len(), "pipe starting.");

    if let Some(dispatcher) = &self.hooks {
      if dispatcher.source().has_setup() {
        dispatcher
          .source()
          .run_setup(items.clone())
          .await
          .map_err(|source| SkeinError::SetupFailure { source })?;
      }
    }

    let outcome = fan_out(self, items, max_concurrent, None).await;

    // Cleanup does not begin until every worker has finished, and it runs
    // even when the fan-out failed.
    let cleanup_outcome = match &self.hooks {
      Some(dispatcher) => dispatcher.source().run_cleanup().await,
      None => Ok(()),
    };

    match (outcome, cleanup_outcome) {
      (Ok(results), Ok(())) => Ok(results),
      (Ok(_), Err(source)) => Err(SkeinError::CleanupFailure { source }),
      (Err(e), Ok(())) => Err(e),
      (Err(e), Err(cleanup_err)) => {
        event!(Level::WARN, error = %cleanup_err, "cleanup failed after a structural error; surfacing the structural error.");
        Err(e)
      }
    }
  }
}
