// src/pipeline/signal.rs

//! The break signal channel shared by all nested pipeline runs of one
//! top-level execution.
//!
//! Every WHILE/UNTIL loop instance owns a scope id. A BREAK marker publishes
//! the scope id of its enclosing loop; each loop subscribes one-shot around
//! its body and reacts only to signals carrying its own id, so unrelated
//! outer loops see a foreign id and ignore it.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Identity of one loop (or body wrapper) instance within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ScopeId(u64);

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

impl ScopeId {
  pub(crate) fn next() -> Self {
    ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
  }
}

impl std::fmt::Display for ScopeId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "scope#{}", self.0)
  }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopBreak {
  pub(crate) target: ScopeId,
}

/// Per-run signal hub. Cheap to clone into nested runs; SPLIT sub-runs get a
/// fresh hub so breaks never cross a fan-out boundary.
pub(crate) struct SignalHub {
  tx: broadcast::Sender<LoopBreak>,
}

impl SignalHub {
  pub(crate) fn new() -> Self {
    let (tx, _rx) = broadcast::channel(64);
    Self { tx }
  }

  /// Publishes a break for `target`. No subscriber is not an error: the
  /// signal simply dissipates.
  pub(crate) fn emit_break(&self, target: ScopeId) {
    let _ = self.tx.send(LoopBreak { target });
  }

  pub(crate) fn subscribe(&self) -> BreakListener {
    BreakListener {
      rx: self.tx.subscribe(),
    }
  }
}

/// One-shot subscription taken around a single loop body execution.
pub(crate) struct BreakListener {
  rx: broadcast::Receiver<LoopBreak>,
}

impl BreakListener {
  /// Drains everything received since subscription; true when any signal
  /// targeted `scope`.
  pub(crate) fn fired_for(&mut self, scope: ScopeId) -> bool {
    let mut fired = false;
    loop {
      match self.rx.try_recv() {
        Ok(signal) => {
          if signal.target == scope {
            fired = true;
          }
        }
        Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
        Err(_) => break,
      }
    }
    fired
  }
}
