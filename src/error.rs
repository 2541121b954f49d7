// src/error.rs
use crate::core::activity::PipelineId;
use anyhow::Error as AnyhowError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkeinError {
  // --- Configuration errors (builder time) ---
  #[error("Duplicate activity name: {activity}")]
  DuplicateActivity { activity: String },

  #[error("Hook source already configured for this builder")]
  HooksAlreadyConfigured,

  #[error("Hook set configured from file '{path}' but no loader was provided")]
  HookLoaderMissing { path: PathBuf },

  #[error("Failed to load hook set from '{path}'. Source: {source}")]
  HookLoadFailure {
    path: PathBuf,
    #[source]
    source: AnyhowError,
  },

  // --- Structural errors (first encounter by the interpreter) ---
  #[error("SPLIT activity '{activity}' is missing its splitter or rejoiner")]
  SplitIncomplete { activity: String },

  #[error("Activity '{activity}' of kind {kind} has no body")]
  MissingBody { activity: String, kind: String },

  #[error("{kind} activity '{activity}' reached outside any enclosing loop in {pipeline}")]
  ControlFlowOutsideLoop {
    activity: String,
    kind: String,
    pipeline: PipelineId,
  },

  // --- Execution failures ---
  #[error("Activity '{activity}' failed in {pipeline}. Source: {source}")]
  ActivityFailure {
    activity: String,
    pipeline: PipelineId,
    #[source]
    source: AnyhowError,
  },

  #[error("Hook '{hook}' timed out after {timeout_ms}ms")]
  HookTimeout { hook: String, timeout_ms: u64 },

  #[error("Hook '{hook}' failed. Source: {source}")]
  HookFailure {
    hook: String,
    #[source]
    source: AnyhowError,
  },

  // --- Worker-pool lifecycle ---
  #[error("setup hook failed. Source: {source}")]
  SetupFailure {
    #[source]
    source: AnyhowError,
  },

  #[error("cleanup hook failed. Source: {source}")]
  CleanupFailure {
    #[source]
    source: AnyhowError,
  },

  // --- Terminal ---
  #[error("terminal callback failed{}. Source: {source}", prior_note(.prior))]
  TerminalFailure {
    #[source]
    source: AnyhowError,
    /// The activity error that preceded the terminal failure, when there was
    /// one. Causes are preserved in order: prior first, terminal second.
    prior: Option<Arc<SkeinError>>,
  },

  // --- Runtime integrity ---
  #[error("context is still shared after the run completed")]
  ContextRetained,

  #[error("Internal skein error: {0}")]
  Internal(String),
}

fn prior_note(prior: &Option<Arc<SkeinError>>) -> String {
  match prior {
    Some(p) => format!(" after activity error: {}", p),
    None => String::new(),
  }
}

impl SkeinError {
  /// Errors that indicate a malformed pipeline rather than a failing item.
  /// `pipe` re-raises these instead of settling them per item.
  pub fn is_structural(&self) -> bool {
    matches!(
      self,
      SkeinError::SplitIncomplete { .. }
        | SkeinError::MissingBody { .. }
        | SkeinError::ControlFlowOutsideLoop { .. }
        | SkeinError::Internal(_)
    )
  }
}

pub type SkeinResult<T, E = SkeinError> = std::result::Result<T, E>;
