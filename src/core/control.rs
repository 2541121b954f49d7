// src/core/control.rs

//! Body outcomes and settlement records.

use crate::builder::Builder;
use crate::error::SkeinError;
use std::sync::Arc;

/// What a body operation yields for the rest of the run.
pub enum StepValue<C: Send + Sync + 'static> {
  /// Retain the previous context (in-place mutation through the cell is still
  /// visible).
  Keep,
  /// Replace the context with this value.
  Replace(C),
  /// Build the returned pipeline and run it on the current context. This is
  /// the stable type marker for the "body returns a pipeline" form.
  Nested(Builder<C>),
}

impl<C: Send + Sync + 'static> std::fmt::Debug for StepValue<C> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StepValue::Keep => f.write_str("StepValue::Keep"),
      StepValue::Replace(_) => f.write_str("StepValue::Replace(..)"),
      StepValue::Nested(_) => f.write_str("StepValue::Nested(..)"),
    }
  }
}

/// Per-item outcome carrying either a value or a failure reason.
///
/// Returned by `pipe` (one record per seed, in input order) and passed to
/// SPLIT rejoiners (one record per sub-context, in splitter order). The reason
/// is reference-counted so a terminal compound error can retain the prior
/// cause after the record has been consumed.
#[derive(Debug)]
pub enum Settled<C> {
  Fulfilled(C),
  Rejected(Arc<SkeinError>),
}

impl<C> Settled<C> {
  pub fn fulfilled(value: C) -> Self {
    Settled::Fulfilled(value)
  }

  pub fn rejected(reason: SkeinError) -> Self {
    Settled::Rejected(Arc::new(reason))
  }

  pub fn is_fulfilled(&self) -> bool {
    matches!(self, Settled::Fulfilled(_))
  }

  pub fn is_rejected(&self) -> bool {
    matches!(self, Settled::Rejected(_))
  }

  /// The settled value, if fulfilled.
  pub fn value(&self) -> Option<&C> {
    match self {
      Settled::Fulfilled(value) => Some(value),
      Settled::Rejected(_) => None,
    }
  }

  /// The settled value, if fulfilled.
  pub fn into_value(self) -> Option<C> {
    match self {
      Settled::Fulfilled(value) => Some(value),
      Settled::Rejected(_) => None,
    }
  }

  /// The failure reason, if rejected.
  pub fn reason(&self) -> Option<&SkeinError> {
    match self {
      Settled::Fulfilled(_) => None,
      Settled::Rejected(reason) => Some(reason),
    }
  }
}
