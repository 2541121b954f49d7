// tests/common/mod.rs
#![allow(dead_code)] // Allow unused helpers in this common test module

use skein::{ContextCell, StepValue};
use std::sync::{Arc, Mutex};
use tracing::Level;

// --- Common Context Structs ---

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CounterCtx {
  pub count: i32,
  pub items: Vec<i32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogCtx {
  pub log: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchCtx {
  pub v: i32,
  pub bad: bool,
}

// --- Shared event log for lifecycle ordering assertions ---
// Hooks like `setup`/`cleanup` do not receive a context cell, so ordering is
// observed through a captured log instead.

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, entry: impl Into<String>) {
    self.0.lock().unwrap().push(entry.into());
  }

  pub fn entries(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }

  pub fn count_of(&self, entry: &str) -> usize {
    self.0.lock().unwrap().iter().filter(|e| e.as_str() == entry).count()
  }
}

// --- Common op creators ---

/// Body that bumps `count` and records the new value in `items`.
pub fn incr_and_record(ctx: ContextCell<CounterCtx>) -> impl std::future::Future<Output = anyhow::Result<StepValue<CounterCtx>>> {
  async move {
    let mut guard = ctx.write();
    guard.count += 1;
    let count = guard.count;
    guard.items.push(count);
    drop(guard);
    Ok(StepValue::Keep)
  }
}

/// Body that appends a fixed entry to a `LogCtx`.
pub fn log_entry(
  entry: &'static str,
) -> impl Fn(ContextCell<LogCtx>) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<StepValue<LogCtx>>> + Send>>
     + Send
     + Sync
     + 'static {
  move |ctx: ContextCell<LogCtx>| {
    Box::pin(async move {
      ctx.write().log.push(entry.to_string());
      Ok(StepValue::Keep)
    })
  }
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
