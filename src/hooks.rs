// src/hooks.rs

//! Hook dispatch: name mangling, the per-source dispatch table, and the
//! timeout-bounded dispatcher.
//!
//! A [`HookSet`] is the Rust rendition of a "hook object": a dispatch table
//! built once, mapping mangled hook keys (`before$camelName`,
//! `after$camelName`) to async callables. Registration mangles the activity
//! name; lookup of an absent key is a no-op, so defining only the hooks you
//! care about keeps the "just define a method" ergonomics of the surface.

use crate::core::activity::BoxFut;
use crate::core::context_cell::ContextCell;
use crate::error::SkeinError;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{event, Level};

/// Default wall-clock bound for a single `before`/`after` hook call.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_millis(1_000);

/// The two per-activity hook events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
  Before,
  After,
}

impl HookEvent {
  fn as_str(self) -> &'static str {
    match self {
      HookEvent::Before => "before",
      HookEvent::After => "after",
    }
  }
}

/// Lower-cases the activity name, splits on whitespace, strips non-word
/// characters per word, and camel-cases the remainder: `"Fetch page!"` →
/// `"fetchPage"`.
pub fn camel_name(activity: &str) -> String {
  let lower = activity.to_lowercase();
  let mut out = String::new();
  let mut emitted = 0usize;
  for word in lower.split_whitespace() {
    let stripped: String = word.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect();
    if stripped.is_empty() {
      continue;
    }
    if emitted == 0 {
      out.push_str(&stripped);
    } else {
      let mut chars = stripped.chars();
      if let Some(head) = chars.next() {
        out.extend(head.to_uppercase());
        out.push_str(chars.as_str());
      }
    }
    emitted += 1;
  }
  out
}

/// The mangled dispatch key for an activity hook: `"{event}${camelName}"`.
pub fn hook_key(event: HookEvent, activity: &str) -> String {
  format!("{}${}", event.as_str(), camel_name(activity))
}

type HookFn<C> = Arc<dyn Fn(ContextCell<C>) -> BoxFut<anyhow::Result<()>> + Send + Sync>;
type SetupFn<C> = Arc<dyn Fn(Vec<C>) -> BoxFut<anyhow::Result<()>> + Send + Sync>;
type CleanupFn = Arc<dyn Fn() -> BoxFut<anyhow::Result<()>> + Send + Sync>;

/// A dispatch table of hooks for one pipeline.
///
/// `setup` and `cleanup` are special names, not prefixed; they run once at
/// pipeline boundaries (scheduled by the worker pool), not per activity.
pub struct HookSet<C: Send + Sync + 'static> {
  entries: HashMap<String, HookFn<C>>,
  setup: Option<SetupFn<C>>,
  cleanup: Option<CleanupFn>,
}

impl<C: Send + Sync + 'static> HookSet<C> {
  pub fn new() -> Self {
    Self {
      entries: HashMap::new(),
      setup: None,
      cleanup: None,
    }
  }

  /// Registers a hook to run immediately before the named activity's body.
  pub fn before<F, Fut>(self, activity: &str, hook: F) -> Self
  where
    F: Fn(ContextCell<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    self.entry(hook_key(HookEvent::Before, activity), hook)
  }

  /// Registers a hook to run immediately after the named activity's body
  /// completes successfully.
  pub fn after<F, Fut>(self, activity: &str, hook: F) -> Self
  where
    F: Fn(ContextCell<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    self.entry(hook_key(HookEvent::After, activity), hook)
  }

  fn entry<F, Fut>(mut self, key: String, hook: F) -> Self
  where
    F: Fn(ContextCell<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    self.entries.insert(key, Arc::new(move |ctx| Box::pin(hook(ctx))));
    self
  }

  /// Registers the `setup` lifecycle hook. It receives a snapshot of the full
  /// seed list before any item begins.
  pub fn on_setup<F, Fut>(mut self, hook: F) -> Self
  where
    F: Fn(Vec<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    self.setup = Some(Arc::new(move |seeds| Box::pin(hook(seeds))));
    self
  }

  /// Registers the `cleanup` lifecycle hook, run once after the last worker
  /// has finished.
  pub fn on_cleanup<F, Fut>(mut self, hook: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    self.cleanup = Some(Arc::new(move || Box::pin(hook())));
    self
  }

  /// Schedules the `setup` lifecycle hook with the full seed list. A missing
  /// hook is a no-op.
  pub async fn run_setup(&self, seeds: Vec<C>) -> anyhow::Result<()> {
    match &self.setup {
      Some(setup) => setup(seeds).await,
      None => Ok(()),
    }
  }

  /// Schedules the `cleanup` lifecycle hook. A missing hook is a no-op.
  pub async fn run_cleanup(&self) -> anyhow::Result<()> {
    match &self.cleanup {
      Some(cleanup) => cleanup().await,
      None => Ok(()),
    }
  }

  pub fn has_setup(&self) -> bool {
    self.setup.is_some()
  }

  pub fn has_cleanup(&self) -> bool {
    self.cleanup.is_some()
  }
}

impl<C: Send + Sync + 'static> Default for HookSet<C> {
  fn default() -> Self {
    Self::new()
  }
}

impl<C: Send + Sync + 'static> std::fmt::Debug for HookSet<C> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
    keys.sort_unstable();
    f.debug_struct("HookSet")
      .field("entries", &keys)
      .field("setup", &self.setup.is_some())
      .field("cleanup", &self.cleanup.is_some())
      .finish()
  }
}

/// Invokes activity hooks from a [`HookSet`] with a wall-clock timeout.
pub struct HookDispatcher<C: Send + Sync + 'static> {
  source: Arc<HookSet<C>>,
  timeout: Duration,
}

impl<C: Send + Sync + 'static> HookDispatcher<C> {
  pub fn new(source: Arc<HookSet<C>>, timeout: Duration) -> Self {
    Self { source, timeout }
  }

  /// The underlying hook set, so callers can schedule its `setup`/`cleanup`.
  pub fn source(&self) -> &Arc<HookSet<C>> {
    &self.source
  }

  /// Dispatches one activity hook.
  ///
  /// Absent hooks return immediately with no effect. A present hook is
  /// spawned and raced against the timeout; on timeout the task is left
  /// running detached and its eventual result is discarded.
  pub async fn call(
    &self,
    event: HookEvent,
    activity: &str,
    ctx: ContextCell<C>,
  ) -> Result<(), SkeinError> {
    let key = hook_key(event, activity);
    let Some(hook) = self.source.entries.get(&key) else {
      return Ok(());
    };

    event!(Level::TRACE, hook = %key, "Dispatching activity hook.");
    let fut = hook(ctx);
    let handle = tokio::spawn(fut);
    match tokio::time::timeout(self.timeout, handle).await {
      Ok(Ok(Ok(()))) => Ok(()),
      Ok(Ok(Err(cause))) => Err(SkeinError::HookFailure {
        hook: format!("{}${}", event.as_str(), activity),
        source: cause,
      }),
      Ok(Err(join_err)) => Err(SkeinError::HookFailure {
        hook: format!("{}${}", event.as_str(), activity),
        source: anyhow::anyhow!("hook task failed: {join_err}"),
      }),
      Err(_elapsed) => {
        event!(Level::WARN, hook = %key, timeout_ms = self.timeout.as_millis() as u64, "Hook timed out; detaching.");
        Err(SkeinError::HookTimeout {
          hook: key,
          timeout_ms: self.timeout.as_millis() as u64,
        })
      }
    }
  }
}

impl<C: Send + Sync + 'static> std::fmt::Debug for HookDispatcher<C> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HookDispatcher")
      .field("timeout", &self.timeout)
      .field("source", &self.source)
      .finish()
  }
}

/// Construction options handed to a hook module. Carries at least a `debug`
/// callable; loaders ignore fields they do not understand.
#[derive(Clone)]
pub struct HookModuleOptions {
  pub debug: Arc<dyn Fn(&str) + Send + Sync>,
}

impl Default for HookModuleOptions {
  fn default() -> Self {
    Self {
      debug: Arc::new(|msg: &str| tracing::debug!(target: "skein::hooks", "{msg}")),
    }
  }
}

impl std::fmt::Debug for HookModuleOptions {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HookModuleOptions").finish_non_exhaustive()
  }
}

/// Resolves a `(path, export name)` pair to a constructed [`HookSet`].
///
/// The loading mechanism itself (dynamic libraries, embedded scripts, a test
/// registry) is an external collaborator; the builder only consumes this
/// interface when a hook file was configured.
pub trait HookModuleLoader<C: Send + Sync + 'static>: Send + Sync {
  fn load(
    &self,
    path: &Path,
    export_name: &str,
    options: HookModuleOptions,
  ) -> Result<Arc<HookSet<C>>, SkeinError>;
}

/// How the hook source was configured on a builder.
pub(crate) enum HooksConfig<C: Send + Sync + 'static> {
  Inline(Arc<HookSet<C>>),
  File { path: PathBuf, export_name: String },
}
