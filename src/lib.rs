// src/lib.rs

//! Skein: an ASYNC action-pipeline runtime for Rust.
//!
//! Skein lets you compose ordered sequences of named operations ("activities")
//! that transform a shared context value, with features like:
//!  - Six activity kinds: ONCE, WHILE, UNTIL, IF, SPLIT, BREAK, CONTINUE.
//!  - Structured control flow: pre/post loops, conditionals, parallel
//!    split/rejoin, and non-local break/continue across nested pipelines.
//!  - Pre/post hook dispatch keyed by mangled activity name
//!    (`before$camelName` / `after$camelName`), bounded by a timeout.
//!  - A terminal `done` finaliser that always runs at the top level.
//!  - A bounded cooperative worker pool (`pipe`) that feeds many seed
//!    contexts through one pipeline and settles every outcome in input order.

// Declare modules according to the planned structure
pub mod builder;
pub mod core;
pub mod error;
pub mod hooks;
pub mod pipeline;

// --- Re-exports for the Public API ---

// Core types that users interact with frequently
pub use crate::core::activity::{ActivityDef, ActivityKind, PipelineId};
pub use crate::core::context_cell::ContextCell;
pub use crate::core::control::{Settled, StepValue};

// The builder surface and the parent-action contract
pub use crate::builder::{Action, ActionHandle, Builder, NestedBody, NestedDraft};

// Hook dispatch and the hook-module contract
pub use crate::hooks::{
  HookDispatcher, HookEvent, HookModuleLoader, HookModuleOptions, HookSet, DEFAULT_HOOK_TIMEOUT,
};

// The frozen pipeline and the worker-pool surface
pub use crate::pipeline::definition::Pipeline;
pub use crate::pipeline::pool::{Seeds, DEFAULT_MAX_CONCURRENT};

pub use crate::error::{SkeinError, SkeinResult};

/*
    Core workflow:
    1. Define a context type `MyCtx` for your process.
    2. Register activities on a `Builder<MyCtx>` with the `do_*` family,
       optionally nesting other builders as loop or split bodies.
    3. Attach a `HookSet` (or a hook file plus loader), a parent action, and a
       `done` terminal as needed.
    4. `build()` freezes everything into an immutable `Pipeline<MyCtx>`.
    5. Run one seed with `pipeline.run(seed).await`, or fan a batch through
       the worker pool with `pipeline.pipe(seeds).await`.
*/
