pub mod activity;
pub mod context_cell;
pub mod control;

// Re-export key types for easier access from other modules (and lib.rs)
pub use activity::{ActivityDef, ActivityKind, Body, BoxFut, PipelineId};
pub use context_cell::ContextCell;
pub use control::{Settled, StepValue};
