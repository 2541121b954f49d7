// tests/builder_tests.rs
mod common;

use common::*;
use serial_test::serial;
use skein::{
  Action, ActionHandle, Builder, ContextCell, HookModuleLoader, HookModuleOptions, HookSet,
  SkeinError, StepValue,
};
use std::path::Path;
use std::sync::Arc;

#[tokio::test]
#[serial]
async fn test_duplicate_activity_name_is_rejected() {
  setup_tracing();
  let mut builder = Builder::<CounterCtx>::new();
  builder
    .do_once("step", |_ctx: ContextCell<CounterCtx>| async move {
      Ok(StepValue::Keep)
    })
    .unwrap();

  let result = builder.do_once("step", |_ctx: ContextCell<CounterCtx>| async move {
    Ok(StepValue::Keep)
  });
  match result {
    Err(SkeinError::DuplicateActivity { activity }) => assert_eq!(activity, "step"),
    _ => panic!("Expected DuplicateActivity"),
  }
}

#[tokio::test]
#[serial]
async fn test_with_hooks_same_instance_is_idempotent() {
  setup_tracing();
  let hooks = Arc::new(HookSet::<CounterCtx>::new());

  let mut builder = Builder::<CounterCtx>::new();
  builder.with_hooks(Arc::clone(&hooks)).unwrap();
  builder.with_hooks(hooks).unwrap(); // same instance: no-op
}

#[tokio::test]
#[serial]
async fn test_with_hooks_different_instance_is_rejected() {
  setup_tracing();
  let mut builder = Builder::<CounterCtx>::new();
  builder.with_hooks(Arc::new(HookSet::new())).unwrap();

  let result = builder.with_hooks(Arc::new(HookSet::new()));
  assert!(matches!(result, Err(SkeinError::HooksAlreadyConfigured)));
}

#[tokio::test]
#[serial]
async fn test_with_hooks_and_hooks_file_are_mutually_exclusive() {
  setup_tracing();
  let mut builder = Builder::<CounterCtx>::new();
  builder.with_hooks(Arc::new(HookSet::new())).unwrap();

  let result = builder.with_hooks_file("hooks/pipeline_hooks.rs", "PipelineHooks");
  assert!(matches!(result, Err(SkeinError::HooksAlreadyConfigured)));
}

#[tokio::test]
#[serial]
async fn test_hooks_file_without_loader_fails_at_build() {
  setup_tracing();
  let mut builder = Builder::<CounterCtx>::new();
  builder
    .do_once("step", |_ctx: ContextCell<CounterCtx>| async move {
      Ok(StepValue::Keep)
    })
    .unwrap();
  builder
    .with_hooks_file("hooks/pipeline_hooks.rs", "PipelineHooks")
    .unwrap();

  let result = builder.build();
  assert!(matches!(result, Err(SkeinError::HookLoaderMissing { .. })));
}

struct RecordingLoader;

impl HookModuleLoader<LogCtx> for RecordingLoader {
  fn load(
    &self,
    path: &Path,
    export_name: &str,
    options: HookModuleOptions,
  ) -> Result<Arc<HookSet<LogCtx>>, SkeinError> {
    (options.debug)(&format!("loading {export_name} from {}", path.display()));
    assert_eq!(export_name, "PipelineHooks");
    Ok(Arc::new(HookSet::new().before("step", |ctx: ContextCell<LogCtx>| async move {
      ctx.write().log.push("loaded hook".into());
      Ok(())
    })))
  }
}

#[tokio::test]
#[serial]
async fn test_hooks_file_resolves_through_the_loader() {
  setup_tracing();
  let mut builder = Builder::<LogCtx>::new();
  builder
    .do_once("step", |ctx: ContextCell<LogCtx>| async move {
      ctx.write().log.push("body".into());
      Ok(StepValue::Keep)
    })
    .unwrap();
  builder
    .with_hooks_file("hooks/pipeline_hooks.rs", "PipelineHooks")
    .unwrap();
  builder.with_hook_loader(Arc::new(RecordingLoader));

  let out = builder.build().unwrap().run(LogCtx::default()).await.unwrap();
  assert_eq!(out.log, vec!["loaded hook", "body"]);
}

struct RegisteringAction;

impl Action<CounterCtx> for RegisteringAction {
  fn setup(&self, builder: &mut Builder<CounterCtx>) -> Result<(), SkeinError> {
    builder.do_once("from action", |ctx: ContextCell<CounterCtx>| async move {
      ctx.write().count += 7;
      Ok(StepValue::Keep)
    })?;
    Ok(())
  }
}

#[tokio::test]
#[serial]
async fn test_action_setup_runs_once_at_build() {
  setup_tracing();
  let action = ActionHandle::new(RegisteringAction);
  assert!(!action.setup_has_run());

  let mut builder = Builder::<CounterCtx>::new();
  builder.with_action(action.clone());
  let pipeline = builder.build().unwrap();
  assert!(action.setup_has_run());
  assert_eq!(pipeline.activity_names(), vec!["from action"]);

  let out = pipeline.run(CounterCtx::default()).await.unwrap();
  assert_eq!(out.count, 7);

  // A second builder sharing the tagged handle must not re-run setup.
  let mut second = Builder::<CounterCtx>::new();
  second.with_action(action);
  let second_pipeline = second.build().unwrap();
  assert!(second_pipeline.is_empty());
}

#[tokio::test]
#[serial]
async fn test_with_action_back_fills_registered_activities() {
  setup_tracing();
  struct InertAction;
  impl Action<CounterCtx> for InertAction {}

  let mut builder = Builder::<CounterCtx>::new();
  builder
    .do_once("early", |_ctx: ContextCell<CounterCtx>| async move {
      Ok(StepValue::Keep)
    })
    .unwrap();
  builder.with_action(ActionHandle::new(InertAction));
  builder
    .do_once("late", |_ctx: ContextCell<CounterCtx>| async move {
      Ok(StepValue::Keep)
    })
    .unwrap();

  let pipeline = builder.build().unwrap();
  for activity in pipeline.activities() {
    assert!(activity.parent_action().is_some(), "{} lacks its action", activity.name());
  }
}

#[tokio::test]
#[serial]
async fn test_done_last_registration_wins() {
  setup_tracing();
  let mut builder = Builder::<CounterCtx>::new();
  builder
    .do_once("noop", |_ctx: ContextCell<CounterCtx>| async move {
      Ok(StepValue::Keep)
    })
    .unwrap();
  builder.done(|settled: skein::Settled<CounterCtx>| async move {
    let mut ctx = settled.into_value().expect("fulfilled");
    ctx.count = 1;
    Ok(ctx)
  });
  builder.done(|settled: skein::Settled<CounterCtx>| async move {
    let mut ctx = settled.into_value().expect("fulfilled");
    ctx.count = 2;
    Ok(ctx)
  });

  let out = builder.build().unwrap().run(CounterCtx::default()).await.unwrap();
  assert_eq!(out.count, 2);
}

#[tokio::test]
#[serial]
async fn test_builder_tag_is_stamped_onto_the_pipeline() {
  setup_tracing();
  let mut builder = Builder::<CounterCtx>::new();
  let tag = builder.tag();
  builder
    .do_once("noop", |_ctx: ContextCell<CounterCtx>| async move {
      Ok(StepValue::Keep)
    })
    .unwrap();

  let pipeline = builder.build().unwrap();
  assert_eq!(pipeline.id(), tag);
}
