// tests/hook_tests.rs
mod common;

use common::*;
use serial_test::serial;
use skein::{Builder, ContextCell, HookSet, SkeinError, StepValue};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn test_before_and_after_bracket_the_body_exactly_once() {
  setup_tracing();
  let hooks = Arc::new(
    HookSet::<LogCtx>::new()
      .before("fetch page", |ctx: ContextCell<LogCtx>| async move {
        ctx.write().log.push("before".into());
        Ok(())
      })
      .after("fetch page", |ctx: ContextCell<LogCtx>| async move {
        ctx.write().log.push("after".into());
        Ok(())
      }),
  );

  let mut builder = Builder::<LogCtx>::new();
  builder
    .do_once("fetch page", |ctx: ContextCell<LogCtx>| async move {
      ctx.write().log.push("body".into());
      Ok(StepValue::Keep)
    })
    .unwrap();
  builder.with_hooks(hooks).unwrap();

  let out = builder.build().unwrap().run(LogCtx::default()).await.unwrap();
  assert_eq!(out.log, vec!["before", "body", "after"]);
}

#[tokio::test]
#[serial]
async fn test_loop_activity_hooks_fire_once_not_per_iteration() {
  setup_tracing();
  #[derive(Clone, Debug, Default)]
  struct LoopLog {
    count: i32,
    log: Vec<String>,
  }

  let hooks = Arc::new(
    HookSet::<LoopLog>::new()
      .before("spin", |ctx: ContextCell<LoopLog>| async move {
        ctx.write().log.push("before".into());
        Ok(())
      })
      .after("spin", |ctx: ContextCell<LoopLog>| async move {
        ctx.write().log.push("after".into());
        Ok(())
      }),
  );

  let mut builder = Builder::<LoopLog>::new();
  builder
    .do_while(
      "spin",
      |ctx: ContextCell<LoopLog>| async move { Ok(ctx.read().count < 3) },
      |ctx: ContextCell<LoopLog>| async move {
        let mut guard = ctx.write();
        guard.count += 1;
        guard.log.push("body".into());
        Ok(StepValue::Keep)
      },
    )
    .unwrap();
  builder.with_hooks(hooks).unwrap();

  let out = builder.build().unwrap().run(LoopLog::default()).await.unwrap();
  assert_eq!(out.log, vec!["before", "body", "body", "body", "after"]);
}

#[tokio::test]
#[serial]
async fn test_after_hook_not_called_when_body_fails() {
  setup_tracing();
  let hooks = Arc::new(
    HookSet::<LogCtx>::new()
      .before("risky", |ctx: ContextCell<LogCtx>| async move {
        ctx.write().log.push("before".into());
        Ok(())
      })
      .after("risky", |ctx: ContextCell<LogCtx>| async move {
        ctx.write().log.push("after".into());
        Ok(())
      }),
  );

  let observed = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
  let observed_in_body = Arc::clone(&observed);

  let mut builder = Builder::<LogCtx>::new();
  builder
    .do_once("risky", move |ctx: ContextCell<LogCtx>| {
      let observed = Arc::clone(&observed_in_body);
      async move {
        observed.lock().unwrap().extend(ctx.read().log.clone());
        anyhow::bail!("body failed")
      }
    })
    .unwrap();
  builder.with_hooks(hooks).unwrap();

  let result = builder.build().unwrap().run(LogCtx::default()).await;
  assert!(matches!(result, Err(SkeinError::ActivityFailure { .. })));
  // The before hook had run by the time the body executed; after never did.
  assert_eq!(*observed.lock().unwrap(), vec!["before".to_string()]);
}

#[tokio::test]
#[serial]
async fn test_unknown_hook_names_are_a_no_op() {
  setup_tracing();
  let hooks = Arc::new(HookSet::<LogCtx>::new().before("some other activity", |_ctx| async move {
    anyhow::bail!("must never run")
  }));

  let mut builder = Builder::<LogCtx>::new();
  builder
    .do_once("quiet", |ctx: ContextCell<LogCtx>| async move {
      ctx.write().log.push("body".into());
      Ok(StepValue::Keep)
    })
    .unwrap();
  builder.with_hooks(hooks).unwrap();

  let out = builder.build().unwrap().run(LogCtx::default()).await.unwrap();
  assert_eq!(out.log, vec!["body"]);
}

#[tokio::test]
#[serial]
async fn test_hook_failure_is_tagged_with_event_and_activity() {
  setup_tracing();
  let hooks = Arc::new(HookSet::<LogCtx>::new().before("fetch page", |_ctx| async move {
    anyhow::bail!("hook exploded")
  }));

  let mut builder = Builder::<LogCtx>::new();
  builder
    .do_once("fetch page", |_ctx: ContextCell<LogCtx>| async move {
      Ok(StepValue::Keep)
    })
    .unwrap();
  builder.with_hooks(hooks).unwrap();

  let result = builder.build().unwrap().run(LogCtx::default()).await;
  match result {
    Err(SkeinError::HookFailure { hook, source }) => {
      assert_eq!(hook, "before$fetch page");
      assert!(source.to_string().contains("hook exploded"));
    }
    other => panic!("Expected HookFailure, got {:?}", other.map(|c| c.log)),
  }
}

#[tokio::test]
#[serial]
async fn test_hook_timeout_names_the_mangled_hook() {
  setup_tracing();
  let hooks = Arc::new(HookSet::<LogCtx>::new().before("slow call", |_ctx| async move {
    tokio::time::sleep(Duration::from_millis(250)).await;
    Ok(())
  }));

  let mut builder = Builder::<LogCtx>::new();
  builder
    .do_once("slow call", |_ctx: ContextCell<LogCtx>| async move {
      Ok(StepValue::Keep)
    })
    .unwrap();
  builder.with_hooks(hooks).unwrap();
  builder.with_hook_timeout(Duration::from_millis(50));

  let result = builder.build().unwrap().run(LogCtx::default()).await;
  match result {
    Err(SkeinError::HookTimeout { hook, timeout_ms }) => {
      assert_eq!(hook, "before$slowCall");
      assert_eq!(timeout_ms, 50);
    }
    other => panic!("Expected HookTimeout, got {:?}", other.map(|c| c.log)),
  }
}

#[tokio::test]
#[serial]
async fn test_nested_pipeline_without_hooks_inherits_outer_ones() {
  setup_tracing();
  let hooks = Arc::new(HookSet::<LogCtx>::new().before("inner work", |ctx: ContextCell<LogCtx>| async move {
    ctx.write().log.push("outer hook".into());
    Ok(())
  }));

  let mut inner = Builder::<LogCtx>::new();
  inner
    .do_once("inner work", |ctx: ContextCell<LogCtx>| async move {
      ctx.write().log.push("inner body".into());
      Ok(StepValue::Keep)
    })
    .unwrap();

  let mut outer = Builder::<LogCtx>::new();
  outer.do_once_pipeline("descend", inner).unwrap();
  outer.with_hooks(hooks).unwrap();

  let out = outer.build().unwrap().run(LogCtx::default()).await.unwrap();
  assert_eq!(out.log, vec!["outer hook", "inner body"]);
}

#[tokio::test]
#[serial]
async fn test_nested_pipeline_own_hooks_win_over_outer_ones() {
  setup_tracing();
  let outer_hooks = Arc::new(HookSet::<LogCtx>::new().before("inner work", |ctx: ContextCell<LogCtx>| async move {
    ctx.write().log.push("outer hook".into());
    Ok(())
  }));
  let inner_hooks = Arc::new(HookSet::<LogCtx>::new().before("inner work", |ctx: ContextCell<LogCtx>| async move {
    ctx.write().log.push("inner hook".into());
    Ok(())
  }));

  let mut inner = Builder::<LogCtx>::new();
  inner
    .do_once("inner work", |ctx: ContextCell<LogCtx>| async move {
      ctx.write().log.push("inner body".into());
      Ok(StepValue::Keep)
    })
    .unwrap();
  inner.with_hooks(inner_hooks).unwrap();

  let mut outer = Builder::<LogCtx>::new();
  outer.do_once_pipeline("descend", inner).unwrap();
  outer.with_hooks(outer_hooks).unwrap();

  let out = outer.build().unwrap().run(LogCtx::default()).await.unwrap();
  assert_eq!(out.log, vec!["inner hook", "inner body"]);
}
