// demos/break_loop.rs

//! Non-local break: a WHILE loop whose body is a nested pipeline containing a
//! BREAK marker. The marker publishes a signal that the enclosing loop
//! consumes, so the loop exits long before its own predicate would flip.
//!
//! Run with: `cargo run --example break_loop`

use skein::{Builder, ContextCell, StepValue};

#[derive(Clone, Debug, Default)]
struct Drain {
  drained: u32,
  budget: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  let mut pass = Builder::<Drain>::new();
  pass
    .do_once("drain one", |ctx: ContextCell<Drain>| async move {
      ctx.write().drained += 1;
      Ok(StepValue::Keep)
    })?
    .do_break("budget exhausted", |ctx: ContextCell<Drain>| async move {
      let guard = ctx.read();
      Ok(guard.drained >= guard.budget)
    })?
    .do_once("log pass", |ctx: ContextCell<Drain>| async move {
      tracing::info!(drained = ctx.read().drained, "pass completed under budget");
      Ok(StepValue::Keep)
    })?;

  let mut outer = Builder::<Drain>::new();
  outer.do_while_pipeline(
    "drain queue",
    // The queue is "never empty": only the break marker can stop us.
    |_ctx: ContextCell<Drain>| async move { Ok(true) },
    pass,
  )?;

  let out = outer
    .build()?
    .run(Drain {
      drained: 0,
      budget: 5,
    })
    .await?;
  println!("drained {} items before the budget break", out.drained);
  Ok(())
}
