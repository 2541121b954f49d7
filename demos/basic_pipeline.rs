// demos/basic_pipeline.rs

//! A minimal pipeline: two ONCE activities and a WHILE loop over a counter
//! context, finished by a `done` terminal.
//!
//! Run with: `cargo run --example basic_pipeline`

use skein::{Builder, ContextCell, Settled, StepValue};
use tracing::info;

#[derive(Clone, Debug, Default)]
struct Report {
  pages: u32,
  fetched: Vec<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  let mut builder = Builder::<Report>::new();
  builder
    .do_once("plan", |ctx: ContextCell<Report>| async move {
      ctx.write().pages = 3;
      Ok(StepValue::Keep)
    })?
    .do_while(
      "fetch pages",
      |ctx: ContextCell<Report>| async move {
        let guard = ctx.read();
        Ok((guard.fetched.len() as u32) < guard.pages)
      },
      |ctx: ContextCell<Report>| async move {
        let mut guard = ctx.write();
        let next = guard.fetched.len() as u32 + 1;
        guard.fetched.push(next);
        Ok(StepValue::Keep)
      },
    )?
    .do_once("summarise", |ctx: ContextCell<Report>| async move {
      info!(fetched = ?ctx.read().fetched, "all pages fetched");
      Ok(StepValue::Keep)
    })?;

  builder.done(|settled: Settled<Report>| async move {
    match settled {
      Settled::Fulfilled(report) => {
        info!(pages = report.pages, "pipeline finished");
        Ok(report)
      }
      Settled::Rejected(reason) => Err(anyhow::anyhow!("run failed: {reason}")),
    }
  });

  let report = builder.build()?.run(Report::default()).await?;
  println!("fetched pages: {:?}", report.fetched);
  Ok(())
}
