// demos/split_and_pipe.rs

//! SPLIT fan-out plus the worker pool: a batch of jobs goes through `pipe`,
//! and each job internally splits its payload into chunks processed in
//! parallel. Hooks bracket the chunk processing and `setup`/`cleanup` frame
//! the whole batch.
//!
//! Run with: `cargo run --example split_and_pipe`

use skein::{Builder, ContextCell, HookSet, Settled, StepValue};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
struct Job {
  payload: Vec<u32>,
  checksums: Vec<u32>,
}

fn chunk(values: Vec<u32>) -> Job {
  Job {
    payload: values,
    checksums: vec![],
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  let hooks = Arc::new(
    HookSet::<Job>::new()
      .before("checksum chunks", |ctx: ContextCell<Job>| async move {
        tracing::info!(len = ctx.read().payload.len(), "about to checksum");
        Ok(())
      })
      .on_setup(|jobs: Vec<Job>| async move {
        tracing::info!(batch = jobs.len(), "batch starting");
        Ok(())
      })
      .on_cleanup(|| async move {
        tracing::info!("batch finished");
        Ok(())
      }),
  );

  let mut builder = Builder::<Job>::new();
  builder
    .do_split(
      "checksum chunks",
      |ctx: ContextCell<Job>| async move {
        // One sub-context per pair of payload values.
        Ok(
          ctx
            .read()
            .payload
            .chunks(2)
            .map(|pair| chunk(pair.to_vec()))
            .collect(),
        )
      },
      |ctx: ContextCell<Job>, settled: Vec<Settled<Job>>| async move {
        let mut job = ctx.snapshot();
        job.checksums = settled
          .into_iter()
          .filter_map(|record| record.into_value())
          .flat_map(|sub| sub.checksums)
          .collect();
        Ok(job)
      },
      |ctx: ContextCell<Job>| async move {
        let sum: u32 = ctx.read().payload.iter().sum();
        let mut sub = ctx.snapshot();
        sub.checksums = vec![sum];
        Ok(StepValue::Replace(sub))
      },
    )?;
  builder.with_hooks(hooks)?;

  let pipeline = builder.build()?;

  let batch: Vec<Job> = (0..4)
    .map(|i| chunk((0..6).map(|v| v + i * 10).collect()))
    .collect();
  let results = pipeline.pipe_bounded(batch, 2).await?;

  for (index, record) in results.iter().enumerate() {
    match record {
      Settled::Fulfilled(job) => println!("job {index}: checksums {:?}", job.checksums),
      Settled::Rejected(reason) => println!("job {index}: failed: {reason}"),
    }
  }
  Ok(())
}
