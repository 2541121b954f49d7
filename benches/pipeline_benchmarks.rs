use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use skein::{Builder, ContextCell, Pipeline, StepValue};
use tokio::runtime::Runtime; // To run async code within Criterion

fn build_chain(len: usize) -> Pipeline<u64> {
  let mut builder = Builder::<u64>::new();
  for i in 0..len {
    builder
      .do_once(format!("step {i}"), |ctx: ContextCell<u64>| async move {
        let next = *ctx.read() + 1;
        Ok(StepValue::Replace(next))
      })
      .unwrap();
  }
  builder.build().unwrap()
}

fn bench_run_chain(c: &mut Criterion) {
  let rt = Runtime::new().unwrap();
  let mut group = c.benchmark_group("pipeline_run");

  for len in [1usize, 8, 64] {
    group.throughput(Throughput::Elements(len as u64));
    let pipeline = build_chain(len);
    group.bench_with_input(BenchmarkId::from_parameter(len), &pipeline, |b, pipeline| {
      b.iter(|| rt.block_on(async { pipeline.run(0).await.unwrap() }));
    });
  }
  group.finish();
}

fn bench_pipe_fan_out(c: &mut Criterion) {
  let rt = Runtime::new().unwrap();
  let mut group = c.benchmark_group("pipeline_pipe_64_items");
  let pipeline = build_chain(4);

  for max_concurrent in [1usize, 4, 10] {
    group.throughput(Throughput::Elements(64));
    group.bench_with_input(
      BenchmarkId::from_parameter(max_concurrent),
      &max_concurrent,
      |b, &max_concurrent| {
        b.iter(|| {
          rt.block_on(async {
            let seeds: Vec<u64> = (0..64).collect();
            pipeline.pipe_bounded(seeds, max_concurrent).await.unwrap()
          })
        });
      },
    );
  }
  group.finish();
}

criterion_group!(benches, bench_run_chain, bench_pipe_fan_out);
criterion_main!(benches);
