use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pipe_adapter::{Forward, MapStage, Pipeline, PipelineBuilder};
use std::thread;
use std::time::Duration;

fn slow_pipeline(max_threads: usize) -> Pipeline {
    let mut pipeline = PipelineBuilder::new()
        .add_stage(
            MapStage::new("slow", |msg, _| {
                thread::sleep(Duration::from_micros(100));
                Ok(msg)
            })
            .with_max_threads(max_threads)
            .with_forward(Forward::new("success", "done")),
        )
        .exit("done", "success")
        .first_stage("slow")
        .build()
        .expect("Build failed");
    pipeline.configure().expect("Configure failed");
    pipeline
}

fn benchmark_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("throttled_slow_stage_8_callers");
    // 0 is unbounded
    for max_threads in [0usize, 1, 2, 4] {
        let pipeline = slow_pipeline(max_threads);
        group.bench_with_input(BenchmarkId::from_parameter(max_threads), &pipeline, |b, pipeline| {
            b.iter(|| {
                thread::scope(|scope| {
                    for _ in 0..8 {
                        scope.spawn(|| {
                            for _ in 0..25 {
                                let _ = black_box(pipeline.process(None, "x".into()));
                            }
                        });
                    }
                });
            });
        });
    }
    group.finish();
}

fn benchmark_uncontended_guard(c: &mut Criterion) {
    let mut pipeline = PipelineBuilder::new()
        .add_stage(MapStage::new("fast", |msg, _| Ok(msg)).with_max_threads(1).with_forward(Forward::new("success", "done")))
        .exit("done", "success")
        .first_stage("fast")
        .build()
        .expect("Build failed");
    pipeline.configure().expect("Configure failed");

    c.bench_function("uncontended_bounded_stage", |b| {
        b.iter(|| black_box(pipeline.process(Some("id"), "x".into())));
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_contention, benchmark_uncontended_guard
);
criterion_main!(benches);
