use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipe_adapter::{
    Adapter, AdapterBuilder, AdapterConfig, EchoStage, Forward, PipelineBuilder, RunState,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn chain_adapter(stages: usize) -> Arc<Adapter> {
    let mut builder = PipelineBuilder::new();
    for i in 0..stages {
        let next = if i + 1 == stages { "done".to_string() } else { format!("stage{}", i + 1) };
        builder = builder.add_stage(EchoStage::new(format!("stage{i}")).with_forward(Forward::new("success", next)));
    }
    let pipeline = builder
        .exit("done", "success")
        .first_stage("stage0")
        .build()
        .expect("Build failed");
    let adapter = AdapterBuilder::new(AdapterConfig::new("bench"))
        .pipeline(pipeline)
        .build()
        .expect("Build failed");
    adapter.configure().expect("Configure failed");
    adapter
}

fn bench_adapter(c: &mut Criterion, name: &str, stages: usize, callers: usize, messages: usize) {
    let adapter = chain_adapter(stages);
    let lifecycle = adapter.spawn().expect("Spawn failed");
    adapter.wait_for_state(RunState::Started).expect("Interrupted");
    let payload = "x".repeat(64);

    c.bench_function(name, |b| {
        b.iter(|| {
            thread::scope(|scope| {
                for _ in 0..callers {
                    scope.spawn(|| {
                        for _ in 0..messages / callers {
                            let result = adapter.process_message(None, black_box(payload.as_str()));
                            black_box(result);
                        }
                    });
                }
            });
        });
    });

    adapter.stop();
    let _ = lifecycle.join();
}

fn benchmark_single_stage_throughput(c: &mut Criterion) {
    bench_adapter(c, "single_stage_1000_msgs", 1, 1, 1000);
}

fn benchmark_three_stage_throughput(c: &mut Criterion) {
    bench_adapter(c, "three_stage_1000_msgs", 3, 1, 1000);
}

fn benchmark_concurrent_callers(c: &mut Criterion) {
    bench_adapter(c, "three_stage_4_callers_4000_msgs", 3, 4, 4000);
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_single_stage_throughput, benchmark_three_stage_throughput, benchmark_concurrent_callers
);
criterion_main!(benches);
