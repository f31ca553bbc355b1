//! Number routing pipeline demonstrating forwards, exits and error results
//!
//! Pipeline:
//! 1. parse: Parse the message as a number (fails on anything else)
//! 2. classify: Forward to `even` or `odd`
//! 3. even: Multiply by 10, then exit `done`
//! 4. odd: Exit `rejected` unchanged
//!
//! Usage: cargo run --example switch_pipeline --release

use pipe_adapter::{
    AdapterBuilder, AdapterConfig, Forward, MapStage, Message, PipelineBuilder, RunState,
    StageError, SwitchStage,
};
use std::collections::BTreeMap;
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pipe_adapter::logging::init("warn");

    println!("Number Routing Pipeline");
    println!("=======================");

    let pipeline = PipelineBuilder::new()
        .add_stage(
            MapStage::new("parse", |msg, session| {
                let n: i64 = msg
                    .to_string()
                    .trim()
                    .parse()
                    .map_err(|e| StageError::unattributed(format!("[{}] is not a number", msg)).with_source(e))?;
                session.put("number", n.to_string());
                Ok(Message::from(n.to_string()))
            })
            .with_forward(Forward::new("success", "classify")),
        )
        .add_stage(SwitchStage::new("classify", |_, session| {
            let n: i64 = session
                .get_string("number")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            if n % 2 == 0 { "even".to_string() } else { "odd".to_string() }
        }))
        .add_stage(
            MapStage::new("even", |msg, _| {
                let n: i64 = msg.to_string().parse().map_err(|e| StageError::unattributed("lost the number").with_source(e))?;
                Ok(Message::from((n * 10).to_string()))
            })
            .with_max_threads(2)
            .with_forward(Forward::new("success", "done")),
        )
        .add_stage(SwitchStage::new("odd", |_, _| "rejected".to_string()))
        .exit("done", "success")
        .exit("rejected", "rejected")
        .first_stage("parse")
        .build()?;

    let adapter = AdapterBuilder::new(AdapterConfig::new("numbers").with_error_state("failed"))
        .pipeline(pipeline)
        .build()?;
    adapter.configure()?;
    let lifecycle = adapter.spawn()?;
    adapter.wait_for_state(RunState::Started)?;

    let start = Instant::now();
    let mut by_state: BTreeMap<String, usize> = BTreeMap::new();
    let inputs: Vec<String> = (1..=100)
        .map(|i| if i % 25 == 0 { format!("n{i}") } else { i.to_string() })
        .collect();
    for (i, input) in inputs.iter().enumerate() {
        let result = adapter.process_message(Some(&format!("msg-{i}")), input.as_str());
        if result.state == "failed" && i < 30 {
            println!("Error result for [{}]:\n{}\n", input, result.result);
        }
        *by_state.entry(result.state).or_default() += 1;
    }
    let elapsed = start.elapsed();

    adapter.stop();
    lifecycle.join().map_err(|_| "lifecycle thread panicked")??;

    println!("Results by exit state:");
    for (state, count) in &by_state {
        println!("  {state:>10}: {count}");
    }
    println!();
    println!("Processed {} messages in {:.2?} ({} in error)", adapter.processed_count(), elapsed, adapter.error_count());
    println!("{}", adapter.pipeline().metrics_summary());

    println!("Operational log:");
    for entry in adapter.operational_log() {
        println!("  {entry}");
    }

    Ok(())
}
