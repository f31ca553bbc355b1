//! Word frequency counter adapter
//!
//! Reads lines from stdin, feeds them through a channel receiver, cleans
//! them into words, counts frequencies, and prints top-N words.
//!
//! Usage: cargo run --example word_count --release
//!        (Then type lines of text and press Ctrl-D to finish)

use parking_lot::Mutex;
use pipe_adapter::{
    AdapterBuilder, AdapterConfig, ChannelReceiver, Forward, MapStage, Message, PipeRunResult,
    PipelineBuilder, Result as StageResult, RunState, Session, Stage, StageCore, SwitchStage,
};
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::sync::Arc;

/// Stage that counts words and periodically prints the top words
struct WordCounterStage {
    core: StageCore,
    counts: Arc<Mutex<HashMap<String, usize>>>,
    batch_size: usize,
}

impl WordCounterStage {
    fn new(counts: Arc<Mutex<HashMap<String, usize>>>) -> Self {
        Self {
            core: StageCore::new("counter")
                .with_max_threads(1)
                .with_forward(Forward::new("success", "counted")),
            counts,
            batch_size: 100,
        }
    }
}

fn top_n(counts: &HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut items: Vec<_> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    items.into_iter().take(n).collect()
}

impl Stage for WordCounterStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn execute(&self, input: Message, _session: &mut Session) -> StageResult<PipeRunResult> {
        let text = input.to_string();
        let mut counts = self.counts.lock();
        let before: usize = counts.values().sum();
        let mut added = 0;
        for word in text.split_whitespace() {
            *counts.entry(word.to_string()).or_insert(0) += 1;
            added += 1;
        }

        let total = before + added;
        if before / self.batch_size != total / self.batch_size {
            println!("\n=== Top 10 Words (after {} words) ===", total);
            for (i, (word, count)) in top_n(&counts, 10).iter().enumerate() {
                println!("{:2}. {} ({})", i + 1, word, count);
            }
        }

        Ok(PipeRunResult::success(added.to_string()))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pipe_adapter::logging::init("warn");

    println!("Word Frequency Counter Adapter");
    println!("==============================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let counts = Arc::new(Mutex::new(HashMap::new()));
    let pipeline = PipelineBuilder::new()
        .add_stage(
            MapStage::new("cleaner", |msg, _| {
                let words: Vec<String> = msg
                    .to_string()
                    .split_whitespace()
                    .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase())
                    .filter(|w| w.len() > 2)
                    .collect();
                Ok(Message::from(words.join(" ")))
            })
            .with_forward(Forward::new("success", "router")),
        )
        .add_stage(SwitchStage::new("router", |msg, _| {
            if msg.is_empty() { "skipped".to_string() } else { "counter".to_string() }
        }))
        .add_stage(WordCounterStage::new(Arc::clone(&counts)))
        .exit("counted", "success")
        .exit("skipped", "skipped")
        .first_stage("cleaner")
        .build()?;

    let (receiver, sender) = ChannelReceiver::new("stdin", 2, 64);
    let adapter = AdapterBuilder::new(AdapterConfig::new("word-count"))
        .pipeline(pipeline)
        .receiver(receiver)
        .build()?;
    adapter.configure()?;
    let lifecycle = adapter.spawn()?;
    adapter.wait_for_state(RunState::Started)?;

    let mut replies = Vec::new();
    for (i, line) in io::stdin().lock().lines().enumerate() {
        let line = line?;
        replies.push(sender.request(Some(&format!("line-{i}")), line)?);
    }
    let skipped = replies
        .into_iter()
        .filter_map(|reply| reply.recv().ok())
        .filter(|result| result.state == "skipped")
        .count();

    adapter.stop();
    lifecycle.join().map_err(|_| "lifecycle thread panicked")??;

    println!("\n=== Final Top 10 Words ===");
    for (i, (word, count)) in top_n(&counts.lock(), 10).iter().enumerate() {
        println!("{:2}. {} ({})", i + 1, word, count);
    }
    println!("\nLines processed: {} ({} without words)", adapter.processed_count(), skipped);
    println!("{}", adapter.pipeline().metrics_summary());

    Ok(())
}
