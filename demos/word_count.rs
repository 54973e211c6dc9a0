//! Word frequency counter pipeline
//!
//! Splits an embedded text into words, normalizes them, counts
//! frequencies and prints the top-N words once the stream drains.
//!
//! Usage: cargo run --example word_count --release

use parking_lot::Mutex;
use sluice::{
    CancelToken, Emitter, KillSwitch, Payload, Pipeline, Processor, ProcessorRef,
};
use std::collections::HashMap;
use std::sync::Arc;

const TEXT: &str = "the quick brown fox jumps over the lazy dog
the dog barks and the fox runs away
a quick response keeps the pipeline busy
the lazy dog sleeps while the quick fox works";

/// Emits one payload per line of the input text.
struct LineSource;

impl Processor for LineSource {
    fn process_data(&self, _data: Payload, out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {
        for line in TEXT.lines() {
            if !out.emit(line.as_bytes().to_vec()) {
                return;
            }
        }
    }

    fn finish(&self, _out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {}

    fn name(&self) -> &str {
        "LineSource"
    }
}

/// Splits lines into lowercase words, dropping short ones.
struct WordSplitter;

impl Processor for WordSplitter {
    fn process_data(&self, data: Payload, out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {
        let text = String::from_utf8_lossy(&data);
        for word in text.split_whitespace() {
            let cleaned: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if cleaned.len() > 2 && !out.emit(cleaned.into_bytes()) {
                return;
            }
        }
    }

    fn finish(&self, _out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {}

    fn name(&self) -> &str {
        "WordSplitter"
    }
}

/// Counts word frequencies and prints the top-N when the stream drains.
struct WordCounter {
    counts: Mutex<HashMap<String, usize>>,
    top_n: usize,
}

impl WordCounter {
    fn new(top_n: usize) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            top_n,
        }
    }
}

impl Processor for WordCounter {
    fn process_data(&self, data: Payload, _out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {
        let word = String::from_utf8_lossy(&data).into_owned();
        *self.counts.lock().entry(word).or_insert(0) += 1;
    }

    fn finish(&self, _out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {
        let counts = self.counts.lock();
        let mut items: Vec<_> = counts.iter().collect();
        items.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        println!("=== Top {} Words ===", self.top_n);
        for (rank, (word, count)) in items.into_iter().take(self.top_n).enumerate() {
            println!("{:2}. {} ({})", rank + 1, word, count);
        }
    }

    fn name(&self) -> &str {
        "WordCounter"
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cancel = CancelToken::new();
    let pipeline = Pipeline::new(
        &cancel,
        None,
        vec![
            Arc::new(LineSource) as ProcessorRef,
            Arc::new(WordSplitter),
            Arc::new(WordCounter::new(10)),
        ],
    )?
    .with_name("word-count");

    let kill = pipeline.run()?;
    if let Ok(err) = kill.recv() {
        return Err(err.into());
    }

    println!();
    println!("{}", pipeline.stats());
    Ok(())
}
