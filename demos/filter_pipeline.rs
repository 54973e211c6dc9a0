//! Log filtering pipeline with branching
//!
//! Fans a stream of log lines out to two pattern matchers, then merges
//! the matching lines into a single writer on standard output.
//!
//! Usage: cargo run --example filter_pipeline --release

use sluice::{
    CancelToken, Do, Emitter, IoWriter, KillSwitch, Payload, Pipeline, PipelineLayout,
    PipelineStage, Processor, ProcessorRef, RegexpMatcher,
};
use std::sync::Arc;

const LOG_LINES: &[&str] = &[
    "INFO  service started on port 8080",
    "WARN  connection pool nearing capacity",
    "ERROR failed to persist record 4411",
    "INFO  health check passed",
    "ERROR upstream timeout after 30s",
    "DEBUG cache miss for key user:9",
    "WARN  retrying request 2/3",
    "INFO  shutting down gracefully",
];

/// Emits the embedded log lines when triggered.
struct LogSource;

impl Processor for LogSource {
    fn process_data(&self, _data: Payload, out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {
        for line in LOG_LINES {
            if !out.emit(line.as_bytes().to_vec()) {
                return;
            }
        }
    }

    fn finish(&self, _out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {}

    fn name(&self) -> &str {
        "LogSource"
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let source: ProcessorRef = Arc::new(LogSource);
    let errors: ProcessorRef = Arc::new(RegexpMatcher::new("^ERROR")?);
    let warnings: ProcessorRef = Arc::new(RegexpMatcher::new("^WARN")?);
    let writer: ProcessorRef = Arc::new(IoWriter::new(std::io::stdout()).with_newline(true));

    let layout = PipelineLayout::new(vec![
        PipelineStage::new(vec![
            Do::new(source).outputs([errors.clone(), warnings.clone()])
        ]),
        PipelineStage::new(vec![
            Do::new(errors).outputs([writer.clone()]),
            Do::new(warnings).outputs([writer.clone()]),
        ]),
        PipelineStage::new(vec![Do::new(writer)]),
    ])?;

    let cancel = CancelToken::new();
    let pipeline = Pipeline::branching(&cancel, None, layout).with_name("log-filter");

    let kill = pipeline.run()?;
    if let Ok(err) = kill.recv() {
        return Err(err.into());
    }

    println!();
    println!("{}", pipeline.stats());
    Ok(())
}
