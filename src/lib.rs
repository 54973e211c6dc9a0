//! A branching stream-processing pipeline runtime.
//!
//! This crate runs directed acyclic graphs of processors through which
//! opaque byte payloads flow, stage by stage, concurrently. It manages
//! the stage wiring, fan-out duplication, fan-in merging, bounded
//! buffering with backpressure, cancellation-driven shutdown and
//! aggregate throughput reporting. Processor implementations supply the
//! actual work.
//!
//! # Features
//!
//! - Validated DAG layouts with a fluent builder for branching and
//!   merging between stages
//! - Bounded FIFO links: a slow consumer throttles its producers instead
//!   of dropping payloads
//! - Per-processor worker pools driven by a concurrency hint
//! - Ordered fan-out to every successor, fan-in that terminates only
//!   when all producers have finished
//! - A kill channel for aborting a run from any processor, racing a
//!   cooperative cancellation token
//! - Per-processor counters aggregated into a human-readable report
//!
//! # Example
//!
//! ```ignore
//! use sluice::{CancelToken, Pipeline, ProcessorRef};
//! use std::sync::Arc;
//!
//! let cancel = CancelToken::new();
//! let pipeline = Pipeline::new(&cancel, None, vec![
//!     Arc::new(reader) as ProcessorRef,
//!     Arc::new(transformer),
//!     Arc::new(writer),
//! ])?;
//!
//! let kill = pipeline.run()?;
//! match kill.recv() {
//!     Ok(err) => eprintln!("run failed: {err}"),
//!     Err(_) => println!("{}", pipeline.stats()),
//! }
//! ```

pub mod cancel;
pub mod error;
pub mod layout;
pub mod pipeline;
pub mod processor;
pub mod processors;
pub mod stats;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use error::{PipelineError, Result};
pub use layout::{Do, PipelineLayout, PipelineStage};
pub use pipeline::{OnComplete, Pipeline, DEFAULT_BUFFER_LENGTH};
pub use processor::{Emitter, KillSwitch, Payload, Processor, ProcessorRef, START_SIGNAL};
pub use processors::{FileReader, IoWriter, RegexpMatcher};
pub use stats::{NodeStats, StatsSnapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
