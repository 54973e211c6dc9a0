use crate::cancel::CancelToken;
use crate::error::PipelineError;
use crate::stats::NodeStats;
use crossbeam::channel::Sender;
use crossbeam::select;
use std::sync::Arc;

/// Opaque byte payload flowing through a pipeline
pub type Payload = Vec<u8>;

/// Sentinel payload fed to every root processor to kick off execution.
/// Root processors typically ignore the value.
pub const START_SIGNAL: &[u8] = b"GO";

/// Shared handle to a processor placed in a pipeline layout.
///
/// Identity is by reference: two clones of one `Arc` are the same graph
/// node, two separate `Arc`s are distinct nodes even if their contents
/// are equal.
pub type ProcessorRef = Arc<dyn Processor>;

/// A unit of work in a pipeline.
///
/// Processors run on one or more worker threads (see
/// [`concurrency`](Processor::concurrency)), so the methods take `&self`;
/// a processor that keeps mutable state owns its interior
/// synchronisation.
pub trait Processor: Send + Sync + 'static {
    /// Handle one input payload.
    ///
    /// May call [`Emitter::emit`] zero or more times to produce output,
    /// and [`KillSwitch::kill`] to abort the whole run. Emitting blocks
    /// while the output link is full; any blocking work should honour
    /// `cancel`. The payload must not be retained after return unless it
    /// is copied.
    fn process_data(&self, data: Payload, out: &Emitter, kill: &KillSwitch, cancel: &CancelToken);

    /// Called exactly once, after the input link has closed and every
    /// `process_data` call has returned. Flush buffered state or emit
    /// terminal payloads here. Not called when the run was cancelled.
    fn finish(&self, out: &Emitter, kill: &KillSwitch, cancel: &CancelToken);

    /// Number of workers draining this processor's input link.
    ///
    /// Values above 1 mean `process_data` runs concurrently from several
    /// workers at once. Defaults to a single worker.
    fn concurrency(&self) -> usize {
        1
    }

    /// Display name used in logs and the stats report
    fn name(&self) -> &str {
        "processor"
    }
}

/// Write end of a processor's output link.
///
/// Sends are counted in the owning processor's stats, block while the
/// link is full, and abort when the run is cancelled.
pub struct Emitter {
    tx: Option<Sender<Payload>>,
    stats: Arc<NodeStats>,
    cancel: CancelToken,
}

impl Emitter {
    pub(crate) fn new(
        tx: Option<Sender<Payload>>,
        stats: Arc<NodeStats>,
        cancel: CancelToken,
    ) -> Self {
        Self { tx, stats, cancel }
    }

    /// Send a payload downstream.
    ///
    /// Returns `false` if the run was cancelled or torn down before the
    /// payload could be handed off. Emissions from a processor with no
    /// successors are discarded and report `true`.
    pub fn emit(&self, payload: Payload) -> bool {
        let Some(tx) = &self.tx else {
            return true;
        };
        let bytes = payload.len();
        select! {
            send(tx, payload) -> res => {
                if res.is_ok() {
                    self.stats.record_sent(bytes);
                    true
                } else {
                    false
                }
            }
            recv(self.cancel.done()) -> _ => false,
        }
    }
}

impl Clone for Emitter {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
            cancel: self.cancel.clone(),
        }
    }
}

/// Handle used by processors and runtime tasks to abort the run.
///
/// The first reported error decides the run's outcome; reports arriving
/// after teardown has begun are dropped.
pub struct KillSwitch {
    tx: Sender<PipelineError>,
    cancel: CancelToken,
}

impl KillSwitch {
    pub(crate) fn new(tx: Sender<PipelineError>, cancel: CancelToken) -> Self {
        Self { tx, cancel }
    }

    /// Report a fatal error, aborting the pipeline
    pub fn kill(&self, err: PipelineError) {
        tracing::error!(error = %err, "pipeline kill requested");
        select! {
            send(self.tx, err) -> _ => {}
            recv(self.cancel.done()) -> _ => {}
        }
    }

    /// Abort the run if `res` is an error, otherwise yield the value
    pub fn kill_on_err<T, E: Into<PipelineError>>(
        &self,
        res: std::result::Result<T, E>,
    ) -> Option<T> {
        match res {
            Ok(value) => Some(value),
            Err(err) => {
                self.kill(err.into());
                None
            }
        }
    }
}

impl Clone for KillSwitch {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}
