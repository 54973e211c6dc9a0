use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};
use crate::layout::{Do, PipelineLayout, PipelineStage};
use crate::processor::{Emitter, KillSwitch, Payload, ProcessorRef, START_SIGNAL};
use crate::stats::{NodeStats, Timer};
use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Caller-supplied completion callback, invoked exactly once per pipeline
pub type OnComplete = Box<dyn FnOnce() + Send>;

/// Default capacity of every link between processors
pub const DEFAULT_BUFFER_LENGTH: usize = 8;

/// A runnable stream-processing pipeline over a validated layout.
///
/// `run` wires bounded links between adjacent stages, spawns the workers,
/// seeds the roots with the start signal and returns the kill channel.
/// Receiving an error from it means the run failed or was cancelled; the
/// channel disconnecting without a value means success. The channel
/// closes exactly once either way.
pub struct Pipeline {
    layout: PipelineLayout,
    name: String,
    buffer_length: usize,
    print_data: bool,
    cancel: CancelToken,
    on_complete: Arc<Mutex<Option<OnComplete>>>,
    timer: Mutex<Option<Arc<Timer>>>,
    started: AtomicBool,
}

impl Pipeline {
    /// Create a linear pipeline: one stage per processor, each feeding
    /// the next.
    ///
    /// The run is bound to a token derived from `parent`, so cancelling
    /// `parent` aborts the run. `on_complete` fires exactly once when the
    /// run reaches a terminal state.
    pub fn new(
        parent: &CancelToken,
        on_complete: Option<OnComplete>,
        processors: Vec<ProcessorRef>,
    ) -> Result<Self> {
        let mut stages = Vec::with_capacity(processors.len());
        for (i, processor) in processors.iter().enumerate() {
            let mut step = Do::new(processor.clone());
            if let Some(next) = processors.get(i + 1) {
                step = step.outputs([next.clone()]);
            }
            stages.push(PipelineStage::new(vec![step]));
        }
        let layout = PipelineLayout::new(stages)?;
        Ok(Self::branching(parent, on_complete, layout))
    }

    /// Create a pipeline over an arbitrary validated DAG layout
    pub fn branching(
        parent: &CancelToken,
        on_complete: Option<OnComplete>,
        layout: PipelineLayout,
    ) -> Self {
        Self {
            layout,
            name: "Pipeline".to_string(),
            buffer_length: DEFAULT_BUFFER_LENGTH,
            print_data: false,
            cancel: parent.child(),
            on_complete: Arc::new(Mutex::new(on_complete)),
            timer: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Set the display label used in logs and the stats report
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the capacity of every link (minimum 1, default 8)
    pub fn with_buffer_length(mut self, length: usize) -> Self {
        self.buffer_length = length.max(1);
        self
    }

    /// Log full payload bytes at debug level as they move between stages
    pub fn with_print_data(mut self, enabled: bool) -> Self {
        self.print_data = enabled;
        self
    }

    /// Wire the stage fabric and kick off execution.
    ///
    /// Returns the kill channel the caller should wait on. A received
    /// error is the run's failure or cancellation reason; the channel
    /// disconnecting without a value signals success. The pipeline can
    /// run once.
    pub fn run(&self) -> Result<Receiver<PipelineError>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyStarted);
        }

        let timer = Arc::new(Timer::start());
        *self.timer.lock() = Some(Arc::clone(&timer));

        let (kill_out_tx, kill_out_rx) = bounded::<PipelineError>(1);
        let (kill_tx, kill_rx) = bounded::<PipelineError>(1);

        tracing::debug!(pipeline = %self.name, "connecting stages");
        let mut wiring = self.connect_stages();

        tracing::debug!(pipeline = %self.name, "starting workers");
        let terminators = self.run_stages(&mut wiring, &kill_tx);
        drop(kill_tx);

        // Completion watcher: every terminator done means every worker
        // has drained and every finish has run.
        let (done_tx, done_rx) = bounded::<()>(0);
        let watcher_timer = Arc::clone(&timer);
        thread::spawn(move || {
            for handle in terminators {
                let _ = handle.join();
            }
            watcher_timer.stop();
            drop(done_tx);
        });

        // Arbiter: first of {kill report, completion, cancellation}
        // decides the outcome and delivers it on the kill channel.
        let cancel = self.cancel.clone();
        let on_complete = Arc::clone(&self.on_complete);
        let name = self.name.clone();
        thread::spawn(move || {
            // A token fired before the run started always wins; without
            // this check a short pipeline could drain before the
            // cancellation is observed.
            if cancel.is_cancelled() {
                let reason = cancel.reason();
                tracing::warn!(pipeline = %name, reason = %reason, "pipeline cancelled");
                let _ = kill_out_tx.send(reason);
                drop(kill_out_tx);
                if let Some(callback) = on_complete.lock().take() {
                    callback();
                }
                return;
            }
            select! {
                recv(kill_rx) -> msg => match msg {
                    Ok(err) => {
                        tracing::error!(pipeline = %name, error = %err, "pipeline failed");
                        cancel.cancel_with(err.clone());
                        let _ = kill_out_tx.send(err);
                    }
                    // Every reporter handle dropped: the run drained
                    // cleanly; wait for the watcher to stop the timer.
                    Err(_) => {
                        let _ = done_rx.recv();
                        tracing::info!(pipeline = %name, "pipeline completed");
                    }
                },
                recv(done_rx) -> _ => {
                    // A kill reported on the very last payload can leave
                    // both arms ready; the error must win the race.
                    if let Ok(err) = kill_rx.try_recv() {
                        tracing::error!(pipeline = %name, error = %err, "pipeline failed");
                        cancel.cancel_with(err.clone());
                        let _ = kill_out_tx.send(err);
                    } else {
                        tracing::info!(pipeline = %name, "pipeline completed");
                    }
                }
                recv(cancel.done()) -> _ => {
                    let reason = cancel.reason();
                    tracing::warn!(pipeline = %name, reason = %reason, "pipeline cancelled");
                    let _ = kill_out_tx.send(reason);
                }
            }
            // Releases stragglers blocked on link sends and the token's
            // helper thread; a no-op if the token already fired.
            cancel.cancel();
            drop(kill_out_tx);
            if let Some(callback) = on_complete.lock().take() {
                callback();
            }
        });

        Ok(kill_out_rx)
    }

    /// Run the completion callback if it has not run yet.
    ///
    /// A safety valve for callers that abandon a pipeline without calling
    /// `run`; calling both is a caller error, but the callback still
    /// fires at most once.
    pub fn cleanup(&self) {
        if !self.started.load(Ordering::SeqCst) {
            // Never ran: fire the run token so its propagation helper
            // thread can exit.
            self.cancel.cancel();
        }
        if let Some(callback) = self.on_complete.lock().take() {
            callback();
        }
    }

    /// Human-readable report of the counters gathered for every
    /// processor, stage by stage. Stable once the run has reached a
    /// terminal state.
    pub fn stats(&self) -> String {
        let mut out = match &*self.timer.lock() {
            Some(timer) => format!("{}: {}\n", self.name, timer),
            None => format!("{}: not started\n", self.name),
        };
        for (stage_idx, nodes) in self.layout.stages.iter().enumerate() {
            out.push_str(&format!("Stage {})\n", stage_idx + 1));
            for node in nodes {
                let snap = node.stats.snapshot();
                out.push_str(&format!("  * {}\n", node.processor.name()));
                out.push_str(&format!(
                    "     - Total/Avg Execution Time = {:.6}/{:.6}s\n",
                    snap.total_execution_time, snap.avg_execution_time
                ));
                out.push_str(&format!(
                    "     - Payloads Sent/Received = {}/{}\n",
                    snap.payloads_sent, snap.payloads_received
                ));
                out.push_str(&format!(
                    "     - Total/Avg Bytes Sent = {}/{}\n",
                    snap.total_bytes_sent, snap.avg_bytes_sent
                ));
                out.push_str(&format!(
                    "     - Total/Avg Bytes Received = {}/{}\n",
                    snap.total_bytes_received, snap.avg_bytes_received
                ));
            }
        }
        out
    }

    /// Materialise every link and spawn the branch-out/merge-in adapters.
    ///
    /// Each edge gets its own bounded link; a producing node writes to a
    /// single output link fanned out to its branches in declaration
    /// order, and a consuming node reads a single input link fed by one
    /// forwarder per incoming branch. Roots get a capacity-1 input link
    /// seeded with the start signal and closed immediately.
    fn connect_stages(&self) -> Vec<NodeWiring> {
        let nodes: Vec<_> = self.layout.nodes().collect();
        let mut wiring: Vec<NodeWiring> = (0..nodes.len()).map(|_| NodeWiring::default()).collect();

        let mut predecessors = vec![0usize; nodes.len()];
        for (_, node) in &nodes {
            for &succ in &node.successors {
                predecessors[succ] += 1;
            }
        }

        // Output links and per-edge branch links.
        for (idx, (_, node)) in nodes.iter().enumerate() {
            if node.successors.is_empty() {
                continue;
            }
            let (out_tx, out_rx) = bounded(self.buffer_length);
            wiring[idx].output_tx = Some(out_tx);
            wiring[idx].output_rx = Some(out_rx);
            for &succ in &node.successors {
                let (branch_tx, branch_rx) = bounded(self.buffer_length);
                wiring[idx].branch_txs.push(branch_tx);
                wiring[succ].merge_rxs.push(branch_rx);
            }
        }

        // Input links. Nodes without predecessors are roots: their link
        // holds exactly the start signal and is already closed.
        for (idx, preds) in predecessors.iter().enumerate() {
            if *preds > 0 {
                let (in_tx, in_rx) = bounded(self.buffer_length);
                wiring[idx].input_tx = Some(in_tx);
                wiring[idx].input_rx = Some(in_rx);
            } else {
                let (in_tx, in_rx) = bounded(1);
                in_tx
                    .send(START_SIGNAL.to_vec())
                    .expect("seeding an empty capacity-1 link cannot fail");
                wiring[idx].input_rx = Some(in_rx);
            }
        }

        // Branch-out adapters.
        for slot in wiring.iter_mut() {
            if let Some(out_rx) = slot.output_rx.take() {
                let branches = std::mem::take(&mut slot.branch_txs);
                let cancel = self.cancel.clone();
                thread::spawn(move || branch_out(out_rx, branches, cancel));
            }
        }

        // Merge-in forwarders. The input link closes when the last
        // forwarder drops its sender clone.
        for slot in wiring.iter_mut() {
            if let Some(in_tx) = slot.input_tx.take() {
                for branch_rx in std::mem::take(&mut slot.merge_rxs) {
                    let merged = in_tx.clone();
                    let cancel = self.cancel.clone();
                    thread::spawn(move || merge_in(branch_rx, merged, cancel));
                }
            }
        }

        wiring
    }

    /// Spawn the worker pool and terminator for every node.
    ///
    /// The terminator joins the node's workers, runs `finish` exactly
    /// once and, holding the last sender, closes the output link by
    /// dropping it.
    fn run_stages(
        &self,
        wiring: &mut [NodeWiring],
        kill_tx: &Sender<PipelineError>,
    ) -> Vec<thread::JoinHandle<()>> {
        let mut terminators = Vec::new();

        for (idx, (stage_idx, node)) in self.layout.nodes().enumerate() {
            let input_rx = wiring[idx]
                .input_rx
                .take()
                .expect("every node has an input link after wiring");
            let output_tx = wiring[idx].output_tx.take();

            let mut workers = Vec::with_capacity(node.concurrency);
            for _ in 0..node.concurrency {
                let ctx = WorkerContext {
                    processor: node.processor.clone(),
                    input: input_rx.clone(),
                    emitter: Emitter::new(
                        output_tx.clone(),
                        Arc::clone(&node.stats),
                        self.cancel.clone(),
                    ),
                    kill: KillSwitch::new(kill_tx.clone(), self.cancel.clone()),
                    cancel: self.cancel.clone(),
                    stats: Arc::clone(&node.stats),
                    pipeline: self.name.clone(),
                    stage: stage_idx + 1,
                    print_data: self.print_data,
                };
                workers.push(thread::spawn(move || worker_loop(ctx)));
            }

            let processor = node.processor.clone();
            let emitter = Emitter::new(output_tx, Arc::clone(&node.stats), self.cancel.clone());
            let kill = KillSwitch::new(kill_tx.clone(), self.cancel.clone());
            let cancel = self.cancel.clone();
            terminators.push(thread::spawn(move || {
                for worker in workers {
                    let _ = worker.join();
                }
                if !cancel.is_cancelled() {
                    processor.finish(&emitter, &kill, &cancel);
                }
                // Dropping the emitter releases the last sender and
                // closes the output link.
            }));
        }

        terminators
    }
}

/// Runtime channel endpoints for one node, populated during wiring and
/// consumed when workers start.
#[derive(Default)]
struct NodeWiring {
    input_tx: Option<Sender<Payload>>,
    input_rx: Option<Receiver<Payload>>,
    output_tx: Option<Sender<Payload>>,
    output_rx: Option<Receiver<Payload>>,
    branch_txs: Vec<Sender<Payload>>,
    merge_rxs: Vec<Receiver<Payload>>,
}

struct WorkerContext {
    processor: ProcessorRef,
    input: Receiver<Payload>,
    emitter: Emitter,
    kill: KillSwitch,
    cancel: CancelToken,
    stats: Arc<NodeStats>,
    pipeline: String,
    stage: usize,
    print_data: bool,
}

/// Drain a node's input link, handing each payload to the processor.
fn worker_loop(ctx: WorkerContext) {
    if ctx.cancel.is_cancelled() {
        return;
    }
    tracing::info!(
        pipeline = %ctx.pipeline,
        stage = ctx.stage,
        processor = ctx.processor.name(),
        "waiting to receive data"
    );
    loop {
        select! {
            recv(ctx.input) -> msg => match msg {
                Ok(data) => {
                    if ctx.print_data {
                        tracing::debug!(
                            pipeline = %ctx.pipeline,
                            stage = ctx.stage,
                            processor = ctx.processor.name(),
                            data = %String::from_utf8_lossy(&data),
                            "received data"
                        );
                    }
                    ctx.stats.record_received(data.len());
                    let started = Instant::now();
                    ctx.processor
                        .process_data(data, &ctx.emitter, &ctx.kill, &ctx.cancel);
                    ctx.stats.record_execution(started.elapsed());
                }
                Err(_) => break,
            },
            recv(ctx.cancel.done()) -> _ => return,
        }
    }
    tracing::info!(
        pipeline = %ctx.pipeline,
        stage = ctx.stage,
        processor = ctx.processor.name(),
        "input link drained"
    );
}

/// Duplicate every payload from a node's output link to all of its
/// branches, in declaration order. Exiting drops the branch senders,
/// which closes each branch exactly once.
fn branch_out(output: Receiver<Payload>, branches: Vec<Sender<Payload>>, cancel: CancelToken) {
    loop {
        select! {
            recv(output) -> msg => match msg {
                Ok(data) => {
                    for branch in &branches {
                        let copy = data.clone();
                        select! {
                            send(branch, copy) -> res => {
                                if res.is_err() {
                                    return;
                                }
                            }
                            recv(cancel.done()) -> _ => return,
                        }
                    }
                }
                Err(_) => return,
            },
            recv(cancel.done()) -> _ => return,
        }
    }
}

/// Forward one incoming branch into a node's input link. The link's
/// sender refcount acts as the wait barrier: when the last forwarder
/// exits, the input link closes.
fn merge_in(branch: Receiver<Payload>, merged: Sender<Payload>, cancel: CancelToken) {
    loop {
        select! {
            recv(branch) -> msg => match msg {
                Ok(data) => {
                    select! {
                        send(merged, data) -> res => {
                            if res.is_err() {
                                return;
                            }
                        }
                        recv(cancel.done()) -> _ => return,
                    }
                }
                Err(_) => return,
            },
            recv(cancel.done()) -> _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Processor;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Emit(Vec<&'static str>);

    impl Processor for Emit {
        fn process_data(
            &self,
            _data: Payload,
            out: &Emitter,
            _kill: &KillSwitch,
            _cancel: &CancelToken,
        ) {
            for item in &self.0 {
                out.emit(item.as_bytes().to_vec());
            }
        }

        fn finish(&self, _out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {}

        fn name(&self) -> &str {
            "Emit"
        }
    }

    struct Collect(Arc<Mutex<Vec<Payload>>>);

    impl Processor for Collect {
        fn process_data(
            &self,
            data: Payload,
            _out: &Emitter,
            _kill: &KillSwitch,
            _cancel: &CancelToken,
        ) {
            self.0.lock().push(data);
        }

        fn finish(&self, _out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {}

        fn name(&self) -> &str {
            "Collect"
        }
    }

    #[test]
    fn test_linear_run_succeeds() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancelToken::new();
        let pipeline = Pipeline::new(
            &cancel,
            None,
            vec![
                Arc::new(Emit(vec!["a", "b"])) as ProcessorRef,
                Arc::new(Collect(Arc::clone(&seen))),
            ],
        )
        .unwrap();

        let kill = pipeline.run().unwrap();
        assert!(kill.recv().is_err(), "success closes without a value");
        assert_eq!(*seen.lock(), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_run_twice_rejected() {
        let cancel = CancelToken::new();
        let pipeline =
            Pipeline::new(&cancel, None, vec![Arc::new(Emit(vec![])) as ProcessorRef]).unwrap();

        let kill = pipeline.run().unwrap();
        assert_eq!(pipeline.run().err(), Some(PipelineError::AlreadyStarted));
        let _ = kill.recv();
    }

    #[test]
    fn test_empty_linear_pipeline_rejected() {
        let cancel = CancelToken::new();
        let err = Pipeline::new(&cancel, None, vec![]).err();
        assert_eq!(err, Some(PipelineError::EmptyLayout));
    }

    #[test]
    fn test_on_complete_fires_once_per_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cancel = CancelToken::new();
        let pipeline = Pipeline::new(
            &cancel,
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            vec![Arc::new(Emit(vec!["x"])) as ProcessorRef],
        )
        .unwrap();

        let kill = pipeline.run().unwrap();
        let _ = kill.recv();
        // The kill channel closes after the arbiter consumed the
        // callback slot; cleanup must then be a no-op.
        pipeline.cleanup();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cleanup_without_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cancel = CancelToken::new();
        let pipeline = Pipeline::new(
            &cancel,
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            vec![Arc::new(Emit(vec![])) as ProcessorRef],
        )
        .unwrap();

        pipeline.cleanup();
        pipeline.cleanup();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stats_report_shape() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancelToken::new();
        let pipeline = Pipeline::new(
            &cancel,
            None,
            vec![
                Arc::new(Emit(vec!["abc"])) as ProcessorRef,
                Arc::new(Collect(seen)),
            ],
        )
        .unwrap()
        .with_name("report-test");

        let kill = pipeline.run().unwrap();
        let _ = kill.recv();

        let report = pipeline.stats();
        assert!(report.starts_with("report-test: "));
        assert!(report.contains("Stage 1)"));
        assert!(report.contains("Stage 2)"));
        assert!(report.contains("* Emit"));
        assert!(report.contains("* Collect"));
    }
}
