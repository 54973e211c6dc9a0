use crate::error::{PipelineError, Result};
use crate::processor::ProcessorRef;
use crate::stats::NodeStats;
use std::sync::Arc;

/// Builder step binding one processor to the successors it feeds.
///
/// Successor references are recorded here and resolved to concrete graph
/// nodes when the layout is validated.
pub struct Do {
    processor: ProcessorRef,
    outputs: Vec<ProcessorRef>,
}

impl Do {
    /// Start a builder step for `processor`
    pub fn new(processor: ProcessorRef) -> Self {
        Self {
            processor,
            outputs: Vec::new(),
        }
    }

    /// Declare the processors this step feeds.
    ///
    /// Consuming the step means successors can only be declared once. A
    /// step without outputs is a sink.
    pub fn outputs<I>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = ProcessorRef>,
    {
        self.outputs = outputs.into_iter().collect();
        self
    }
}

/// An ordered set of processors at the same depth of the graph.
///
/// Processors within one stage are peers and never connected to each
/// other.
pub struct PipelineStage {
    steps: Vec<Do>,
}

impl PipelineStage {
    /// Create a stage from builder steps
    pub fn new(steps: Vec<Do>) -> Self {
        Self { steps }
    }
}

/// A processor embedded in a validated layout, with its resolved
/// successor indices and runtime counters.
pub(crate) struct ProcessorNode {
    pub(crate) processor: ProcessorRef,
    /// Flat node indices of the successors, all in later stages
    pub(crate) successors: Vec<usize>,
    pub(crate) concurrency: usize,
    pub(crate) stats: Arc<NodeStats>,
}

/// A validated DAG of stages.
///
/// Construction checks that every declared successor exists and sits in
/// a strictly later stage, which also rules out cycles. The layout is
/// immutable afterwards.
pub struct PipelineLayout {
    pub(crate) stages: Vec<Vec<ProcessorNode>>,
}

impl PipelineLayout {
    /// Build and validate a layout from stages given in topological order
    pub fn new(stages: Vec<PipelineStage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(PipelineError::EmptyLayout);
        }

        // Flatten to assign every processor a stable node index.
        let mut flat: Vec<(usize, &Do)> = Vec::new();
        for (stage_idx, stage) in stages.iter().enumerate() {
            for step in &stage.steps {
                flat.push((stage_idx, step));
            }
        }

        // Resolve successor references to node indices, enforcing the
        // later-stage rule edge by edge.
        let mut resolved: Vec<Vec<usize>> = Vec::with_capacity(flat.len());
        for &(from_stage, step) in &flat {
            let mut successors = Vec::with_capacity(step.outputs.len());
            for out in &step.outputs {
                let found = flat
                    .iter()
                    .position(|(_, candidate)| Arc::ptr_eq(&candidate.processor, out));
                match found {
                    None => {
                        return Err(PipelineError::MissingSuccessor {
                            from: step.processor.name().to_string(),
                            to: out.name().to_string(),
                            stage: from_stage,
                        });
                    }
                    Some(idx) => {
                        let to_stage = flat[idx].0;
                        if to_stage <= from_stage {
                            return Err(PipelineError::BackwardEdge {
                                from: step.processor.name().to_string(),
                                to: out.name().to_string(),
                                from_stage,
                                to_stage,
                            });
                        }
                        successors.push(idx);
                    }
                }
            }
            resolved.push(successors);
        }

        let mut node_stages: Vec<Vec<ProcessorNode>> = Vec::with_capacity(stages.len());
        let mut resolved = resolved.into_iter();
        for stage in stages {
            let mut nodes = Vec::with_capacity(stage.steps.len());
            for step in stage.steps {
                let successors = resolved.next().expect("one successor list per step");
                let concurrency = step.processor.concurrency().max(1);
                nodes.push(ProcessorNode {
                    processor: step.processor,
                    successors,
                    concurrency,
                    stats: Arc::new(NodeStats::new()),
                });
            }
            node_stages.push(nodes);
        }

        Ok(Self {
            stages: node_stages,
        })
    }

    /// Number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Number of processors across all stages
    pub fn processor_count(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }

    /// Iterate nodes in flat index order, with their stage index
    pub(crate) fn nodes(&self) -> impl Iterator<Item = (usize, &ProcessorNode)> {
        self.stages
            .iter()
            .enumerate()
            .flat_map(|(stage_idx, nodes)| nodes.iter().map(move |node| (stage_idx, node)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::processor::{Emitter, KillSwitch, Payload, Processor};

    struct Noop(&'static str);

    impl Processor for Noop {
        fn process_data(
            &self,
            _data: Payload,
            _out: &Emitter,
            _kill: &KillSwitch,
            _cancel: &CancelToken,
        ) {
        }

        fn finish(&self, _out: &Emitter, _kill: &KillSwitch, _cancel: &CancelToken) {}

        fn name(&self) -> &str {
            self.0
        }
    }

    fn proc(name: &'static str) -> ProcessorRef {
        Arc::new(Noop(name))
    }

    #[test]
    fn test_empty_layout_rejected() {
        assert_eq!(
            PipelineLayout::new(vec![]).err(),
            Some(PipelineError::EmptyLayout)
        );
    }

    #[test]
    fn test_linear_layout() {
        let a = proc("a");
        let b = proc("b");
        let layout = PipelineLayout::new(vec![
            PipelineStage::new(vec![Do::new(a).outputs([b.clone()])]),
            PipelineStage::new(vec![Do::new(b)]),
        ])
        .unwrap();

        assert_eq!(layout.stage_count(), 2);
        assert_eq!(layout.processor_count(), 2);
        let nodes: Vec<_> = layout.nodes().collect();
        assert_eq!(nodes[0].1.successors, vec![1]);
        assert!(nodes[1].1.successors.is_empty());
    }

    #[test]
    fn test_branching_layout_resolves_indices() {
        let src = proc("src");
        let left = proc("left");
        let right = proc("right");
        let sink = proc("sink");
        let layout = PipelineLayout::new(vec![
            PipelineStage::new(vec![
                Do::new(src).outputs([left.clone(), right.clone()])
            ]),
            PipelineStage::new(vec![
                Do::new(left).outputs([sink.clone()]),
                Do::new(right).outputs([sink.clone()]),
            ]),
            PipelineStage::new(vec![Do::new(sink)]),
        ])
        .unwrap();

        let nodes: Vec<_> = layout.nodes().collect();
        assert_eq!(nodes[0].1.successors, vec![1, 2]);
        assert_eq!(nodes[1].1.successors, vec![3]);
        assert_eq!(nodes[2].1.successors, vec![3]);
    }

    #[test]
    fn test_missing_successor_names_edge() {
        let a = proc("a");
        let ghost = proc("ghost");
        let err = PipelineLayout::new(vec![PipelineStage::new(vec![
            Do::new(a).outputs([ghost])
        ])])
        .err()
        .unwrap();

        assert_eq!(
            err,
            PipelineError::MissingSuccessor {
                from: "a".into(),
                to: "ghost".into(),
                stage: 0,
            }
        );
    }

    #[test]
    fn test_backward_edge_rejected() {
        let a = proc("a");
        let b = proc("b");
        let err = PipelineLayout::new(vec![
            PipelineStage::new(vec![Do::new(a.clone()).outputs([b.clone()])]),
            PipelineStage::new(vec![Do::new(b).outputs([a])]),
        ])
        .err()
        .unwrap();

        assert_eq!(
            err,
            PipelineError::BackwardEdge {
                from: "b".into(),
                to: "a".into(),
                from_stage: 1,
                to_stage: 0,
            }
        );
    }

    #[test]
    fn test_same_stage_edge_rejected() {
        let a = proc("a");
        let b = proc("b");
        let err = PipelineLayout::new(vec![PipelineStage::new(vec![
            Do::new(a).outputs([b.clone()]),
            Do::new(b),
        ])])
        .err()
        .unwrap();

        assert!(matches!(err, PipelineError::BackwardEdge { .. }));
    }

    #[test]
    fn test_identity_is_by_reference() {
        // Two separate values with the same name are distinct nodes.
        let a = proc("dup");
        let other = proc("dup");
        let err = PipelineLayout::new(vec![PipelineStage::new(vec![
            Do::new(a).outputs([other])
        ])])
        .err()
        .unwrap();

        assert!(matches!(err, PipelineError::MissingSuccessor { .. }));
    }
}
