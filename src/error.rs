use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced during layout construction or pipeline execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Layout has no stages
    #[error("Cannot build a pipeline layout with no stages")]
    EmptyLayout,

    /// A declared successor is not present in any stage
    #[error("Processor '{to}' listed as an output of '{from}' (stage {stage}) was not found in any stage")]
    MissingSuccessor {
        from: String,
        to: String,
        stage: usize,
    },

    /// A declared successor sits in the same or an earlier stage
    #[error("Output edge '{from}' (stage {from_stage}) -> '{to}' (stage {to_stage}) must point to a later stage")]
    BackwardEdge {
        from: String,
        to: String,
        from_stage: usize,
        to_stage: usize,
    },

    /// Pipeline has already been started
    #[error("Pipeline has already been started")]
    AlreadyStarted,

    /// Error reported by a processor during execution
    #[error("Processor failed: {0}")]
    Processor(String),

    /// The run was cancelled before completing
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// I/O error from a processor
    #[error("I/O error: {0}")]
    Io(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}
