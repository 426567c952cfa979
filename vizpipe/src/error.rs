use thiserror::Error;

/// Failures surfaced by the three phase protocol.  Failures are returned, never
/// thrown: a stage callback that returns `Err` aborts the update of every stage
/// fed by it.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required key is missing, a required input is unconnected, or the
    /// graph itself is malformed.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An input data object does not satisfy the port it arrived on.
    #[error("data error: {0}")]
    Data(String),
    /// The stage observed the abort flag and returned early.
    #[error("aborted before completion")]
    Aborted,
    #[error("invalid extent: {0}")]
    InvalidExtent(String),
    /// Two consumers asked one output for requests that have no common superset.
    #[error("incompatible update requests: {0}")]
    IncompatibleRequests(String),
    #[error("communication error: {0}")]
    Communication(String),
    #[error("invalid options: {0}")]
    Options(#[from] serde_json::Error),
    #[error("{stage}: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<PipelineError>,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    pub fn data(message: impl Into<String>) -> Self {
        PipelineError::Data(message.into())
    }

    /// Attributes the error to a stage, unless it already is.
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            PipelineError::Stage { .. } => self,
            other => PipelineError::Stage {
                stage: stage.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any stage attribution peeled off.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root(),
            PipelineError::Configuration(_)
                | PipelineError::IncompatibleRequests(_)
                | PipelineError::InvalidExtent(_)
        )
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.root(), PipelineError::Aborted)
    }
}
