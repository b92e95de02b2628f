use crate::translation::TranslationError;

/// Errors surfaced by the pipeline.
///
/// The DSP engines never fail on in-domain input; these variants come from
/// configuration, frame construction, the translation collaborator and the
/// async plumbing around a processing call.
#[derive(Debug, thiserror::Error)]
pub enum ApmError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid audio frame: {0}")]
    InvalidFrame(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("translation failed: {0}")]
    Translation(#[from] TranslationError),

    #[error("processing task failed: {0}")]
    TaskJoin(String),

    #[error("blocking call issued from inside an async runtime; use the async variant")]
    BlockingInAsyncContext,

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ApmError>;
