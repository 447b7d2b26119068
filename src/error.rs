use thiserror::Error;

/// Error taxonomy for the engine. Kinds, not exhaustive per-call types: see SPEC_FULL.md §7.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("nnue error: {0}")]
    Nnue(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
}

pub type EngineResult<T> = Result<T, EngineError>;
