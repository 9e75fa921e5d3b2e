use thiserror::Error;

/// All errors produced by recito-core.
#[derive(Debug, Error)]
pub enum RecitoError {
    #[error("config error: {0}")]
    Config(String),

    #[error("engine '{engine_id}' is unavailable: {reason}")]
    EngineUnavailable { engine_id: String, reason: String },

    #[error("engine '{0}' is not registered")]
    EngineUnknown(String),

    #[error("invalid voice config: {0}")]
    InvalidVoiceConfig(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("operation rejected in current state: {0}")]
    InvalidState(String),

    #[error("subtitle error: {0}")]
    Subtitle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RecitoError>;
