use attention::AttentionError;
use thiserror::Error;

/// Failures raised while configuring or running the transformer stack.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Attention(#[from] AttentionError),
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported configuration extension '{0}'")]
    ConfigFormat(String),
    #[error("invalid hyper-parameters: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("tokenizer failed: {0}")]
    Tokenizer(String),
    #[error("{requested} positions exceed the context size of {context_size}")]
    ContextOverflow { requested: usize, context_size: usize },
}
