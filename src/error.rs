use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM API error: {0}")]
    Llm(String),

    #[error("LLM API rate limited: {0}")]
    LlmRateLimited(String),

    #[error("LLM API transient error: {0}")]
    LlmTransient(String),

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Tool invocation failed: {0}")]
    Tool(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Manifest serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
