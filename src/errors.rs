use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarksmanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Malformed proposal: {0}")]
    MalformedProposal(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    #[error("Element scan failed: {0}")]
    Scan(String),

    #[error("Actuator error: {0}")]
    Actuator(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Run cancelled")]
    Cancelled,
}

pub type MarksmanResult<T> = Result<T, MarksmanError>;
