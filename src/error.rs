use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Codec decode failure: malformed field, missing delimiter, bad id.
    #[error("Format error: {0}")]
    Format(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Both the primary decode and the marker-fallback decode failed.
    #[error("Recovery exhausted: {reason}")]
    RecoveryExhausted {
        reason: String,
        cleaned_excerpt: String,
        extracted_excerpt: Option<String>,
    },

    /// Model call failed after retries, or returned empty/invalid content.
    #[error("Invocation error: {0}")]
    Invocation(String),

    #[error("Compressed memory failed validation: {0}")]
    CompressionValidation(String),

    #[error("Subtitle parsing error: {0}")]
    Subtitle(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

pub type Result<T> = std::result::Result<T, RefineError>;
