use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("cannot open {format} document: {details}")]
    CorruptSource { format: &'static str, details: String },

    #[error("invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl ExtractError {
    pub(crate) fn corrupt(format: &'static str, details: impl ToString) -> Self {
        Self::CorruptSource {
            format,
            details: details.to_string(),
        }
    }
}

pub type Result<T, E = ExtractError> = std::result::Result<T, E>;
