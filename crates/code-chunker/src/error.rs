use thiserror::Error;

/// Errors raised while chunking a source file.
#[derive(Debug, Error)]
pub enum ChunkerError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("failed to parse {path}: {message}")]
    ParseFailed { path: String, message: String },

    #[error("tree-sitter grammar error for {0}")]
    GrammarError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ChunkerError {
    pub fn unsupported_language(lang: impl Into<String>) -> Self {
        Self::UnsupportedLanguage(lang.into())
    }

    pub fn parse_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseFailed {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChunkerError>;
