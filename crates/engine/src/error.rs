use thiserror::Error;

#[derive(Debug, Error)]
pub enum BooklistError {
    /// The style or a required column does not match the database schema.
    #[error("booklist configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    #[error("position {position} is out of bounds for {count} rows")]
    OutOfBounds { position: usize, count: usize },

    #[error("build cancelled")]
    Cancelled,
}

impl BooklistError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Configuration errors are not retried; the list cannot be shown.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BooklistError::Configuration(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BooklistError::Cancelled)
    }
}

pub type Result<T, E = BooklistError> = std::result::Result<T, E>;
