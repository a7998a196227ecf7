use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("Slide count must be between 1 and {max}, got {count}")]
    InvalidSlideCount { count: u32, max: u32 },

    #[error("Unsupported aspect ratio '{0}'. Choose from 16:9, 9:16, 1:1")]
    UnsupportedAspectRatio(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
