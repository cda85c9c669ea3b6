use thiserror::Error;

use crate::StreamId;

/// ABR engine errors.
#[derive(Debug, Error)]
pub enum AbrError {
    #[error("Invalid ABR options: {0}")]
    InvalidOptions(String),

    #[error("Rendition {index} out of range ({count} actual renditions)")]
    RenditionOutOfRange { index: usize, count: usize },

    #[error("Unknown stream: {0}")]
    UnknownStream(StreamId),

    #[error("ABR driver closed")]
    DriverClosed,
}

pub type AbrResult<T> = Result<T, AbrError>;
