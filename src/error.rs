use thiserror::Error;

/// Unified error type for the encoding pipeline.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Writing to the underlying output failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The zlib stream could not be initialized or did not run to completion.
    #[error("zlib compression failed: {0}")]
    Compression(String),
    /// A relation member carried a kind tag outside 'n', 'w', 'r'.
    #[error("unknown relation member type {0:?}")]
    InvalidMemberType(char),
    /// A coordinate was NaN or out of range after granularity scaling.
    #[error("coordinate {0} is not representable at the configured granularity")]
    InvalidCoordinate(f64),
}

/// Result type alias used throughout the writer.
pub type Result<T> = std::result::Result<T, EncodeError>;
