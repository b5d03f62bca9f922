//! Error types for stratum.

use thiserror::Error;

/// Errors that can occur while building, searching, or persisting an index.
#[derive(Debug, Error)]
pub enum StratumError {
    /// Input bytes disagree with their declared layout (bad header, size
    /// mismatch, unknown magic, out-of-range ids, dimension mismatch).
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A search seed id falls outside `[0, N)`.
    #[error("invalid seed {seed}: index holds {len} points")]
    InvalidSeed { seed: u32, len: usize },

    /// Underlying read/write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The build observed its cancellation flag and discarded the
    /// partial graph.
    #[error("build cancelled")]
    Cancelled,

    /// Invalid build or search parameter.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for stratum operations.
pub type Result<T> = std::result::Result<T, StratumError>;
