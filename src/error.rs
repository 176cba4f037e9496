use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("dataset mismatch: {inputs} inputs vs {targets} targets")]
    DatasetMismatch { inputs: usize, targets: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returns `ShapeMismatch` unless `actual == expected`.
#[inline]
pub(crate) fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::ShapeMismatch { expected, actual });
    }
    Ok(())
}
