use thiserror::Error;

/// Errors returned by table I/O.
#[derive(Debug, Error)]
pub enum GslibError {
    #[error("gslib: io: {0}")]
    Io(#[from] std::io::Error),

    #[error("gslib: line {line}: {reason}")]
    InvalidFormat { line: usize, reason: String },

    #[error("gslib: column {column} out of range, table has {ncols}")]
    ColumnOutOfRange { column: usize, ncols: usize },

    #[error("gslib: column {name:?} has {got} values, table has {expected} rows")]
    LengthMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
}

/// Result alias for table I/O.
pub type Result<T> = std::result::Result<T, GslibError>;
