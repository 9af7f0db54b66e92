use thiserror::Error as ThisError;

/// Convenient alias, which defaults to [`Error`] as the `Err` variant.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error variants returned by this crate.
///
/// Every raisable kind documented on a public operation maps to exactly one
/// of these variants.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("{0}")]
    Unique(String),

    #[error("Memory error: {0}")]
    Memory(#[from] memory::Error),

    #[error("null argument where a value was required: {0}")]
    NullArgument(&'static str),

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },

    #[error("buffer already frozen into a column")]
    BufferFrozen,

    #[error("column is not categorical")]
    NotCategorical,

    #[error("column is not numeric")]
    NotNumeric,

    #[error("column is not object-readable")]
    NotObject,

    #[error("too many distinct values: {0}")]
    TooManyValues(String),

    #[error("dictionary rename would collapse distinct values onto one")]
    IllegalReplacement,

    #[error("execution context is inactive")]
    ContextInactive,

    #[error("operation was aborted")]
    Aborted,

    #[error("caller-supplied callable failed: {0}")]
    UserFailure(String),

    #[error("label {0:?} is not unique within the table")]
    DuplicateLabel(String),

    #[error("no column with label {0:?}")]
    ColumnNotFound(String),

    #[error("labels ({labels}) and columns ({columns}) counts differ")]
    LabelColumnMismatch { labels: usize, columns: usize },

    #[error("columns must share one height; found {expected} and {found}")]
    HeightMismatch { expected: usize, found: usize },

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Unique(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Unique(s)
    }
}
