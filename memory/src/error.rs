use thiserror::Error as ThisError;

/// Convenient alias, which defaults to [`Error`] as the `Err` variant.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error variants returned by this crate.
///
/// These are the low-level kinds that can originate below the column kernel;
/// `frame::Error` wraps this type the same way it wraps every other cause it
/// wants to surface without losing the original message.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("{0}")]
    Unique(String),

    #[error("negative or overflowing length: {0}")]
    BadArgument(String),

    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },

    #[error("packed-integer format {format:?} cannot hold raw index {value}")]
    FormatTooNarrow { format: crate::packed_int::Format, value: u32 },
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
