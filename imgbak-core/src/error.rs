//! Error types shared by every module of the library.
use thiserror::Error;

/// Everything that can abort an `imgbak-core` operation.
///
/// None of these are retried internally. Callers decide what to show the user
/// and whether to try again.
#[derive(Error, Debug)]
pub enum Error {
    /// A line of listing-tool output could not be split into the expected columns.
    #[error("unable to parse listing line: {line:?}")]
    Parse { line: String },

    /// A progress line from the copy tool is missing one of its delimiters.
    #[error("malformed progress line ({reason}): {line:?}")]
    Format { line: String, reason: &'static str },

    /// An estimate was requested before any bytes were copied.
    #[error("cannot extrapolate throughput with zero bytes copied")]
    Division,

    /// An external tool failed. The message is its diagnostic output.
    #[error("{tool} failed: {message}")]
    Process { tool: String, message: String },

    /// The filesystem holding the image does not have room for it.
    #[error("not enough free space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn format(line: &str, reason: &'static str) -> Self {
        Error::Format {
            line: line.to_string(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
