use std::io;

use thiserror::Error;

/// A wire parsing error.
#[derive(Clone, Error, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The buffer ended before the structure being read was complete.
    ///
    /// Expected at stream boundaries, never fatal.
    #[error("incomplete data")]
    Incomplete,
    /// The data to be deserialized was structurally invalid.
    #[error("malformed data: {0}")]
    Malformed(&'static str),
}

impl From<io::Error> for ParseError {
    fn from(err: io::Error) -> Self {
        // All reads happen against in-memory buffers, so the only io error a
        // typed read can produce is running off the end of the buffer.
        match err.kind() {
            io::ErrorKind::UnexpectedEof => ParseError::Incomplete,
            _ => ParseError::Malformed("io error reading wire data"),
        }
    }
}
