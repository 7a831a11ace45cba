use std::{error::Error, fmt::Display, io};

/// Errors raised by the FTDI transport (the vendor driver boundary, §4.1/§7).
///
/// A [`TransportError`] always ends the session that triggered it; the instance
/// treats [`TransportError::Device`] as fatal to the whole process (the transport
/// needs to be reopened), per the Transport-fatal row of the error taxonomy.
#[derive(Debug)]
pub enum TransportError {
    /// The vendor driver (D2XX) returned a non-OK status.
    Device(String),
    /// A write did not accept all the bytes that were handed to it.
    ShortWrite { expected: usize, wrote: usize },
    /// No data arrived from the chip within the read timeout.
    ReadTimeout,
    /// The requested device could not be found by its selector.
    DeviceNotFound(String),
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        TransportError::Io(value)
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Device(status) => write!(f, "FTDI driver error: {status}"),
            TransportError::ShortWrite { expected, wrote } => {
                write!(f, "short write: expected {expected} bytes, wrote {wrote}")
            }
            TransportError::ReadTimeout => write!(f, "timed out waiting for data from the chip"),
            TransportError::DeviceNotFound(selector) => {
                write!(f, "no FTDI device matching selector {selector}")
            }
            TransportError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl Error for TransportError {}

/// Converts a transport failure into a session-ending I/O error, so it can flow
/// through the same `Result<(), ReadError>` surface the XVC session already uses.
impl From<TransportError> for io::Error {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Io(e) => e,
            TransportError::ReadTimeout => io::Error::new(io::ErrorKind::TimedOut, value.to_string()),
            other => io::Error::other(other.to_string()),
        }
    }
}
