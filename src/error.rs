//! Error types for fcgi-client.
//!
//! Every failure the crate surfaces is one of the closed set of kinds below,
//! annotated with the protocol phase that was in progress. Callers can match
//! on the kind without depending on the underlying transport error's text.

use thiserror::Error;

/// Main error type for all FastCGI client operations.
#[derive(Debug, Error)]
pub enum FcgiError {
    /// Operation attempted after [`Client::close`](crate::Client::close).
    #[error("client closed")]
    Closed,

    /// Dial-time failure while establishing the connection.
    #[error("connect error: {0}")]
    Connect(#[source] std::io::Error),

    /// Transport deadline exceeded (per-request or connect timeout).
    #[error("timeout while {phase}")]
    Timeout { phase: &'static str },

    /// The caller's cancellation token fired.
    #[error("cancelled while {phase}")]
    Cancelled { phase: &'static str },

    /// Transport closed mid-protocol with an incomplete record or response.
    #[error("unexpected EOF while {phase}")]
    UnexpectedEof { phase: &'static str },

    /// Malformed status line, header block, or status code in the
    /// reconstructed response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// I/O failure while writing a record, not otherwise classified.
    #[error("write error while {phase}: {source}")]
    Write {
        phase: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure while reading the response stream, not otherwise
    /// classified.
    #[error("read error while {phase}: {source}")]
    Read {
        phase: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl FcgiError {
    /// Classify an I/O error raised while writing to the transport.
    ///
    /// Deadline-style errors become [`FcgiError::Timeout`]; everything else
    /// is a [`FcgiError::Write`].
    pub(crate) fn write(source: std::io::Error, phase: &'static str) -> Self {
        if is_timeout(&source) {
            FcgiError::Timeout { phase }
        } else {
            FcgiError::Write { phase, source }
        }
    }

    /// Classify an I/O error raised while reading from the transport.
    ///
    /// Deadline-style errors become [`FcgiError::Timeout`], end-of-stream
    /// becomes [`FcgiError::UnexpectedEof`], everything else is a
    /// [`FcgiError::Read`].
    pub(crate) fn read(source: std::io::Error, phase: &'static str) -> Self {
        if is_timeout(&source) {
            FcgiError::Timeout { phase }
        } else if is_eof(&source) {
            FcgiError::UnexpectedEof { phase }
        } else {
            FcgiError::Read { phase, source }
        }
    }

    /// True if this error is the timeout kind.
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, FcgiError::Timeout { .. })
    }

    /// True if this error is the cancellation kind.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FcgiError::Cancelled { .. })
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

fn is_eof(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::UnexpectedEof
}

/// Result type alias using FcgiError.
pub type Result<T> = std::result::Result<T, FcgiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_write_classifies_timeout() {
        let err = FcgiError::write(
            io::Error::new(io::ErrorKind::TimedOut, "deadline"),
            "writing record",
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn test_write_passes_through_other_errors() {
        let err = FcgiError::write(
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe"),
            "writing record",
        );
        assert!(matches!(err, FcgiError::Write { .. }));
    }

    #[test]
    fn test_read_classifies_eof() {
        let err = FcgiError::read(
            io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
            "reading header",
        );
        assert!(matches!(
            err,
            FcgiError::UnexpectedEof {
                phase: "reading header"
            }
        ));
    }

    #[test]
    fn test_read_classifies_timeout() {
        let err = FcgiError::read(
            io::Error::new(io::ErrorKind::WouldBlock, "would block"),
            "reading header",
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn test_read_catch_all() {
        let err = FcgiError::read(
            io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
            "reading header",
        );
        assert!(matches!(err, FcgiError::Read { .. }));
    }

    #[test]
    fn test_display_includes_phase() {
        let err = FcgiError::Timeout {
            phase: "writing begin request",
        };
        assert_eq!(err.to_string(), "timeout while writing begin request");
    }
}
