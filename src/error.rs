//! Error types for mysqlx-wire.

use thiserror::Error;

/// Result type for mysqlx-wire operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error reported by the server in a `Mysqlx.Error` message.
#[derive(Debug, Clone)]
pub struct ServerError {
    /// Server error code.
    pub code: u32,
    /// Five-character SQLSTATE.
    pub sql_state: String,
    /// Human-readable message.
    pub message: String,
    /// Whether the server flagged the error as fatal to the session.
    pub fatal: bool,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (code {}, SQLSTATE {})",
            self.message, self.code, self.sql_state
        )?;
        if self.fatal {
            write!(f, " [fatal]")?;
        }
        Ok(())
    }
}

/// Error type for mysqlx-wire.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("server error: {0}")]
    Server(ServerError),

    /// Protocol error (malformed message, message unexpected for the current stage, etc.)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Codec buffer too small for the requested width
    #[error("codec size error: {0}")]
    CodecSize(String),

    /// Invalid byte sequence in transfer-encoded text
    #[error("text encoding error: {0}")]
    Encoding(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connection is broken and cannot be reused
    #[error("connection is broken")]
    ConnectionBroken,

    /// Session was closed and can no longer be used
    #[error("session is closed")]
    SessionClosed,

    /// Invalid usage (e.g., fetching rows from a reply without a result set)
    #[error("invalid usage: {0}")]
    InvalidUsage(String),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    ///
    /// Protocol errors are conservatively treated as connection-breaking: once
    /// the byte stream is out of step there is no reliable way to resynchronize.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken | Error::Protocol(_) => true,
            Error::Server(err) => err.fatal,
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Error::Server(err) => Some(&err.sql_state),
            _ => None,
        }
    }
}
