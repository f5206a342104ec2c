//! Transport abstraction over the connection byte stream.
//!
//! The transport is exclusively owned by the session. Connection
//! establishment and TLS negotiation happen before a transport is handed to
//! the session; the session only needs byte-level reads and writes plus a
//! security flag for the authentication default.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crate::error::Result;

/// External event an in-progress operation may be waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// More bytes must arrive before the next `advance()` is useful.
    Readable,
    /// The socket must accept more bytes.
    Writable,
}

/// Byte stream carrying the protocol.
pub trait Transport {
    /// Non-blocking read into `buf`.
    ///
    /// Returns `Ok(None)` when no bytes are available right now and
    /// `Ok(Some(0))` when the peer closed the connection.
    fn poll_read(&mut self, buf: &mut [u8]) -> Result<Option<usize>>;

    /// Block until at least one byte is readable (or the peer closes).
    fn wait_readable(&mut self) -> Result<()>;

    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Whether the transport is already secured (TLS or a local channel).
    ///
    /// Drives the default authentication mechanism choice.
    fn is_secure(&self) -> bool;
}

/// TCP transport.
pub struct TcpTransport {
    stream: TcpStream,
    secure: bool,
}

impl TcpTransport {
    /// Connect to `host:port`.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            secure: false,
        })
    }

    /// Wrap an already-connected stream.
    ///
    /// `secure` should be true when the stream is protected by other means
    /// (e.g. a TLS tunnel or a loopback-only deployment).
    pub fn from_stream(stream: TcpStream, secure: bool) -> Self {
        Self { stream, secure }
    }
}

impl Transport for TcpTransport {
    fn poll_read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.stream.set_nonblocking(true)?;
        let outcome = self.stream.read(buf);
        self.stream.set_nonblocking(false)?;
        match outcome {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn wait_readable(&mut self) -> Result<()> {
        // A blocking one-byte peek returns once data (or EOF) is available
        // without consuming anything.
        let mut probe = [0u8; 1];
        self.stream.peek(&mut probe)?;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()?;
        Ok(())
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}
