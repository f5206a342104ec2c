//! Message envelope framing.
//!
//! Every message travels in a frame: a 4-byte little-endian length covering
//! the type byte plus payload, then the type byte, then the payload.

use zerocopy::FromBytes;
use zerocopy::little_endian::U32 as U32LE;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Frame header size: 4-byte length + 1 type byte.
pub const HEADER_LEN: usize = 5;

/// Hard cap on a single frame payload; anything larger is treated as a
/// malformed envelope.
pub const MAX_PAYLOAD: usize = 128 * 1024 * 1024;

/// Client-to-server message type tags.
pub mod client_msg {
    pub const CON_CLOSE: u8 = 3;
    pub const SESS_AUTHENTICATE_START: u8 = 4;
    pub const SESS_AUTHENTICATE_CONTINUE: u8 = 5;
    pub const SESS_RESET: u8 = 6;
    pub const SESS_CLOSE: u8 = 7;
    pub const SQL_STMT_EXECUTE: u8 = 12;
    pub const CRUD_FIND: u8 = 17;
    pub const CRUD_INSERT: u8 = 18;
    pub const CRUD_UPDATE: u8 = 19;
    pub const CRUD_DELETE: u8 = 20;
}

/// Server-to-client message type tags.
pub mod server_msg {
    pub const OK: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const SESS_AUTHENTICATE_CONTINUE: u8 = 3;
    pub const SESS_AUTHENTICATE_OK: u8 = 4;
    pub const NOTICE: u8 = 11;
    pub const RESULTSET_COLUMN_META_DATA: u8 = 12;
    pub const RESULTSET_ROW: u8 = 13;
    pub const RESULTSET_FETCH_DONE: u8 = 14;
    pub const RESULTSET_FETCH_DONE_MORE_RESULTSETS: u8 = 16;
    pub const SQL_STMT_EXECUTE_OK: u8 = 17;
}

/// One complete message off the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

/// Append a complete frame for `payload` to `out`.
pub fn write_frame(out: &mut Vec<u8>, msg_type: u8, payload: &[u8]) {
    let length = (payload.len() + 1) as u32;
    out.extend_from_slice(&length.to_le_bytes());
    out.push(msg_type);
    out.extend_from_slice(payload);
}

fn parse_header(header: &[u8; HEADER_LEN]) -> Result<(u8, usize)> {
    let length = U32LE::read_from_bytes(&header[..4])
        .map_err(|e| Error::Protocol(format!("frame header: {e:?}")))?
        .get() as usize;
    if length < 1 {
        return Err(Error::Protocol("frame length below minimum".into()));
    }
    let payload_len = length - 1;
    if payload_len > MAX_PAYLOAD {
        return Err(Error::Protocol(format!(
            "frame payload of {} bytes exceeds limit",
            payload_len
        )));
    }
    Ok((header[4], payload_len))
}

/// Incremental frame reader.
///
/// Accumulates header and payload bytes across `poll` calls so a frame can be
/// assembled from however many reads the transport needs. A reader that has
/// consumed part of a frame is "mid-frame"; discarding it leaves the
/// connection unusable.
#[derive(Debug)]
pub struct FrameReader {
    header: [u8; HEADER_LEN],
    filled: usize,
    payload: Vec<u8>,
    payload_len: usize,
    have_header: bool,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            header: [0; HEADER_LEN],
            filled: 0,
            payload: Vec::new(),
            payload_len: 0,
            have_header: false,
        }
    }

    /// Whether a frame has been partially consumed from the transport.
    pub fn is_mid_frame(&self) -> bool {
        self.filled > 0 || self.have_header
    }

    /// Drop any partially-assembled frame state.
    pub fn reset(&mut self) {
        self.filled = 0;
        self.have_header = false;
        self.payload.clear();
        self.payload_len = 0;
    }

    /// Make as much progress as possible without blocking.
    ///
    /// Returns the completed frame, or `None` when the transport has no more
    /// bytes right now.
    pub fn poll(&mut self, transport: &mut dyn Transport) -> Result<Option<Frame>> {
        loop {
            if !self.have_header {
                let n = match transport.poll_read(&mut self.header[self.filled..])? {
                    Some(0) => return Err(Error::ConnectionBroken),
                    Some(n) => n,
                    None => return Ok(None),
                };
                self.filled += n;
                if self.filled < HEADER_LEN {
                    continue;
                }
                let (_, payload_len) = parse_header(&self.header)?;
                self.payload_len = payload_len;
                self.payload.clear();
                self.payload.resize(payload_len, 0);
                self.filled = 0;
                self.have_header = true;
            }

            while self.filled < self.payload_len {
                let n = match transport.poll_read(&mut self.payload[self.filled..])? {
                    Some(0) => return Err(Error::ConnectionBroken),
                    Some(n) => n,
                    None => return Ok(None),
                };
                self.filled += n;
            }

            let (msg_type, _) = parse_header(&self.header)?;
            let frame = Frame {
                msg_type,
                payload: std::mem::take(&mut self.payload),
            };
            self.filled = 0;
            self.have_header = false;
            self.payload_len = 0;
            tracing::trace!(msg_type, len = frame.payload.len(), "recv frame");
            return Ok(Some(frame));
        }
    }

    /// Read one complete frame, blocking on the transport as needed.
    pub fn read_blocking(&mut self, transport: &mut dyn Transport) -> Result<Frame> {
        loop {
            if let Some(frame) = self.poll(transport)? {
                return Ok(frame);
            }
            transport.wait_readable()?;
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}
