//! Shared fixtures: a scripted in-memory transport plus builders for the
//! server frames the scripts are made of.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use mysqlx_wire::protocol::frame::{server_msg, write_frame};
use mysqlx_wire::protocol::wire::{write_bytes_field, write_nested, write_str_field, write_uint_field};
use mysqlx_wire::{Result, Transport};

#[derive(Debug)]
enum Chunk {
    Bytes(Vec<u8>),
    /// One-shot would-block point.
    WouldBlock,
}

/// Handle onto the bytes a [`ScriptedTransport`] has written, usable while
/// the session owns the transport.
#[derive(Clone)]
pub struct WrittenLog(Rc<RefCell<Vec<u8>>>);

impl WrittenLog {
    /// Client frames written so far, as `(msg_type, payload)` pairs.
    pub fn frames(&self) -> Vec<(u8, Vec<u8>)> {
        let written = self.0.borrow();
        let mut out = Vec::new();
        let mut pos = 0;
        while pos + 5 <= written.len() {
            let len =
                u32::from_le_bytes(written[pos..pos + 4].try_into().expect("header slice")) as usize;
            out.push((written[pos + 4], written[pos + 5..pos + 4 + len].to_vec()));
            pos += 4 + len;
        }
        out
    }

    pub fn frame_types(&self) -> Vec<u8> {
        self.frames().into_iter().map(|(t, _)| t).collect()
    }
}

/// Transport that replays a scripted sequence of server bytes and records
/// everything the client writes. An exhausted script reads as EOF, so a
/// client that over-reads fails instead of hanging.
#[derive(Debug)]
pub struct ScriptedTransport {
    incoming: VecDeque<Chunk>,
    written: Rc<RefCell<Vec<u8>>>,
    secure: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            incoming: VecDeque::new(),
            written: Rc::new(RefCell::new(Vec::new())),
            secure: false,
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Append bytes the server will deliver.
    pub fn server(mut self, bytes: Vec<u8>) -> Self {
        self.incoming.push_back(Chunk::Bytes(bytes));
        self
    }

    /// Append a point at which one read reports would-block.
    pub fn would_block(mut self) -> Self {
        self.incoming.push_back(Chunk::WouldBlock);
        self
    }

    pub fn log(&self) -> WrittenLog {
        WrittenLog(Rc::clone(&self.written))
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ScriptedTransport {
    fn poll_read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.incoming.front_mut() {
            None => Ok(Some(0)),
            Some(Chunk::WouldBlock) => {
                self.incoming.pop_front();
                Ok(None)
            }
            Some(Chunk::Bytes(bytes)) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                bytes.drain(..n);
                if bytes.is_empty() {
                    self.incoming.pop_front();
                }
                Ok(Some(n))
            }
        }
    }

    fn wait_readable(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.written.borrow_mut().extend_from_slice(buf);
        Ok(())
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}

// -- server frame builders --------------------------------------------------

pub fn frame(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    write_frame(&mut out, msg_type, payload);
    out
}

pub fn concat(frames: &[Vec<u8>]) -> Vec<u8> {
    frames.concat()
}

pub fn ok_frame() -> Vec<u8> {
    frame(server_msg::OK, &[])
}

pub fn error_frame(code: u32, message: &str, fatal: bool) -> Vec<u8> {
    let mut payload = Vec::new();
    write_uint_field(&mut payload, 1, u64::from(fatal));
    write_uint_field(&mut payload, 2, u64::from(code));
    write_str_field(&mut payload, 3, message);
    write_str_field(&mut payload, 4, "HY000");
    frame(server_msg::ERROR, &payload)
}

pub fn auth_continue_frame(challenge: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    write_bytes_field(&mut payload, 1, challenge);
    frame(server_msg::SESS_AUTHENTICATE_CONTINUE, &payload)
}

pub fn auth_ok_frame() -> Vec<u8> {
    frame(server_msg::SESS_AUTHENTICATE_OK, &[])
}

/// Challenge/response authentication exchange accepted by the server.
pub fn mysql41_auth_script() -> Vec<u8> {
    concat(&[auth_continue_frame(&[0x5A; 20]), auth_ok_frame()])
}

/// Plaintext authentication accepted without a challenge.
pub fn plain_auth_script() -> Vec<u8> {
    auth_ok_frame()
}

pub fn column_frame(name: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    write_uint_field(&mut payload, 1, 7); // BYTES
    write_str_field(&mut payload, 2, name);
    frame(server_msg::RESULTSET_COLUMN_META_DATA, &payload)
}

/// One row; `None` fields are NULL columns.
pub fn row_frame(fields: &[Option<&[u8]>]) -> Vec<u8> {
    let mut payload = Vec::new();
    for field in fields {
        write_bytes_field(&mut payload, 1, field.unwrap_or(&[]));
    }
    frame(server_msg::RESULTSET_ROW, &payload)
}

pub fn fetch_done_frame() -> Vec<u8> {
    frame(server_msg::RESULTSET_FETCH_DONE, &[])
}

pub fn fetch_done_more_frame() -> Vec<u8> {
    frame(server_msg::RESULTSET_FETCH_DONE_MORE_RESULTSETS, &[])
}

pub fn stmt_ok_frame() -> Vec<u8> {
    frame(server_msg::SQL_STMT_EXECUTE_OK, &[])
}

pub fn warning_notice_frame(level: u32, code: u32, message: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    write_uint_field(&mut payload, 1, 1); // Warning
    write_nested(&mut payload, 3, |body| {
        write_uint_field(body, 1, u64::from(level));
        write_uint_field(body, 2, u64::from(code));
        write_str_field(body, 3, message);
    });
    frame(server_msg::NOTICE, &payload)
}

/// `SessionStateChanged` notice with an unsigned scalar value.
pub fn state_notice_u64(param: u32, value: u64) -> Vec<u8> {
    let mut payload = Vec::new();
    write_uint_field(&mut payload, 1, 3); // SessionStateChanged
    write_nested(&mut payload, 3, |body| {
        write_uint_field(body, 1, u64::from(param));
        write_nested(body, 2, |scalar| {
            write_uint_field(scalar, 1, 2); // UINT
            write_uint_field(scalar, 3, value);
        });
    });
    frame(server_msg::NOTICE, &payload)
}

/// `SessionStateChanged` notice with a string scalar value.
pub fn state_notice_str(param: u32, value: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    write_uint_field(&mut payload, 1, 3); // SessionStateChanged
    write_nested(&mut payload, 3, |body| {
        write_uint_field(body, 1, u64::from(param));
        write_nested(body, 2, |scalar| {
            write_uint_field(scalar, 1, 8); // STRING
            write_nested(scalar, 9, |s| {
                write_bytes_field(s, 1, value.as_bytes());
            });
        });
    });
    frame(server_msg::NOTICE, &payload)
}
