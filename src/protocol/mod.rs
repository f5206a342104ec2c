//! Wire protocol: envelope framing, field-tagged payload codec, client
//! message builders and server message parsers.

pub mod backend;
pub mod frame;
pub mod frontend;
pub mod wire;
