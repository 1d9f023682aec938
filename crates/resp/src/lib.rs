//! RESP (REdis Serialization Protocol) support library
//!
//! Frame model, streaming parsers (sync for log replay, async for sockets)
//! and encoders, plus the canonical reply constructors.

mod async_encoder;
mod async_parser;
mod encoder;
mod parser;
pub mod reply;

pub use async_encoder::AsyncRespEncoder;
pub use async_parser::{AsyncRespParser, DEFAULT_MAX_FRAME_SIZE};
pub use encoder::{encode_to_vec, RespEncoder};
pub use parser::{limited_parser, RespParser};

use bytes::Bytes;
use std::io;

/// A command line as sent by clients: the verb followed by its arguments.
pub type CmdLine = Vec<Bytes>;

/// Build a command line from string literals.
pub fn cmdline(parts: &[&str]) -> CmdLine {
    parts
        .iter()
        .map(|s| Bytes::copy_from_slice(s.as_bytes()))
        .collect()
}

/// RESP frame
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(Bytes),
    /// Error: -ERR message\r\n
    Error(Bytes),
    /// Integer: :123\r\n
    Integer(i64),
    /// Bulk string: $5\r\nhello\r\n
    BulkString(Option<Bytes>),
    /// Array: *2\r\n$3\r\nGET\r\n$3\r\nkey\r\n
    Array(Vec<RespValue>),
    /// Null: $-1\r\n
    Null,
}

impl RespValue {
    /// Interpret this frame as a command line.
    ///
    /// Only non-empty arrays whose elements are all bulk strings are valid
    /// command frames; anything else yields `None`.
    pub fn to_command(&self) -> Option<CmdLine> {
        match self {
            RespValue::Array(items) if !items.is_empty() => {
                let mut cmd = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        RespValue::BulkString(Some(bytes)) => cmd.push(bytes.clone()),
                        _ => return None,
                    }
                }
                Some(cmd)
            }
            _ => None,
        }
    }

    /// Wrap a command line into its wire frame.
    pub fn from_command(cmd: CmdLine) -> Self {
        RespValue::Array(
            cmd.into_iter()
                .map(|s| RespValue::BulkString(Some(s)))
                .collect(),
        )
    }

    /// True for `-...` frames.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

/// RESP parsing error
#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("frame too large: {0} bytes (max: {1} bytes)")]
    FrameTooLarge(usize, usize),
    #[error("invalid RESP type: {0}")]
    InvalidType(u8),
}
