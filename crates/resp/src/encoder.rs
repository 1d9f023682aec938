//! RESP protocol sync encoder

use crate::RespValue;
use std::io::{self, Write};

/// RESP protocol sync encoder
pub struct RespEncoder<W: Write> {
    writer: W,
}

impl<W: Write> RespEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encode a RESP value and write it out.
    pub fn encode(&mut self, value: &RespValue) -> io::Result<()> {
        self.encode_inner(value)?;
        self.writer.flush()
    }

    fn encode_inner(&mut self, value: &RespValue) -> io::Result<()> {
        match value {
            RespValue::SimpleString(s) => {
                self.writer.write_all(b"+")?;
                self.writer.write_all(s)?;
                self.writer.write_all(b"\r\n")?;
            }
            RespValue::Error(e) => {
                self.writer.write_all(b"-")?;
                self.writer.write_all(e)?;
                self.writer.write_all(b"\r\n")?;
            }
            RespValue::Integer(i) => {
                write!(self.writer, ":{}\r\n", i)?;
            }
            RespValue::BulkString(Some(bytes)) => {
                write!(self.writer, "${}\r\n", bytes.len())?;
                self.writer.write_all(bytes)?;
                self.writer.write_all(b"\r\n")?;
            }
            RespValue::BulkString(None) | RespValue::Null => {
                self.writer.write_all(b"$-1\r\n")?;
            }
            RespValue::Array(items) => {
                write!(self.writer, "*{}\r\n", items.len())?;
                for item in items {
                    self.encode_inner(item)?;
                }
            }
        }
        Ok(())
    }
}

/// Encode a RESP value into a fresh byte vector.
pub fn encode_to_vec(value: &RespValue) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut encoder = RespEncoder::new(&mut buffer);
    encoder
        .encode(value)
        .expect("writing to a Vec cannot fail");
    buffer
}
