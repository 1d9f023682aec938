//! RESP protocol sync streaming parser.
//!
//! Used wherever frames come off a blocking reader, most notably replaying
//! the append-only file at startup.

use crate::{RespError, RespValue};
use bytes::Bytes;
use std::io::{BufRead, Read};

/// RESP protocol sync parser over any buffered reader.
pub struct RespParser<R: BufRead> {
    reader: R,
}

impl<R: BufRead> RespParser<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Parse the next RESP value.
    ///
    /// Returns `RespError::UnexpectedEof` on a clean end of stream (no bytes
    /// of a new frame read yet), which callers use as the stop condition.
    pub fn parse(&mut self) -> Result<RespValue, RespError> {
        let line = self.read_line()?;
        if line.is_empty() {
            return Err(RespError::InvalidFormat("empty line".to_string()));
        }

        match line[0] {
            b'*' => self.parse_array(&line),
            b'$' => self.parse_bulk(&line),
            b':' => parse_int(&line),
            b'+' => Ok(RespValue::SimpleString(Bytes::copy_from_slice(&line[1..]))),
            b'-' => Ok(RespValue::Error(Bytes::copy_from_slice(&line[1..]))),
            other => Err(RespError::InvalidType(other)),
        }
    }

    /// Read one CRLF-terminated header line, without the terminator.
    fn read_line(&mut self) -> Result<Vec<u8>, RespError> {
        let mut line = Vec::new();
        let n = self.reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Err(RespError::UnexpectedEof);
        }
        while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }

    fn parse_bulk(&mut self, line: &[u8]) -> Result<RespValue, RespError> {
        let len = parse_len(&line[1..])?;
        let Some(len) = len else {
            return Ok(RespValue::Null);
        };

        let mut buffer = vec![0u8; len];
        self.reader.read_exact(&mut buffer)?;
        let mut crlf = [0u8; 2];
        self.reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(RespError::InvalidFormat(
                "expected \\r\\n after bulk string".to_string(),
            ));
        }
        Ok(RespValue::BulkString(Some(Bytes::from(buffer))))
    }

    fn parse_array(&mut self, line: &[u8]) -> Result<RespValue, RespError> {
        let count = parse_len(&line[1..])?;
        let Some(count) = count else {
            return Ok(RespValue::Null);
        };

        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(self.parse()?);
        }
        Ok(RespValue::Array(items))
    }
}

fn parse_int(line: &[u8]) -> Result<RespValue, RespError> {
    let s = std::str::from_utf8(&line[1..])
        .map_err(|_| RespError::InvalidFormat("non-utf8 integer".to_string()))?;
    let n = s
        .parse::<i64>()
        .map_err(|_| RespError::InvalidFormat(format!("invalid integer: {s}")))?;
    Ok(RespValue::Integer(n))
}

/// Parse a `$`/`*` header length; -1 means nil.
fn parse_len(digits: &[u8]) -> Result<Option<usize>, RespError> {
    let s = std::str::from_utf8(digits)
        .map_err(|_| RespError::InvalidFormat("non-utf8 length".to_string()))?;
    let n = s
        .parse::<i64>()
        .map_err(|_| RespError::InvalidFormat(format!("invalid length: {s}")))?;
    match n {
        -1 => Ok(None),
        n if n < 0 => Err(RespError::InvalidFormat(format!("invalid length: {n}"))),
        n => Ok(Some(n as usize)),
    }
}

/// Convenience wrapper taking any reader and a byte limit.
///
/// Used for log replay: reads at most `max_bytes` (0 = unlimited), so a
/// rewrite can replay exactly the prefix that existed when it started.
pub fn limited_parser<R: Read>(reader: R, max_bytes: u64) -> RespParser<std::io::BufReader<std::io::Take<R>>> {
    let limit = if max_bytes == 0 { u64::MAX } else { max_bytes };
    RespParser::new(std::io::BufReader::new(reader.take(limit)))
}
