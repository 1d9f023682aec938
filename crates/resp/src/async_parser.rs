//! RESP protocol async parser

use crate::{RespError, RespValue};
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Default maximum frame size: 512MB (prevents memory overflow attacks)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// RESP protocol async parser
pub struct AsyncRespParser<R: AsyncRead + Unpin> {
    reader: BufReader<R>,
    max_bytes: usize,
    bytes_read: usize,
}

impl<R: AsyncRead + Unpin> AsyncRespParser<R> {
    /// Create a new async parser (using default max frame size)
    pub fn new(reader: R) -> Self {
        Self::with_max_bytes(reader, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new async parser with an explicit per-frame size limit.
    pub fn with_max_bytes(reader: R, max_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_bytes,
            bytes_read: 0,
        }
    }

    fn check_frame_size(&mut self, additional: usize) -> Result<(), RespError> {
        self.bytes_read = self.bytes_read.saturating_add(additional);
        if self.bytes_read > self.max_bytes {
            Err(RespError::FrameTooLarge(self.bytes_read, self.max_bytes))
        } else {
            Ok(())
        }
    }

    /// Parse the next RESP value off the stream.
    ///
    /// The frame-size counter resets at every top-level frame, so the limit
    /// applies per frame rather than per connection.
    pub async fn parse(&mut self) -> Result<RespValue, RespError> {
        self.bytes_read = 0;
        self.parse_value().await
    }

    async fn parse_value(&mut self) -> Result<RespValue, RespError> {
        let line = self.read_line().await?;
        if line.is_empty() {
            return Err(RespError::InvalidFormat("empty line".to_string()));
        }

        match line[0] {
            b'*' => self.parse_array(&line).await,
            b'$' => self.parse_bulk(&line).await,
            b':' => parse_int(&line),
            b'+' => Ok(RespValue::SimpleString(Bytes::copy_from_slice(&line[1..]))),
            b'-' => Ok(RespValue::Error(Bytes::copy_from_slice(&line[1..]))),
            other => Err(RespError::InvalidType(other)),
        }
    }

    /// Read one CRLF-terminated header line, without the terminator.
    async fn read_line(&mut self) -> Result<Vec<u8>, RespError> {
        let mut line = Vec::new();
        let n = self.reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(RespError::UnexpectedEof);
        }
        self.check_frame_size(n)?;
        while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Parse bulk string body: $5\r\nhello\r\n
    async fn parse_bulk(&mut self, line: &[u8]) -> Result<RespValue, RespError> {
        let len = parse_len(&line[1..])?;
        let Some(len) = len else {
            return Ok(RespValue::Null);
        };

        self.check_frame_size(len + 2)?;
        let mut buffer = vec![0u8; len];
        self.reader.read_exact(&mut buffer).await?;

        let mut crlf = [0u8; 2];
        self.reader.read_exact(&mut crlf).await?;
        if crlf != [b'\r', b'\n'] {
            return Err(RespError::InvalidFormat(
                "expected \\r\\n after bulk string".to_string(),
            ));
        }
        Ok(RespValue::BulkString(Some(Bytes::from(buffer))))
    }

    /// Parse array body: *2\r\n$3\r\nGET\r\n$3\r\nkey\r\n
    async fn parse_array(&mut self, line: &[u8]) -> Result<RespValue, RespError> {
        let count = parse_len(&line[1..])?;
        let Some(count) = count else {
            return Ok(RespValue::Null);
        };

        if count > 1024 * 1024 {
            return Err(RespError::InvalidFormat(format!(
                "array too large: {count} elements"
            )));
        }

        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let fut = Box::pin(self.parse_value());
            items.push(fut.await?);
        }
        Ok(RespValue::Array(items))
    }
}

fn parse_int(line: &[u8]) -> Result<RespValue, RespError> {
    let s = std::str::from_utf8(&line[1..])
        .map_err(|_| RespError::InvalidFormat("non-utf8 integer".to_string()))?;
    let n = s
        .parse::<i128>()
        .map_err(|_| RespError::InvalidFormat(format!("invalid integer: {s}")))?;
    if n > i64::MAX as i128 || n < i64::MIN as i128 {
        return Err(RespError::IntegerOverflow);
    }
    Ok(RespValue::Integer(n as i64))
}

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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_parse_simple_string() {
        let reader = Builder::new().read(b"+OK\r\n").build();
        let mut parser = AsyncRespParser::with_max_bytes(reader, 1024);
        let result = parser.parse().await.unwrap();
        assert_eq!(result, RespValue::SimpleString(Bytes::from("OK")));
    }

    #[tokio::test]
    async fn test_parse_bulk_string() {
        let reader = Builder::new().read(b"$5\r\nhello\r\n").build();
        let mut parser = AsyncRespParser::with_max_bytes(reader, 1024);
        let result = parser.parse().await.unwrap();
        assert_eq!(
            result,
            RespValue::BulkString(Some(Bytes::from(b"hello" as &[u8])))
        );
    }

    #[tokio::test]
    async fn test_parse_command_array() {
        let reader = Builder::new().read(b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n").build();
        let mut parser = AsyncRespParser::with_max_bytes(reader, 1024);
        let result = parser.parse().await.unwrap();
        let cmd = result.to_command().expect("command frame");
        assert_eq!(&cmd[0][..], b"GET");
        assert_eq!(&cmd[1][..], b"key");
    }

    #[tokio::test]
    async fn test_mixed_array_is_not_a_command() {
        let reader = Builder::new().read(b"*2\r\n$3\r\nGET\r\n:1\r\n").build();
        let mut parser = AsyncRespParser::with_max_bytes(reader, 1024);
        let result = parser.parse().await.unwrap();
        assert!(result.to_command().is_none());
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let reader = Builder::new().read(b"$9999999999\r\n").build();
        let mut parser = AsyncRespParser::with_max_bytes(reader, 1024);
        let result = parser.parse().await;
        assert!(matches!(result, Err(RespError::FrameTooLarge(_, _))));
    }

    #[tokio::test]
    async fn test_frame_size_resets_between_frames() {
        let mut data = Vec::new();
        for _ in 0..8 {
            data.extend_from_slice(b"$100\r\n");
            data.extend_from_slice(&[b'x'; 100]);
            data.extend_from_slice(b"\r\n");
        }
        let reader = Builder::new().read(&data).build();
        let mut parser = AsyncRespParser::with_max_bytes(reader, 256);
        for _ in 0..8 {
            parser.parse().await.unwrap();
        }
    }
}
