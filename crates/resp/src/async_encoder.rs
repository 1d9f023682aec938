//! RESP protocol async encoder

use crate::{encode_to_vec, RespValue};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// RESP protocol async encoder
pub struct AsyncRespEncoder<W: AsyncWrite + Unpin> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> AsyncRespEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encode a RESP value and flush it to the stream.
    pub async fn encode(&mut self, value: &RespValue) -> io::Result<()> {
        let buf = encode_to_vec(value);
        self.writer.write_all(&buf).await?;
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_encode_to_buffer() {
        let mut buf = Vec::new();
        {
            let mut encoder = AsyncRespEncoder::new(&mut buf);
            encoder
                .encode(&RespValue::SimpleString(Bytes::from("PONG")))
                .await
                .unwrap();
        }
        assert_eq!(buf, b"+PONG\r\n");
    }
}
