//! Minimal RESP client used for peer-to-peer traffic (and by the
//! integration tests). One request/reply in flight at a time; pools hand a
//! client to one caller at a time so no internal locking is needed.

use resp::{AsyncRespEncoder, AsyncRespParser, CmdLine, RespError, RespValue};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;

pub struct Client {
    parser: AsyncRespParser<ReadHalf<TcpStream>>,
    encoder: AsyncRespEncoder<WriteHalf<TcpStream>>,
    closed: bool,
}

impl Client {
    pub async fn connect(addr: &str) -> std::io::Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Client {
            parser: AsyncRespParser::new(reader),
            encoder: AsyncRespEncoder::new(writer),
            closed: false,
        })
    }

    /// Send one command and wait for its reply. Any transport error marks
    /// the client closed; a pool will not reuse it.
    pub async fn send(&mut self, cmdline: &CmdLine) -> Result<RespValue, RespError> {
        if self.closed {
            return Err(RespError::UnexpectedEof);
        }
        let frame = RespValue::from_command(cmdline.clone());
        if let Err(e) = self.encoder.encode(&frame).await {
            self.closed = true;
            return Err(e.into());
        }
        match self.parser.parse().await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }

    /// Read one server-pushed frame (pub/sub delivery) without sending
    /// anything.
    pub async fn recv(&mut self) -> Result<RespValue, RespError> {
        match self.parser.parse().await {
            Ok(frame) => Ok(frame),
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
