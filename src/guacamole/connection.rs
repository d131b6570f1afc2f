//! Direction-labeled Guacamole connection wrapper
//!
//! Wraps one half of the proxy (the client-facing leg, or the guacd-facing
//! leg) behind a buffered reader so the handshake can speak instructions
//! while leaving the splice core free to read raw bytes afterward.

use crate::codec::{self, Instruction};
use std::fmt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;

/// Which side of the proxy a `GuacamoleConnection` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward the connecting client.
    Reverse,
    /// Toward guacd.
    Forward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Reverse => write!(f, "reverse"),
            Direction::Forward => write!(f, "forward"),
        }
    }
}

/// A raw connection plus whatever bytes the instruction reader had already
/// buffered but not consumed when the handshake handed it off.
pub struct HandoffConnection<T> {
    pub leftover: Vec<u8>,
    pub inner: T,
}

/// Prepends buffered leftover bytes to an inner reader so nothing observed
/// during the handshake's buffered reads is lost once the splice core takes
/// over raw byte copying.
pub struct LeftoverReader<T> {
    leftover: Vec<u8>,
    pos: usize,
    inner: T,
}

impl<T> LeftoverReader<T> {
    pub fn new(leftover: Vec<u8>, inner: T) -> Self {
        Self { leftover, pos: 0, inner }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for LeftoverReader<T> {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.pos < self.leftover.len() {
            let remaining = &self.leftover[self.pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            self.pos += n;
            return std::task::Poll::Ready(Ok(()));
        }
        std::pin::Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for LeftoverReader<T> {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// One leg of a Guacamole handshake: a buffered reader/writer pair plus a
/// direction label used for log context.
pub struct GuacamoleConnection<T> {
    direction: Direction,
    reader: BufReader<T>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> GuacamoleConnection<T> {
    pub fn new(direction: Direction, stream: T) -> Self {
        Self { direction, reader: BufReader::new(stream) }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub async fn read_instruction(&mut self) -> codec::Result<Instruction> {
        codec::decode(&mut self.reader).await
    }

    pub async fn write_instruction(&mut self, instruction: &Instruction) -> codec::Result<()> {
        codec::write_instruction(self.reader.get_mut(), instruction).await
    }

    /// Surrender the underlying connection. Any bytes already pulled into
    /// the buffered reader's internal buffer but not yet consumed are
    /// captured into `leftover` so the splice core can read them first.
    pub fn into_raw(mut self) -> HandoffConnection<T> {
        let leftover = {
            let buf = self.reader.buffer();
            buf.to_vec()
        };
        // Drain the buffer's accounting without touching the underlying stream.
        let consumed = leftover.len();
        std::pin::Pin::new(&mut self.reader).consume(consumed);
        HandoffConnection { leftover, inner: self.reader.into_inner() }
    }
}

pub type TcpGuacamoleConnection = GuacamoleConnection<TcpStream>;
