use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{KvmError, Result};

/// One deadline bounds an entire accumulation attempt, not each read.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

const READ_CHUNK: usize = 1024;

/// Byte-stream framing for one client connection.
///
/// Bytes read past what the caller asked for are retained in a leftover
/// buffer and served first on the next call. The `&mut self` receivers
/// keep reads mutually exclusive per connection.
pub struct Connection<S> {
    stream: S,
    leftover: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            leftover: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read exactly `n` bytes.
    ///
    /// On timeout the connection is closed with a "Read timeout" reason and
    /// `NoProgress` is returned; any other read failure closes the
    /// connection without a reason and propagates.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.leftover.len() >= n {
            return Ok(self.leftover.split_to(n).to_vec());
        }

        let stream = &mut self.stream;
        let leftover = &mut self.leftover;
        let fill = timeout(READ_TIMEOUT, async {
            let mut chunk = [0u8; READ_CHUNK];
            while leftover.len() < n {
                let got = stream.read(&mut chunk).await?;
                if got == 0 {
                    return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
                }
                leftover.extend_from_slice(&chunk[..got]);
            }
            Ok(())
        })
        .await;

        match fill {
            Err(_) => {
                self.close("Read timeout").await;
                Err(KvmError::NoProgress)
            }
            Ok(Err(e)) => {
                self.close("").await;
                Err(e.into())
            }
            Ok(Ok(())) => Ok(self.leftover.split_to(n).to_vec()),
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut the connection down, preceded by a best-effort reason frame
    /// (4-byte big-endian length + text) when `reason` is non-empty.
    pub async fn close(&mut self, reason: &str) {
        if !reason.is_empty() {
            debug!("closing connection: {reason}");
            let mut frame = Vec::with_capacity(4 + reason.len());
            frame.extend_from_slice(&(reason.len() as u32).to_be_bytes());
            frame.extend_from_slice(reason.as_bytes());
            let _ = self.stream.write_all(&frame).await;
            let _ = self.stream.flush().await;
        }
        let _ = self.stream.shutdown().await;
    }
}
