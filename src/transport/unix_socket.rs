//! Unix domain socket transport: length-prefixed `bincode` framing over a
//! `tokio::net::UnixStream`, generalized from a benchmark-oriented socket
//! transport to carry [`WireMessage`] frames and to accept a connection per
//! spawned listener task.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::NsxpcResult;
use crate::nsxpc::message::WireMessage;
use crate::transport::{io_error, Transport, TransportListener};

/// Messages larger than this are rejected rather than trusted blindly, the
/// way the socket transport this is grounded on caps message size before
/// allocating a receive buffer.
const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

pub struct UnixSocketTransport {
    stream: Mutex<UnixStream>,
}

impl UnixSocketTransport {
    pub fn new(stream: UnixStream) -> Self {
        UnixSocketTransport {
            stream: Mutex::new(stream),
        }
    }

    pub async fn connect(path: impl AsRef<Path>) -> NsxpcResult<Self> {
        let stream = UnixStream::connect(path.as_ref()).await.map_err(io_error)?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Transport for UnixSocketTransport {
    async fn send(&self, message: WireMessage) -> NsxpcResult<()> {
        let bytes = message.to_bytes()?;
        let len = bytes.len() as u32;
        let mut stream = self.stream.lock().await;
        stream.write_all(&len.to_le_bytes()).await.map_err(io_error)?;
        stream.write_all(&bytes).await.map_err(io_error)?;
        stream.flush().await.map_err(io_error)?;
        Ok(())
    }

    async fn recv(&self) -> NsxpcResult<Option<WireMessage>> {
        let mut stream = self.stream.lock().await;
        let mut len_bytes = [0u8; 4];
        match stream.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(io_error(e)),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_MESSAGE_BYTES {
            return Err(crate::error::NsxpcError::malformed(format!(
                "frame of {len} bytes exceeds maximum"
            )));
        }
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.map_err(io_error)?;
        Ok(Some(WireMessage::from_bytes(&buf)?))
    }

    async fn close(&self) -> NsxpcResult<()> {
        self.stream.lock().await.shutdown().await.map_err(io_error)
    }
}

/// Binds a listener socket, removing a stale socket file from a previous
/// run first (mirrors the cleanup-on-bind behavior of the socket transport
/// this is grounded on).
pub struct UnixSocketListener {
    listener: UnixListener,
    path: String,
}

impl UnixSocketListener {
    pub fn bind(path: impl AsRef<Path>) -> NsxpcResult<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        if path.as_ref().exists() {
            let _ = std::fs::remove_file(path.as_ref());
        }
        let listener = UnixListener::bind(path.as_ref()).map_err(io_error)?;
        Ok(UnixSocketListener {
            listener,
            path: path_str,
        })
    }
}

impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove socket file {}: {}", self.path, e);
            }
        }
    }
}

#[async_trait]
impl TransportListener for UnixSocketListener {
    async fn accept(&self) -> NsxpcResult<Box<dyn Transport>> {
        let (stream, _addr) = self.listener.accept().await.map_err(io_error)?;
        debug!("accepted unix socket connection on {}", self.path);
        Ok(Box::new(UnixSocketTransport::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nsxpc::message::Flags;

    #[tokio::test]
    async fn round_trips_a_message_over_a_real_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nsxpc-test.sock");
        let listener = UnixSocketListener::bind(&path).unwrap();

        let accept_path = path.clone();
        let server = tokio::spawn(async move {
            let transport = listener.accept().await.unwrap();
            let msg = transport.recv().await.unwrap().unwrap();
            assert_eq!(msg.sequence, Some(3));
            let _ = accept_path;
        });

        let client = UnixSocketTransport::connect(&path).await.unwrap();
        let mut msg = WireMessage::new(Flags::REQUIRED);
        msg.sequence = Some(3);
        client.send(msg).await.unwrap();

        server.await.unwrap();
    }
}
