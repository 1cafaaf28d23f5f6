//! In-process transport over a pair of `tokio::mpsc` channels, used by the
//! demo commands and the crate's own integration tests in place of a real
//! socket.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::{NsxpcError, NsxpcResult};
use crate::nsxpc::message::WireMessage;
use crate::transport::Transport;

pub struct LocalTransport {
    tx: mpsc::Sender<WireMessage>,
    rx: Mutex<mpsc::Receiver<WireMessage>>,
}

impl LocalTransport {
    /// Builds a connected pair: `(a, b)`, where messages sent on `a` are
    /// received on `b` and vice versa.
    pub fn pair(buffer: usize) -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel(buffer);
        let (tx_b, rx_a) = mpsc::channel(buffer);
        (
            LocalTransport {
                tx: tx_a,
                rx: Mutex::new(rx_a),
            },
            LocalTransport {
                tx: tx_b,
                rx: Mutex::new(rx_b),
            },
        )
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, message: WireMessage) -> NsxpcResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| NsxpcError::PeerUnavailable)
    }

    async fn recv(&self) -> NsxpcResult<Option<WireMessage>> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> NsxpcResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nsxpc::message::Flags;

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let (a, b) = LocalTransport::pair(4);
        a.send(WireMessage::new(Flags::REQUIRED)).await.unwrap();
        let received = b.recv().await.unwrap();
        assert!(received.is_some());

        b.send(WireMessage::new(Flags::REQUIRED)).await.unwrap();
        let received = a.recv().await.unwrap();
        assert!(received.is_some());
    }

    #[tokio::test]
    async fn recv_returns_none_after_peer_drop() {
        let (a, b) = LocalTransport::pair(4);
        drop(a);
        assert!(b.recv().await.unwrap().is_none());
    }
}
