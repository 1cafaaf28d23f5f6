//! Duplex transport abstraction: the "external collaborator" the connection
//! engine talks to instead of touching sockets directly.
//!
//! Shaped after a transport trait whose server/client halves are
//! initialized separately and which exchanges length-framed byte messages;
//! generalized here to carry [`WireMessage`](crate::nsxpc::message::WireMessage)
//! frames instead of benchmark payloads.

use async_trait::async_trait;

use crate::error::{NsxpcError, NsxpcResult};
use crate::nsxpc::message::WireMessage;

pub mod local;
pub mod registry;
pub mod unix_socket;

pub use local::LocalTransport;
pub use registry::{InMemoryNameService, NameService};
pub use unix_socket::{UnixSocketListener, UnixSocketTransport};

/// A single duplex connection: one side of a pair that can send and receive
/// framed [`WireMessage`]s and be explicitly closed.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: WireMessage) -> NsxpcResult<()>;

    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    async fn recv(&self) -> NsxpcResult<Option<WireMessage>>;

    async fn close(&self) -> NsxpcResult<()>;
}

/// Connects or listens for connections, producing concrete [`Transport`]
/// instances. Implemented per transport kind (in-process, Unix socket, ...).
#[async_trait]
pub trait TransportListener: Send + Sync {
    async fn accept(&self) -> NsxpcResult<Box<dyn Transport>>;
}

pub(crate) fn io_error(e: std::io::Error) -> NsxpcError {
    NsxpcError::malformed(format!("transport io error: {e}"))
}
