//! Listener: accepts incoming connections and hands each to a
//! caller-supplied delegate that decides accept/reject, the way a real
//! NSXPC listener consults its delegate before handing off a connection.

use std::sync::Arc;

use tracing::info;

use crate::error::NsxpcResult;
use crate::nsxpc::connection::{Connection, ConnectionRole};
use crate::transport::TransportListener;

/// Decides whether to accept a newly arrived connection and, if so, sets it
/// up (registers interfaces, exports a root object, resumes it).
#[async_trait::async_trait]
pub trait ListenerDelegate: Send + Sync {
    async fn should_accept(&self, connection: &Arc<Connection>) -> bool;
}

pub struct Listener<L: TransportListener> {
    transport_listener: L,
    delegate: Arc<dyn ListenerDelegate>,
    /// Named endpoint this listener publishes under, or `None` for an
    /// anonymous listener whose endpoint is only learned by whoever receives
    /// it embedded in a message.
    pub service_name: Option<String>,
}

impl<L: TransportListener + 'static> Listener<L> {
    pub fn new(transport_listener: L, delegate: Arc<dyn ListenerDelegate>) -> Self {
        Listener {
            transport_listener,
            delegate,
            service_name: None,
        }
    }

    pub fn named(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Accepts one connection, consults the delegate, and resumes it if
    /// accepted. Loop this in a task to keep serving.
    pub async fn accept_one(&self) -> NsxpcResult<Option<Arc<Connection>>> {
        let transport = self.transport_listener.accept().await?;
        let connection = Connection::new(ConnectionRole::Server, Arc::from(transport));
        if self.delegate.should_accept(&connection).await {
            connection.resume();
            info!(
                "accepted connection on listener {:?}",
                self.service_name.as_deref().unwrap_or("<anonymous>")
            );
            Ok(Some(connection))
        } else {
            connection.invalidate().await;
            Ok(None)
        }
    }
}

/// A delegate that accepts every connection unconditionally; useful for
/// demo/test services with no access control of their own.
pub struct AcceptAll;

#[async_trait::async_trait]
impl ListenerDelegate for AcceptAll {
    async fn should_accept(&self, _connection: &Arc<Connection>) -> bool {
        true
    }
}
