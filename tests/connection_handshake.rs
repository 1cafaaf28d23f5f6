//! End-to-end handshake over a real Unix domain socket: a listener accepts
//! one connection, exports a root object, and a client proxy calls it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nsxpc_rt::nsxpc::{
    AcceptAll, Connection, ConnectionRole, ExportedObject, Interface, Invocation, Listener,
    MethodDescriptor, Value, ROOT_PROXY_NUMBER,
};
use nsxpc_rt::transport::{UnixSocketListener, UnixSocketTransport};
use nsxpc_rt::NsxpcError;

struct Adder {
    total: AtomicI64,
}

#[async_trait]
impl ExportedObject for Adder {
    async fn invoke(&self, invocation: Invocation) -> Result<Value, NsxpcError> {
        match invocation.selector.as_str() {
            "add:" => {
                if let Some(Value::UInt(n)) = invocation.args.first() {
                    self.total.fetch_add(*n as i64, Ordering::SeqCst);
                }
                Ok(Value::Int(self.total.load(Ordering::SeqCst)))
            }
            other => Err(NsxpcError::UnknownSelector {
                selector: other.to_string(),
            }),
        }
    }

    fn object_id(&self) -> u64 {
        1
    }

    fn interface_name(&self) -> &str {
        "Adder"
    }
}

#[tokio::test]
async fn client_calls_root_proxy_over_a_real_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("handshake.sock");

    let transport_listener = UnixSocketListener::bind(&socket_path).unwrap();
    let listener = Listener::new(transport_listener, Arc::new(AcceptAll));

    let accept_path = socket_path.clone();
    let server_task = tokio::spawn(async move {
        let connection = listener.accept_one().await.unwrap().unwrap();
        let mut iface = Interface::new("Adder");
        iface.register(MethodDescriptor::new("add:", "q@:q"));
        connection.register_interface(iface).await;
        connection.export_root(Arc::new(Adder {
            total: AtomicI64::new(0),
        }));
        // Keep the server connection alive until the client disconnects.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let _ = accept_path;
    });

    // Give the accept loop a moment to actually be listening.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let transport = UnixSocketTransport::connect(&socket_path).await.unwrap();
    let client = Connection::new(ConnectionRole::Client, Arc::new(transport));
    client.resume();

    let reply = client
        .call(ROOT_PROXY_NUMBER, "add:", "q@:q", vec![Value::UInt(4)], None)
        .await
        .unwrap();
    assert_eq!(reply, Value::Int(4));

    let reply = client
        .call(ROOT_PROXY_NUMBER, "add:", "q@:q", vec![Value::UInt(6)], None)
        .await
        .unwrap();
    assert_eq!(reply, Value::Int(10));

    server_task.await.unwrap();
}
