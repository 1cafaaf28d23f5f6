//! Two independent connections share one `Arbiter` through the
//! `FileCoordination` wire object, the way two processes on the same host
//! would contend for the same file through one daemon.

use std::sync::Arc;

use nsxpc_rt::coordination::Arbiter;
use nsxpc_rt::nsxpc::{Connection, ConnectionRole, Value, ROOT_PROXY_NUMBER};
use nsxpc_rt::service::{interface as fc_interface, FileCoordinationObject};
use nsxpc_rt::transport::LocalTransport;

async fn new_client(arbiter: Arc<Arbiter>) -> Arc<Connection> {
    let (client_half, server_half) = LocalTransport::pair(8);
    let server = Connection::new(ConnectionRole::Server, Arc::new(server_half));
    server.register_interface(fc_interface()).await;
    server.export_root(Arc::new(FileCoordinationObject::new(arbiter)));
    server.resume();

    let client = Connection::new(ConnectionRole::Client, Arc::new(client_half));
    client.resume();
    client
}

#[tokio::test]
async fn a_reader_waits_behind_another_connections_writer() {
    let arbiter = Arbiter::new();
    let writer = new_client(arbiter.clone()).await;
    let reader = new_client(arbiter.clone()).await;

    let write_token = writer
        .call(
            ROOT_PROXY_NUMBER,
            "coordinateWrite:purpose:",
            "NSString@:NSString",
            vec![Value::Str("/shared/doc".into()), Value::Str("editor".into())],
            None,
        )
        .await
        .unwrap();

    // The reader's coordinate call won't resolve until the writer completes,
    // so race it against the writer's completion rather than awaiting it
    // directly before the writer is done.
    let reader_clone = reader.clone();
    let reader_task = tokio::spawn(async move {
        reader_clone
            .call(
                ROOT_PROXY_NUMBER,
                "coordinateRead:purpose:",
                "NSString@:NSString",
                vec![Value::Str("/shared/doc".into()), Value::Str("viewer".into())],
                None,
            )
            .await
            .unwrap()
    });

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    writer
        .call_oneway(ROOT_PROXY_NUMBER, "complete:", "v@:NSString", vec![write_token])
        .await
        .unwrap();

    let read_token = reader_task.await.unwrap();
    reader
        .call_oneway(ROOT_PROXY_NUMBER, "complete:", "v@:NSString", vec![read_token])
        .await
        .unwrap();
}

#[tokio::test]
async fn cooperating_readers_from_different_connections_proceed_together() {
    let arbiter = Arbiter::new();
    let a = new_client(arbiter.clone()).await;
    let b = new_client(arbiter.clone()).await;

    let token_a = a
        .call(
            ROOT_PROXY_NUMBER,
            "coordinateRead:purpose:",
            "NSString@:NSString",
            vec![Value::Str("/shared/index".into()), Value::Str("search".into())],
            None,
        )
        .await
        .unwrap();
    let token_b = b
        .call(
            ROOT_PROXY_NUMBER,
            "coordinateRead:purpose:",
            "NSString@:NSString",
            vec![Value::Str("/shared/index".into()), Value::Str("search".into())],
            None,
        )
        .await
        .unwrap();

    a.call_oneway(ROOT_PROXY_NUMBER, "complete:", "v@:NSString", vec![token_a])
        .await
        .unwrap();
    b.call_oneway(ROOT_PROXY_NUMBER, "complete:", "v@:NSString", vec![token_b])
        .await
        .unwrap();
}
