//! # xpcd - NSXPC-style object messaging daemon
//!
//! `xpcd` hosts a single root `FileCoordination` object behind the wire
//! engine and arbitrates file access intents across every connection that
//! attaches to it. Three subcommands are provided:
//!
//! - `serve` binds a real Unix domain socket and serves it indefinitely.
//! - `demo-server` runs the identical stack over an in-process loopback
//!   transport and drives a scripted exchange against it, useful for
//!   exercising the arbiter without a second process.
//! - `demo-client` dials a running `serve` instance and drives the same
//!   scripted exchange over the real socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

use nsxpc_rt::coordination::Arbiter;
use nsxpc_rt::nsxpc::{Connection, ConnectionRole, Listener, ListenerDelegate, Value, ROOT_PROXY_NUMBER};
use nsxpc_rt::service::{interface as fc_interface, FileCoordinationObject, INTERFACE_NAME};
use nsxpc_rt::transport::{InMemoryNameService, LocalTransport, NameService, UnixSocketListener, UnixSocketTransport};
use nsxpc_rt::{Args, Command};

mod logging;
use logging::ColorizedFormatter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    match args.command.clone() {
        Command::Serve {
            socket,
            service_name,
            call_timeout_secs,
        } => serve(socket, service_name, call_timeout_secs).await,
        Command::DemoServer { paths } => demo_server(paths).await,
        Command::DemoClient { socket } => demo_client(socket).await,
    }
}

/// Sets up a single tracing subscriber for the whole process. Diagnostic
/// verbosity is controlled by `-v`/`-vv`/`-vvv`; `--quiet` switches the
/// colorized user-facing layer off in favor of plain stderr output.
fn init_tracing(args: &Args) {
    let level = match args.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    if args.quiet {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .event_format(ColorizedFormatter)
            .init();
    }
}

/// Delegate used by `serve`/`demo-server`: every accepted connection gets the
/// `FileCoordination` interface registered and the shared arbiter exported as
/// its root object before the delegate votes to accept it.
struct FcDelegate {
    arbiter: Arc<Arbiter>,
}

#[async_trait]
impl ListenerDelegate for FcDelegate {
    async fn should_accept(&self, connection: &Arc<Connection>) -> bool {
        connection.register_interface(fc_interface()).await;
        connection.export_root(Arc::new(FileCoordinationObject::new(self.arbiter.clone())));
        true
    }
}

async fn serve(socket: PathBuf, service_name: String, call_timeout_secs: u64) -> Result<()> {
    let _ = call_timeout_secs; // connections currently use a fixed default; see DESIGN.md
    let arbiter = Arbiter::new();

    let name_service = InMemoryNameService::new();
    name_service.register(&service_name, &socket.to_string_lossy());

    let transport_listener = UnixSocketListener::bind(&socket)?;
    let delegate = Arc::new(FcDelegate { arbiter });
    let listener = Listener::new(transport_listener, delegate).named(service_name.clone());

    info!("xpcd serving '{service_name}' as {INTERFACE_NAME} on {}", socket.display());

    loop {
        match listener.accept_one().await {
            Ok(Some(_connection)) => {}
            Ok(None) => {}
            Err(e) => warn!("failed to accept a connection: {e}"),
        }
    }
}

/// Runs the same listener stack as `serve` over an in-process loopback pair
/// and drives a scripted read/write exchange across `paths` distinct files
/// so the arbiter's behavior can be inspected without a second process.
async fn demo_server(paths: usize) -> Result<()> {
    let arbiter = Arbiter::new();

    let (client_half, server_half) = LocalTransport::pair(16);
    let server = Connection::new(ConnectionRole::Server, Arc::new(server_half));
    let client = Connection::new(ConnectionRole::Client, Arc::new(client_half));

    server.register_interface(fc_interface()).await;
    server.export_root(Arc::new(FileCoordinationObject::new(arbiter)));
    server.resume();
    client.resume();

    for i in 0..paths.max(1) {
        let path = format!("/demo/file-{i}");

        let token = client
            .call(
                ROOT_PROXY_NUMBER,
                "coordinateWrite:purpose:",
                "NSString@:NSString",
                vec![
                    Value::Str(path.clone()),
                    Value::Str("demo-server".into()),
                ],
                None,
            )
            .await?;
        info!("coordinated write access to {path}: {token:?}");

        let token_value = token.clone();
        client
            .call_oneway(ROOT_PROXY_NUMBER, "complete:", "v@:NSString", vec![token_value])
            .await?;
        info!("released {path}");
    }

    client.invalidate().await;
    server.invalidate().await;
    Ok(())
}

/// Connects to a running `serve` daemon and drives the same scripted
/// exchange `demo_server` runs locally, but over a real Unix domain socket.
async fn demo_client(socket: PathBuf) -> Result<()> {
    let transport = UnixSocketTransport::connect(&socket).await?;
    let client = Connection::new(ConnectionRole::Client, Arc::new(transport));
    client.resume();

    let token = client
        .call(
            ROOT_PROXY_NUMBER,
            "coordinateRead:purpose:",
            "NSString@:NSString",
            vec![
                Value::Str("/demo/client-probe".into()),
                Value::Str("demo-client".into()),
            ],
            None,
        )
        .await?;
    info!("coordinated read access, token: {token:?}");

    client
        .call_oneway(ROOT_PROXY_NUMBER, "complete:", "v@:NSString", vec![token])
        .await?;
    info!("released /demo/client-probe");

    client.invalidate().await;
    Ok(())
}
