//! Connection engine: per-connection serial dispatch over a
//! [`Transport`](crate::transport::Transport), the proxy tables, pending
//! replies, and the resume/interrupt/invalidate state machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{NsxpcError, NsxpcResult};
use crate::nsxpc::codec::{Reader, Writer};
use crate::nsxpc::interface::InterfaceRegistry;
use crate::nsxpc::message::{Flags, WireMessage};
use crate::nsxpc::object::{ExportedObject, Invocation};
use crate::nsxpc::progress::ProgressBridge;
use crate::nsxpc::proxy::{ExportTable, ImportTable, ROOT_PROXY_NUMBER};
use crate::nsxpc::value::{
    build_invocation, decode_value, encode_value, invocation_args, invocation_selector,
    invocation_signature, visit_proxies, Value,
};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Suspended = 0,
    Running = 1,
    Interrupted = 2,
    Invalidated = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Suspended,
            1 => ConnectionState::Running,
            2 => ConnectionState::Interrupted,
            _ => ConnectionState::Invalidated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Server,
    Client,
}

struct PendingReply {
    sender: oneshot::Sender<NsxpcResult<Value>>,
    #[allow(dead_code)]
    selector: String,
    #[allow(dead_code)]
    user_info: HashMap<String, String>,
}

type Handler = Box<dyn Fn() + Send + Sync>;

/// One NSXPC connection: either end of a duplex link to a peer, exporting
/// and importing proxies, dispatching invocations, and bridging progress.
pub struct Connection {
    role: ConnectionRole,
    transport: Arc<dyn Transport>,
    state: AtomicU8,
    generation: AtomicU64,
    sequence: AtomicU64,
    pub exports: ExportTable,
    pub imports: ImportTable,
    pending_replies: DashMap<u64, PendingReply>,
    exported_objects: DashMap<u64, Arc<dyn ExportedObject>>,
    interfaces: Mutex<InterfaceRegistry>,
    pub progress: ProgressBridge,
    outstanding_replies: AtomicU64,
    interruption_handler: Mutex<Option<Handler>>,
    invalidation_handler: Mutex<Option<Handler>>,
    default_call_timeout: Duration,
}

impl Connection {
    pub fn new(role: ConnectionRole, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Connection {
            role,
            transport,
            state: AtomicU8::new(ConnectionState::Suspended as u8),
            generation: AtomicU64::new(0),
            sequence: AtomicU64::new(1),
            exports: ExportTable::new(),
            imports: ImportTable::new(),
            pending_replies: DashMap::new(),
            exported_objects: DashMap::new(),
            interfaces: Mutex::new(InterfaceRegistry::new()),
            progress: ProgressBridge::new(),
            outstanding_replies: AtomicU64::new(0),
            interruption_handler: Mutex::new(None),
            invalidation_handler: Mutex::new(None),
            default_call_timeout: Duration::from_secs(30),
        })
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub async fn set_interrupt_handler(&self, handler: Handler) {
        *self.interruption_handler.lock().await = Some(handler);
    }

    pub async fn set_invalidation_handler(&self, handler: Handler) {
        *self.invalidation_handler.lock().await = Some(handler);
    }

    pub async fn register_interface(&self, interface: crate::nsxpc::interface::Interface) {
        self.interfaces.lock().await.insert(interface);
    }

    pub fn export_root(&self, object: Arc<dyn ExportedObject>) {
        self.exports.install_root(object.object_id(), object.interface_name());
        self.exported_objects.insert(object.object_id(), object);
    }

    /// Exports `object` under its interface, returning the proxy number the
    /// peer should be handed (via a `Value::Proxy`).
    pub fn export(&self, object: Arc<dyn ExportedObject>) -> u64 {
        let number = self.exports.export(object.object_id(), object.interface_name());
        self.exported_objects.insert(object.object_id(), object);
        number
    }

    /// Resumes the connection: spawns the inbound read loop and transitions
    /// Suspended -> Running. A connection must be resumed before any
    /// invocation may be sent or received.
    pub fn resume(self: &Arc<Self>) {
        let prior = self.state.swap(ConnectionState::Running as u8, Ordering::SeqCst);
        if prior != ConnectionState::Suspended as u8 {
            warn!("resume called on a connection that was not suspended");
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.read_loop().await;
        });
    }

    async fn read_loop(self: Arc<Self>) {
        loop {
            if self.state() == ConnectionState::Invalidated {
                return;
            }
            match self.transport.recv().await {
                Ok(Some(message)) => {
                    if let Err(e) = self.handle_inbound(message).await {
                        warn!("dropping malformed inbound message: {e}");
                    }
                }
                Ok(None) => {
                    info!("transport closed, interrupting connection");
                    self.interrupt().await;
                    return;
                }
                Err(e) => {
                    warn!("transport recv error, interrupting connection: {e}");
                    self.interrupt().await;
                    return;
                }
            }
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Bumps the export table's external refcount for every proxy marker
    /// about to be sent to the peer, mirroring §4.4's "external reference is
    /// added when a proxy marker is encoded".
    fn retain_outgoing_proxies(&self, value: &Value) {
        visit_proxies(value, &mut |number| {
            if let Err(e) = self.exports.add_external_ref(number) {
                warn!("encoding proxy {number} to an unexported number: {e}");
            }
        });
    }

    /// Imports (or re-imports) every proxy marker found in a value the peer
    /// just sent us, so a held `Value::Proxy` has a live record in this
    /// connection's import table and a desist can later be sent for it.
    fn import_incoming_proxies(&self, value: &Value) {
        let generation = self.generation();
        visit_proxies(value, &mut |number| {
            self.imports.import(number, generation);
        });
    }

    /// Inbound dispatch, per message, strictly in arrival order (this method
    /// is only ever called from the single read loop task).
    async fn handle_inbound(&self, message: WireMessage) -> NsxpcResult<()> {
        let flags = message.flags();
        flags.validate()?;

        if flags.contains(Flags::PROGRESS_MESSAGE) {
            return self.handle_progress_message(&message);
        }
        if flags.contains(Flags::DESIST_PROXY) {
            let number = message
                .proxynum
                .ok_or_else(|| NsxpcError::malformed("DesistProxy without proxynum"))?;
            return self.exports.remove_external_ref(number);
        }
        if flags.contains(Flags::NONINVOCATION) {
            // Validated above: must have carried DesistProxy or
            // ProgressMessage, both handled already.
            return Ok(());
        }

        if let Some(sequence) = message.sequence {
            if let Some((_, pending)) = self.pending_replies.remove(&sequence) {
                let (reader, root) = Reader::start(&message.root)?;
                let value = decode_value(&reader, root)?;
                self.import_incoming_proxies(&value);
                let _ = pending.sender.send(Ok(value));
                return Ok(());
            }
        }

        self.dispatch_invocation(message).await
    }

    fn handle_progress_message(&self, message: &WireMessage) -> NsxpcResult<()> {
        let sequence = message
            .sequence
            .ok_or_else(|| NsxpcError::malformed("ProgressMessage without sequence"))?;
        let flags = message.flags();
        if flags.contains(Flags::CANCEL_PROGRESS) {
            self.progress
                .receive_signal(sequence, crate::nsxpc::progress::ProgressSignal::Cancel);
        }
        if flags.contains(Flags::PAUSE_PROGRESS) {
            self.progress
                .receive_signal(sequence, crate::nsxpc::progress::ProgressSignal::Pause);
        }
        if flags.contains(Flags::RESUME_PROGRESS) {
            self.progress
                .receive_signal(sequence, crate::nsxpc::progress::ProgressSignal::Resume);
        }
        Ok(())
    }

    async fn dispatch_invocation(&self, message: WireMessage) -> NsxpcResult<()> {
        let flags = message.flags();
        let (reader, root) = Reader::start(&message.root)?;
        let decoded = decode_value(&reader, root)?;

        let selector = invocation_selector(&decoded)?.to_string();
        let signature = invocation_signature(&decoded)?.to_string();
        let args: Vec<Value> = invocation_args(&decoded)?.to_vec();
        let _ = signature;
        for arg in &args {
            self.import_incoming_proxies(arg);
        }

        let proxy_number = message.proxynum.unwrap_or(ROOT_PROXY_NUMBER);
        let object_id = self.exports.object_id_for(proxy_number)?;
        let object = self
            .exported_objects
            .get(&object_id)
            .ok_or_else(|| NsxpcError::UnknownSelector {
                selector: selector.clone(),
            })?
            .clone();

        {
            let interfaces = self.interfaces.lock().await;
            if let Some(iface) = interfaces.get(object.interface_name()) {
                if !iface.has_selector(&selector) {
                    return Err(NsxpcError::UnknownSelector { selector });
                }
            }
        }

        let expects_reply = flags.contains(Flags::EXPECTS_REPLY);
        if expects_reply {
            self.outstanding_replies.fetch_add(1, Ordering::SeqCst);
        }

        let result = object.invoke(Invocation { selector, args }).await;

        if expects_reply {
            let sequence = message
                .sequence
                .ok_or_else(|| NsxpcError::malformed("ExpectsReply without sequence"))?;
            let reply_value = match result {
                Ok(v) => v,
                Err(e) => crate::nsxpc::value::build_error("com.nsxpc.runtime", 1, &e.to_string()),
            };
            self.retain_outgoing_proxies(&reply_value);
            let mut w = Writer::new();
            encode_value(&mut w, &reply_value)?;
            let mut reply = WireMessage::new(Flags::REQUIRED);
            reply.sequence = Some(sequence);
            reply.root = w.into_bytes();
            self.transport.send(reply).await?;
            self.outstanding_replies.fetch_sub(1, Ordering::SeqCst);
        } else {
            result?;
        }
        Ok(())
    }

    /// Sends an invocation to the peer, registering a pending-reply slot
    /// when `expects_reply` is set, and returns a receiver the caller awaits
    /// for the reply (sync calls await it immediately; fire-and-forget
    /// callers may drop it).
    pub async fn send_invocation(
        &self,
        proxy_number: u64,
        selector: &str,
        signature: &str,
        args: Vec<Value>,
        expects_reply: bool,
    ) -> NsxpcResult<Option<oneshot::Receiver<NsxpcResult<Value>>>> {
        if self.state() == ConnectionState::Invalidated {
            return Err(NsxpcError::ConnectionInvalid);
        }

        let sequence = self.next_sequence();
        for arg in &args {
            self.retain_outgoing_proxies(arg);
        }
        let invocation = build_invocation(selector, signature, args);
        let mut w = Writer::new();
        encode_value(&mut w, &invocation)?;

        let mut flags = Flags::REQUIRED;
        if expects_reply {
            flags = flags.union(Flags::EXPECTS_REPLY);
        }

        let mut message = WireMessage::new(flags);
        message.root = w.into_bytes();
        message.proxynum = Some(proxy_number);
        message.sequence = Some(sequence);

        let receiver = if expects_reply {
            let (tx, rx) = oneshot::channel();
            self.pending_replies.insert(
                sequence,
                PendingReply {
                    sender: tx,
                    selector: selector.to_string(),
                    user_info: HashMap::new(),
                },
            );
            Some(rx)
        } else {
            None
        };

        self.transport.send(message).await?;
        Ok(receiver)
    }

    /// Convenience for a synchronous proxy call: sends the invocation and
    /// blocks on its reply up to `timeout` (the connection's default when
    /// `None`). A late reply after timeout is discarded by whoever polls the
    /// dropped receiver.
    pub async fn call(
        &self,
        proxy_number: u64,
        selector: &str,
        signature: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> NsxpcResult<Value> {
        let receiver = self
            .send_invocation(proxy_number, selector, signature, args, true)
            .await?
            .expect("expects_reply=true always returns a receiver");

        let timeout = timeout.unwrap_or(self.default_call_timeout);
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NsxpcError::ConnectionInterrupted),
            Err(_) => Err(NsxpcError::Timeout),
        }
    }

    /// Fire-and-forget call: no reply expected, completes in one message.
    pub async fn call_oneway(
        &self,
        proxy_number: u64,
        selector: &str,
        signature: &str,
        args: Vec<Value>,
    ) -> NsxpcResult<()> {
        self.send_invocation(proxy_number, selector, signature, args, false)
            .await?;
        Ok(())
    }

    pub async fn send_desist(&self, proxy_number: u64) -> NsxpcResult<()> {
        let mut message = WireMessage::new(Flags::REQUIRED.union(Flags::NONINVOCATION).union(Flags::DESIST_PROXY));
        message.proxynum = Some(proxy_number);
        self.transport.send(message).await
    }

    /// Interruption: bumps generation, fails every pending reply with
    /// `connection-interrupted`, drops imported proxies (no desist is sent,
    /// the peer is gone), and retains exported records for a possible
    /// reconnect.
    pub async fn interrupt(&self) {
        if self.state() == ConnectionState::Invalidated {
            return;
        }
        self.state
            .store(ConnectionState::Interrupted as u8, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);

        let pending: Vec<_> = self
            .pending_replies
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for sequence in pending {
            if let Some((_, pending)) = self.pending_replies.remove(&sequence) {
                let _ = pending.sender.send(Err(NsxpcError::ConnectionInterrupted));
            }
        }
        self.imports.clear_on_interruption();

        if let Some(handler) = self.interruption_handler.lock().await.as_ref() {
            handler();
        }
        debug!("connection interrupted, generation now {}", self.generation());
    }

    /// Invalidation is terminal: fails all pending replies, fires the
    /// invalidation handler, and blocks all future operations.
    pub async fn invalidate(&self) {
        self.state
            .store(ConnectionState::Invalidated as u8, Ordering::SeqCst);

        let pending: Vec<_> = self
            .pending_replies
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for sequence in pending {
            if let Some((_, pending)) = self.pending_replies.remove(&sequence) {
                let _ = pending.sender.send(Err(NsxpcError::ConnectionInvalid));
            }
        }

        if let Some(handler) = self.invalidation_handler.lock().await.as_ref() {
            handler();
        }
        let _ = self.transport.close().await;
    }

    pub fn outstanding_reply_count(&self) -> u64 {
        self.outstanding_replies.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nsxpc::interface::{Interface, MethodDescriptor};
    use crate::transport::LocalTransport;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicI64;

    struct EchoCounter {
        total: AtomicI64,
    }

    #[async_trait]
    impl ExportedObject for EchoCounter {
        async fn invoke(&self, invocation: Invocation) -> NsxpcResult<Value> {
            match invocation.selector.as_str() {
                "increment:" => {
                    if let Some(Value::UInt(n)) = invocation.args.first() {
                        self.total.fetch_add(*n as i64, Ordering::SeqCst);
                    }
                    Ok(Value::Null)
                }
                "fetch" => Ok(Value::Int(self.total.load(Ordering::SeqCst))),
                _ => Err(NsxpcError::UnknownSelector {
                    selector: invocation.selector,
                }),
            }
        }

        fn object_id(&self) -> u64 {
            1
        }

        fn interface_name(&self) -> &str {
            "Counter"
        }
    }

    #[tokio::test]
    async fn hello_scenario_no_reply_round_trips_once() {
        let (a, b) = LocalTransport::pair(8);
        let server = Connection::new(ConnectionRole::Server, Arc::new(b));
        let client = Connection::new(ConnectionRole::Client, Arc::new(a));

        let mut iface = Interface::new("Greeter");
        iface.register(MethodDescriptor::new("sayHello", "v@:"));
        server.register_interface(iface).await;

        struct Greeter;
        #[async_trait]
        impl ExportedObject for Greeter {
            async fn invoke(&self, _invocation: Invocation) -> NsxpcResult<Value> {
                Ok(Value::Null)
            }
            fn object_id(&self) -> u64 {
                1
            }
            fn interface_name(&self) -> &str {
                "Greeter"
            }
        }
        server.export_root(Arc::new(Greeter));

        server.resume();
        client.resume();

        client
            .call_oneway(ROOT_PROXY_NUMBER, "sayHello", "v@:", vec![])
            .await
            .unwrap();

        // give the server's read loop a chance to run
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn shared_counter_scenario() {
        let (a, b) = LocalTransport::pair(8);
        let server = Connection::new(ConnectionRole::Server, Arc::new(b));
        let client = Connection::new(ConnectionRole::Client, Arc::new(a));

        let mut iface = Interface::new("Counter");
        iface.register(MethodDescriptor::new("increment:", "v@:q"));
        iface.register(MethodDescriptor::new("fetch", "q@:"));
        server.register_interface(iface).await;
        server.export_root(Arc::new(EchoCounter {
            total: AtomicI64::new(0),
        }));

        server.resume();
        client.resume();

        client
            .call(
                ROOT_PROXY_NUMBER,
                "increment:",
                "v@:q",
                vec![Value::UInt(5)],
                None,
            )
            .await
            .unwrap();
        client
            .call(
                ROOT_PROXY_NUMBER,
                "increment:",
                "v@:q",
                vec![Value::UInt(5)],
                None,
            )
            .await
            .unwrap();
        let total = client
            .call(ROOT_PROXY_NUMBER, "fetch", "q@:", vec![], None)
            .await
            .unwrap();
        assert_eq!(total, Value::Int(10));
    }

    struct ProxyHandingRoot {
        secondary_proxy: u64,
    }

    #[async_trait]
    impl ExportedObject for ProxyHandingRoot {
        async fn invoke(&self, invocation: Invocation) -> NsxpcResult<Value> {
            match invocation.selector.as_str() {
                "handle" => Ok(Value::Proxy(self.secondary_proxy)),
                other => Err(NsxpcError::UnknownSelector {
                    selector: other.to_string(),
                }),
            }
        }

        fn object_id(&self) -> u64 {
            1
        }

        fn interface_name(&self) -> &str {
            "Root"
        }
    }

    struct Secondary;

    #[async_trait]
    impl ExportedObject for Secondary {
        async fn invoke(&self, _invocation: Invocation) -> NsxpcResult<Value> {
            Ok(Value::Null)
        }

        fn object_id(&self) -> u64 {
            2
        }

        fn interface_name(&self) -> &str {
            "Secondary"
        }
    }

    #[tokio::test]
    async fn returned_proxy_is_retained_on_send_and_imported_on_receipt() {
        let (a, b) = LocalTransport::pair(8);
        let server = Connection::new(ConnectionRole::Server, Arc::new(b));
        let client = Connection::new(ConnectionRole::Client, Arc::new(a));

        let secondary_proxy = server.export(Arc::new(Secondary));

        let mut iface = Interface::new("Root");
        iface.register(MethodDescriptor::new("handle", "@@:"));
        server.register_interface(iface).await;
        server.export_root(Arc::new(ProxyHandingRoot { secondary_proxy }));

        server.resume();
        client.resume();

        for _ in 0..2 {
            let reply = client
                .call(ROOT_PROXY_NUMBER, "handle", "@@:", vec![], None)
                .await
                .unwrap();
            assert_eq!(reply, Value::Proxy(secondary_proxy));
        }

        // Two replies each encoded the proxy marker, so two external refs
        // were added server-side; one release must not yet drop the record.
        server.exports.remove_external_ref(secondary_proxy).unwrap();
        assert!(server.exports.contains(secondary_proxy));
        server.exports.remove_external_ref(secondary_proxy).unwrap();
        assert!(!server.exports.contains(secondary_proxy));

        // Symmetrically, the client imported the proxy twice on receipt.
        assert!(!client.imports.release(secondary_proxy));
        assert!(client.imports.release(secondary_proxy));
    }

    #[tokio::test]
    async fn interruption_fails_pending_replies() {
        let (a, b) = LocalTransport::pair(8);
        let client = Connection::new(ConnectionRole::Client, Arc::new(a));
        drop(b);
        client.resume();

        let result = client
            .call(ROOT_PROXY_NUMBER, "wait:reply:", "v@:iq", vec![], Some(Duration::from_millis(200)))
            .await;
        assert!(result.is_err());
    }
}
