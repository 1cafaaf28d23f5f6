//! # nsxpc-rt
//!
//! A cross-process object-messaging runtime: an NSXPC-style wire engine
//! (bplist16 codec, interface registry, export/import proxy tables,
//! connection state machine) and a FileCoordination arbiter that serializes
//! concurrent read/write intents against a shared path hierarchy.

pub mod cli;
pub mod coordination;
pub mod error;
pub mod nsxpc;
pub mod service;
pub mod transport;

pub use cli::{Args, Command};
pub use coordination::Arbiter;
pub use error::{FcError, FcResult, NsxpcError, NsxpcResult};
pub use nsxpc::{Connection, ConnectionRole, ConnectionState};
pub use service::FileCoordinationObject;

/// The current version of the runtime.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values for the `xpcd` binary.
pub mod defaults {
    /// Default Unix domain socket path for `serve`/`demo-client`.
    pub const SOCKET_PATH: &str = "/tmp/xpcd.sock";

    /// Default name service entry the `serve` listener registers itself
    /// under.
    pub const SERVICE_NAME: &str = "com.example.xpcd";

    /// Default per-call timeout for invocations that expect a reply.
    pub const CALL_TIMEOUT_SECS: u64 = 30;

    /// Default number of paths the `demo-server` exchange coordinates
    /// access to.
    pub const DEMO_PATH_COUNT: usize = 3;
}
