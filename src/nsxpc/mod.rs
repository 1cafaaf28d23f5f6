//! NSXPC wire engine: a bplist16 codec, a type-directed object serializer,
//! an interface registry, export/import proxy tables, a connection engine,
//! a progress bridge and a listener, wired together into one namespace.

pub mod codec;
pub mod connection;
pub mod interface;
pub mod listener;
pub mod message;
pub mod object;
pub mod progress;
pub mod proxy;
pub mod value;

pub use connection::{Connection, ConnectionRole, ConnectionState};
pub use interface::{ArgumentPolicy, Interface, InterfaceRegistry, MethodDescriptor};
pub use listener::{AcceptAll, Listener, ListenerDelegate};
pub use message::{Flags, WireMessage};
pub use object::{ExportedObject, Invocation};
pub use progress::{ProgressBridge, ProgressSignal, ProgressSnapshot};
pub use proxy::{ExportTable, ImportTable, ROOT_PROXY_NUMBER};
pub use value::{ClassAllowList, Value};
