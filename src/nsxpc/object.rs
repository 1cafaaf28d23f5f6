//! Exported objects: the dispatch targets a connection's proxy table points
//! at. A systems-language stand-in for runtime message forwarding — instead
//! of forwarding an arbitrary selector through the Objective-C runtime, an
//! exported object implements one async dispatch method driven by the
//! interface's registered method table.

use async_trait::async_trait;

use crate::error::NsxpcResult;
use crate::nsxpc::value::Value;

/// One invocation delivered to an exported object: selector already
/// resolved against the interface, arguments already decoded and
/// allow-list-checked.
pub struct Invocation {
    pub selector: String,
    pub args: Vec<Value>,
}

/// Implemented by whatever local object sits behind a proxy number. `invoke`
/// returns the reply value (or `Value::Null` for methods with no return and
/// no reply-block), matching the "build an invocation, run it" step of the
/// connection engine's inbound dispatch.
#[async_trait]
pub trait ExportedObject: Send + Sync {
    async fn invoke(&self, invocation: Invocation) -> NsxpcResult<Value>;

    /// Stable identity used as the export table's `object_id` key; two
    /// exports of the same underlying object must return the same id so
    /// repeated exports reuse one proxy number.
    fn object_id(&self) -> u64;

    /// Name of the interface this object implements, used to look up the
    /// method table and to key the export-by-object-identity table.
    fn interface_name(&self) -> &str;
}
