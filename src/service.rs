//! The `FileCoordination` exported object: the bridge between the wire
//! engine and the [`Arbiter`], translating invocations into arbiter calls the
//! way a generated NSXPC stub would translate a protocol method call into an
//! invocation on the connection.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::coordination::{Arbiter, CancellationToken, IntentOptions, RequestKind};
use crate::error::{NsxpcError, NsxpcResult};
use crate::nsxpc::{ExportedObject, Interface, Invocation, MethodDescriptor, Value};

pub const INTERFACE_NAME: &str = "FileCoordination";

/// Builds the interface descriptor a connection registers before exporting
/// a [`FileCoordinationObject`] as its root.
pub fn interface() -> Interface {
    let mut iface = Interface::new(INTERFACE_NAME);
    iface.register(MethodDescriptor::new("coordinateRead:purpose:", "NSString@:NSString"));
    iface.register(MethodDescriptor::new("coordinateWrite:purpose:", "NSString@:NSString"));
    iface.register(MethodDescriptor::new("complete:", "v@:NSString"));
    iface.register(MethodDescriptor::new("cancel:", "v@:NSString"));
    iface
}

pub struct FileCoordinationObject {
    arbiter: Arc<Arbiter>,
}

impl FileCoordinationObject {
    pub fn new(arbiter: Arc<Arbiter>) -> Self {
        FileCoordinationObject { arbiter }
    }
}

fn path_arg(args: &[Value]) -> NsxpcResult<&str> {
    args.first()
        .and_then(Value::as_str)
        .ok_or_else(|| NsxpcError::malformed("expected a path string argument"))
}

fn purpose_arg(args: &[Value]) -> &str {
    args.get(1).and_then(Value::as_str).unwrap_or("default")
}

fn token_arg(args: &[Value]) -> NsxpcResult<CancellationToken> {
    let raw = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| NsxpcError::malformed("expected a cancellation token string argument"))?;
    let uuid = uuid::Uuid::parse_str(raw)
        .map_err(|_| NsxpcError::malformed("cancellation token is not a valid uuid"))?;
    Ok(CancellationToken(uuid))
}

#[async_trait]
impl ExportedObject for FileCoordinationObject {
    async fn invoke(&self, invocation: Invocation) -> NsxpcResult<Value> {
        match invocation.selector.as_str() {
            "coordinateRead:purpose:" => {
                let path = path_arg(&invocation.args)?;
                let purpose = purpose_arg(&invocation.args);
                let token = self
                    .arbiter
                    .coordinate_read(path, IntentOptions::default(), purpose)
                    .await
                    .map_err(|e| NsxpcError::invariant(e.to_string()))?;
                Ok(Value::Str(token.to_string()))
            }
            "coordinateWrite:purpose:" => {
                let path = path_arg(&invocation.args)?;
                let purpose = purpose_arg(&invocation.args);
                let token = self
                    .arbiter
                    .coordinate_write(path, IntentOptions::default(), purpose)
                    .await
                    .map_err(|e| NsxpcError::invariant(e.to_string()))?;
                Ok(Value::Str(token.to_string()))
            }
            "complete:" => {
                let token = token_arg(&invocation.args)?;
                self.arbiter
                    .complete(token)
                    .await
                    .map_err(|e| NsxpcError::invariant(e.to_string()))?;
                Ok(Value::Null)
            }
            "cancel:" => {
                let token = token_arg(&invocation.args)?;
                self.arbiter
                    .cancel(token)
                    .await
                    .map_err(|e| NsxpcError::invariant(e.to_string()))?;
                Ok(Value::Null)
            }
            other => {
                warn!("unknown FileCoordination selector {other}");
                Err(NsxpcError::UnknownSelector {
                    selector: other.to_string(),
                })
            }
        }
    }

    fn object_id(&self) -> u64 {
        1
    }

    fn interface_name(&self) -> &str {
        INTERFACE_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coordinate_then_complete_round_trips_a_token() {
        let object = FileCoordinationObject::new(Arbiter::new());

        let reply = object
            .invoke(Invocation {
                selector: "coordinateWrite:purpose:".to_string(),
                args: vec![Value::Str("/a".into()), Value::Str("edit".into())],
            })
            .await
            .unwrap();
        let token = match reply {
            Value::Str(s) => s,
            _ => panic!("expected a token string"),
        };

        object
            .invoke(Invocation {
                selector: "complete:".to_string(),
                args: vec![Value::Str(token)],
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_selector_is_rejected() {
        let object = FileCoordinationObject::new(Arbiter::new());
        let result = object
            .invoke(Invocation {
                selector: "doSomethingUnsupported".to_string(),
                args: vec![],
            })
            .await;
        assert!(matches!(result, Err(NsxpcError::UnknownSelector { .. })));
    }
}
