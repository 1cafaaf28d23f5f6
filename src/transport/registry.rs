//! Name service: maps a logical service name to a connectable endpoint
//! string, handed in explicitly at startup rather than consulted through
//! ambient global state.

use dashmap::DashMap;

use crate::error::{NsxpcError, NsxpcResult};

pub trait NameService: Send + Sync {
    fn register(&self, name: &str, endpoint: &str);
    fn resolve(&self, name: &str) -> NsxpcResult<String>;
    fn unregister(&self, name: &str);
}

/// A simple concurrent in-memory name service, adequate for a single-host
/// daemon or for tests; a production deployment would back this with
/// whatever service directory the host environment provides.
#[derive(Default)]
pub struct InMemoryNameService {
    endpoints: DashMap<String, String>,
}

impl InMemoryNameService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NameService for InMemoryNameService {
    fn register(&self, name: &str, endpoint: &str) {
        self.endpoints.insert(name.to_string(), endpoint.to_string());
    }

    fn resolve(&self, name: &str) -> NsxpcResult<String> {
        self.endpoints
            .get(name)
            .map(|v| v.clone())
            .ok_or_else(|| NsxpcError::PeerUnavailable)
    }

    fn unregister(&self, name: &str) {
        self.endpoints.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_service() {
        let ns = InMemoryNameService::new();
        ns.register("com.example.counter", "/tmp/counter.sock");
        assert_eq!(
            ns.resolve("com.example.counter").unwrap(),
            "/tmp/counter.sock"
        );
    }

    #[test]
    fn unregistered_service_is_peer_unavailable() {
        let ns = InMemoryNameService::new();
        assert!(ns.resolve("missing").is_err());
    }
}
