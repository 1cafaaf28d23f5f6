//! Interface registry: lazy, memoized per-protocol method signatures and
//! per-argument decode policy overrides.

use std::collections::HashMap;

use crate::nsxpc::value::ClassAllowList;

/// Default classes any object-pointer argument may decode as when the
/// interface author hasn't overridden it.
fn default_allow_list() -> ClassAllowList {
    ClassAllowList::new(["NSString", "NSNumber", "NSArray", "NSDictionary", "NSData"])
}

/// Per-argument decode policy: an allow-list, or a marker that the argument
/// is itself a proxy to a sub-interface, or a transport-native type.
#[derive(Debug, Clone)]
pub enum ArgumentPolicy {
    Classes(ClassAllowList),
    SubInterface(String),
    Transport,
}

impl Default for ArgumentPolicy {
    fn default() -> Self {
        ArgumentPolicy::Classes(default_allow_list())
    }
}

/// One exported/imported method: its runtime type-signature plus any
/// per-argument overrides (argument 0 is `self`, argument 1 the selector,
/// matching the reflection facility's own indexing).
#[derive(Debug, Clone, Default)]
pub struct MethodDescriptor {
    pub selector: String,
    pub signature: String,
    pub argument_policies: HashMap<usize, ArgumentPolicy>,
    /// The reply-block's own type signature, when the last argument is a
    /// void-returning block.
    pub reply_signature: Option<String>,
    /// Sub-interface name for the reply argument, when the reply delivers a
    /// proxy rather than a plain value.
    pub reply_sub_interface: Option<String>,
}

impl MethodDescriptor {
    pub fn new(selector: impl Into<String>, signature: impl Into<String>) -> Self {
        MethodDescriptor {
            selector: selector.into(),
            signature: signature.into(),
            argument_policies: HashMap::new(),
            reply_signature: None,
            reply_sub_interface: None,
        }
    }

    pub fn with_allowed_classes(
        mut self,
        arg_index: usize,
        classes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.argument_policies.insert(
            arg_index,
            ArgumentPolicy::Classes(ClassAllowList::new(classes)),
        );
        self
    }

    pub fn with_sub_interface(mut self, arg_index: usize, interface_name: impl Into<String>) -> Self {
        self.argument_policies
            .insert(arg_index, ArgumentPolicy::SubInterface(interface_name.into()));
        self
    }

    pub fn with_transport_argument(mut self, arg_index: usize) -> Self {
        self.argument_policies.insert(arg_index, ArgumentPolicy::Transport);
        self
    }

    pub fn with_reply(mut self, signature: impl Into<String>) -> Self {
        self.reply_signature = Some(signature.into());
        self
    }

    pub fn with_reply_sub_interface(mut self, interface_name: impl Into<String>) -> Self {
        self.reply_sub_interface = Some(interface_name.into());
        self
    }

    pub fn policy_for(&self, arg_index: usize) -> ArgumentPolicy {
        self.argument_policies
            .get(&arg_index)
            .cloned()
            .unwrap_or_default()
    }
}

/// One interface (the `[MODULE]`-level notion of a "protocol"): a memoized
/// table from selector to method descriptor, built once via `register` calls
/// the way a build step would synthesize a dispatch table from runtime
/// metadata in the source this is grounded on.
#[derive(Debug, Clone, Default)]
pub struct Interface {
    pub name: String,
    methods: HashMap<String, MethodDescriptor>,
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Interface {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn register(&mut self, descriptor: MethodDescriptor) -> &mut Self {
        self.methods.insert(descriptor.selector.clone(), descriptor);
        self
    }

    /// Unknown selectors return `None`, which callers treat as "no extra
    /// classes beyond default" per the registry's documented lookup rule,
    /// rather than as an error.
    pub fn lookup(&self, selector: &str) -> Option<&MethodDescriptor> {
        self.methods.get(selector)
    }

    pub fn has_selector(&self, selector: &str) -> bool {
        self.methods.contains_key(selector)
    }
}

/// Registry of interfaces by name, shared across connections that expose or
/// import the same protocols.
#[derive(Debug, Clone, Default)]
pub struct InterfaceRegistry {
    interfaces: HashMap<String, Interface>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, interface: Interface) {
        self.interfaces.insert(interface.name.clone(), interface);
    }

    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_selector_has_no_descriptor() {
        let iface = Interface::new("Greeter");
        assert!(iface.lookup("missing:").is_none());
    }

    #[test]
    fn registered_method_round_trips_policy() {
        let mut iface = Interface::new("Counter");
        iface.register(
            MethodDescriptor::new("fetchSharedCounter:", "v@:@")
                .with_reply("v@:@")
                .with_reply_sub_interface("Counter"),
        );
        let desc = iface.lookup("fetchSharedCounter:").unwrap();
        assert_eq!(desc.reply_sub_interface.as_deref(), Some("Counter"));
    }
}
