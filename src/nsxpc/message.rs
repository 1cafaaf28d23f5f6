//! The wire-level message envelope: one transport dictionary per message,
//! carrying a flag bitmask plus the bplist16-framed payload.

use serde::{Deserialize, Serialize};

use crate::error::{NsxpcError, NsxpcResult};

/// Flag bits (uint64), the widest of the source's several divergent
/// declarations. Reserved bits beyond these must be rejected on decode to
/// preserve forward compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags(pub u64);

impl Flags {
    pub const REQUIRED: Flags = Flags(1 << 0);
    pub const NONINVOCATION: Flags = Flags(1 << 2);
    pub const DESIST_PROXY: Flags = Flags(1 << 3);
    pub const PROGRESS_MESSAGE: Flags = Flags(1 << 4);
    pub const EXPECTS_REPLY: Flags = Flags(1 << 5);
    pub const TRACKS_PROGRESS: Flags = Flags(1 << 6);
    pub const INITIATES_PROGRESS_TRACKING: Flags = Flags(1 << 7);
    pub const CANCEL_PROGRESS: Flags = Flags(1 << 16);
    pub const PAUSE_PROGRESS: Flags = Flags(1 << 17);
    pub const RESUME_PROGRESS: Flags = Flags(1 << 18);

    /// Union of every bit this crate assigns meaning to; anything else set
    /// on decode is a reserved-bit violation.
    const KNOWN_MASK: u64 = Self::REQUIRED.0
        | Self::NONINVOCATION.0
        | Self::DESIST_PROXY.0
        | Self::PROGRESS_MESSAGE.0
        | Self::EXPECTS_REPLY.0
        | Self::TRACKS_PROGRESS.0
        | Self::INITIATES_PROGRESS_TRACKING.0
        | Self::CANCEL_PROGRESS.0
        | Self::PAUSE_PROGRESS.0
        | Self::RESUME_PROGRESS.0;

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }

    pub fn validate(self) -> NsxpcResult<()> {
        if self.0 & !Self::KNOWN_MASK != 0 {
            return Err(NsxpcError::malformed("reserved flag bits set"));
        }
        if !self.contains(Flags::REQUIRED) {
            return Err(NsxpcError::malformed("Required flag not set"));
        }
        if self.contains(Flags::NONINVOCATION)
            && !(self.contains(Flags::DESIST_PROXY) || self.contains(Flags::PROGRESS_MESSAGE))
        {
            return Err(NsxpcError::malformed(
                "Noninvocation set without DesistProxy or ProgressMessage",
            ));
        }
        Ok(())
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::REQUIRED
    }
}

/// An out-of-line transport-native object, addressed by index from within
/// the bplist16 payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireOolObject {
    Endpoint(String),
    FileDescriptor(i32),
}

/// One transport dictionary, matching the key table in the wire format
/// section: `f`, `root`, `ool_objects`, `sequence`, `proxynum`, `replysig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub flags: u64,
    #[serde(default)]
    pub root: Vec<u8>,
    #[serde(default)]
    pub ool_objects: Vec<WireOolObject>,
    pub sequence: Option<u64>,
    pub proxynum: Option<u64>,
    pub replysig: Option<String>,
}

impl WireMessage {
    pub fn new(flags: Flags) -> Self {
        WireMessage {
            flags: flags.0,
            root: Vec::new(),
            ool_objects: Vec::new(),
            sequence: None,
            proxynum: None,
            replysig: None,
        }
    }

    pub fn flags(&self) -> Flags {
        Flags(self.flags)
    }

    pub fn to_bytes(&self) -> NsxpcResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| NsxpcError::malformed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> NsxpcResult<Self> {
        bincode::deserialize(bytes).map_err(|e| NsxpcError::malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_must_be_set() {
        assert!(Flags(0).validate().is_err());
    }

    #[test]
    fn reserved_bits_rejected() {
        let bits = Flags::REQUIRED.union(Flags(1 << 40));
        assert!(bits.validate().is_err());
    }

    #[test]
    fn noninvocation_requires_desist_or_progress() {
        let bare = Flags::REQUIRED.union(Flags::NONINVOCATION);
        assert!(bare.validate().is_err());
        let with_desist = bare.union(Flags::DESIST_PROXY);
        assert!(with_desist.validate().is_ok());
    }

    #[test]
    fn wire_message_round_trips_through_bincode() {
        let mut msg = WireMessage::new(Flags::REQUIRED.union(Flags::EXPECTS_REPLY));
        msg.root = vec![1, 2, 3];
        msg.sequence = Some(7);
        let bytes = msg.to_bytes().unwrap();
        let back = WireMessage::from_bytes(&bytes).unwrap();
        assert_eq!(back.sequence, Some(7));
        assert_eq!(back.root, vec![1, 2, 3]);
    }
}
