//! Progress bridge: mirrors a sender's progress fields across the wire, and
//! propagates cancel/pause/resume in both directions.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::nsxpc::message::Flags;

/// The fields mirrored between a progress object and its peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: i64,
    pub total: i64,
    pub cancellable: bool,
    pub pausable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSignal {
    Cancel,
    Pause,
    Resume,
}

impl ProgressSignal {
    pub fn flag(self) -> Flags {
        match self {
            ProgressSignal::Cancel => Flags::CANCEL_PROGRESS,
            ProgressSignal::Pause => Flags::PAUSE_PROGRESS,
            ProgressSignal::Resume => Flags::RESUME_PROGRESS,
        }
    }
}

struct Pair {
    local: ProgressSnapshot,
    remote: ProgressSnapshot,
    cancelled: bool,
}

/// Tracks every live tracked-progress pair for a connection, keyed by the
/// invocation's sequence number.
pub struct ProgressBridge {
    pairs: Mutex<HashMap<u64, Pair>>,
}

impl ProgressBridge {
    pub fn new() -> Self {
        ProgressBridge {
            pairs: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin(&self, sequence: u64, initial: ProgressSnapshot) {
        self.pairs.lock().unwrap().insert(
            sequence,
            Pair {
                local: initial,
                remote: initial,
                cancelled: false,
            },
        );
    }

    /// Applies an incoming progress message from the peer.
    pub fn apply_remote_update(&self, sequence: u64, snapshot: ProgressSnapshot) {
        if let Some(pair) = self.pairs.lock().unwrap().get_mut(&sequence) {
            pair.remote = snapshot;
        }
    }

    /// Records a local update to mirror outward; returns the snapshot the
    /// caller should serialize into a `ProgressMessage`.
    pub fn update_local(&self, sequence: u64, snapshot: ProgressSnapshot) -> Option<ProgressSnapshot> {
        let mut pairs = self.pairs.lock().unwrap();
        let pair = pairs.get_mut(&sequence)?;
        pair.local = snapshot;
        Some(snapshot)
    }

    /// A cancel/pause/resume signal arriving from the peer. For `Cancel`,
    /// marks the pair cancelled so in-flight work can poll and abort.
    pub fn receive_signal(&self, sequence: u64, signal: ProgressSignal) {
        if signal == ProgressSignal::Cancel {
            if let Some(pair) = self.pairs.lock().unwrap().get_mut(&sequence) {
                pair.cancelled = true;
            }
        }
    }

    pub fn is_cancelled(&self, sequence: u64) -> bool {
        self.pairs
            .lock()
            .unwrap()
            .get(&sequence)
            .map(|p| p.cancelled)
            .unwrap_or(false)
    }

    pub fn end(&self, sequence: u64) {
        self.pairs.lock().unwrap().remove(&sequence);
    }
}

impl Default for ProgressBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_signal_marks_pair_cancelled() {
        let bridge = ProgressBridge::new();
        let snapshot = ProgressSnapshot {
            completed: 0,
            total: 10,
            cancellable: true,
            pausable: false,
        };
        bridge.begin(1, snapshot);
        assert!(!bridge.is_cancelled(1));
        bridge.receive_signal(1, ProgressSignal::Cancel);
        assert!(bridge.is_cancelled(1));
    }

    #[test]
    fn end_removes_pair() {
        let bridge = ProgressBridge::new();
        let snapshot = ProgressSnapshot {
            completed: 0,
            total: 1,
            cancellable: false,
            pausable: false,
        };
        bridge.begin(2, snapshot);
        bridge.end(2);
        assert!(bridge.update_local(2, snapshot).is_none());
    }
}
