//! Export and import proxy tables.
//!
//! Export side: proxy-number → record, with an external reference count
//! bumped when the number is encoded to the peer and dropped when a desist
//! message arrives. Import side: identity-keyed imported proxies with a
//! single logical internal reference count, generation-fenced so a stale
//! proxy from before an interruption can never be mistaken for a live one.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::{NsxpcError, NsxpcResult};

/// Proxy number 1 is reserved for the connection's root exported object.
pub const ROOT_PROXY_NUMBER: u64 = 1;

#[derive(Debug)]
struct ExportedRecord {
    object_id: u64,
    interface_name: String,
    external_refs: u64,
}

/// Export-side table: allocates proxy numbers, tracks per-peer external
/// references, and frees records once their last external reference drops
/// (the root record is exempt and lives for the connection's lifetime).
pub struct ExportTable {
    next_number: AtomicU64,
    records: DashMap<u64, ExportedRecord>,
    /// object identity -> already-assigned proxy number, so exporting the
    /// same object/interface pair twice returns the same number.
    by_object: DashMap<(u64, String), u64>,
}

impl ExportTable {
    pub fn new() -> Self {
        ExportTable {
            next_number: AtomicU64::new(ROOT_PROXY_NUMBER + 1),
            records: DashMap::new(),
            by_object: DashMap::new(),
        }
    }

    pub fn install_root(&self, object_id: u64, interface_name: impl Into<String>) {
        let interface_name = interface_name.into();
        self.by_object
            .insert((object_id, interface_name.clone()), ROOT_PROXY_NUMBER);
        self.records.insert(
            ROOT_PROXY_NUMBER,
            ExportedRecord {
                object_id,
                interface_name,
                external_refs: 0,
            },
        );
    }

    /// Returns the proxy number for `(object_id, interface_name)`, minting a
    /// fresh one on first export.
    pub fn export(&self, object_id: u64, interface_name: &str) -> u64 {
        let key = (object_id, interface_name.to_string());
        if let Some(existing) = self.by_object.get(&key) {
            return *existing;
        }
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        self.records.insert(
            number,
            ExportedRecord {
                object_id,
                interface_name: interface_name.to_string(),
                external_refs: 0,
            },
        );
        self.by_object.insert(key, number);
        number
    }

    /// Called when a proxy marker for `number` is encoded to the peer.
    pub fn add_external_ref(&self, number: u64) -> NsxpcResult<()> {
        let mut record = self
            .records
            .get_mut(&number)
            .ok_or_else(|| NsxpcError::malformed("desist for unknown proxy number"))?;
        record.external_refs += 1;
        Ok(())
    }

    /// Called on receipt of a desist message. Drops the record once its
    /// external refcount reaches zero, unless it is the root.
    pub fn remove_external_ref(&self, number: u64) -> NsxpcResult<()> {
        let should_drop = {
            let mut record = self
                .records
                .get_mut(&number)
                .ok_or_else(|| NsxpcError::malformed("desist for unknown proxy number"))?;
            record.external_refs = record.external_refs.saturating_sub(1);
            record.external_refs == 0 && number != ROOT_PROXY_NUMBER
        };
        if should_drop {
            if let Some((_, record)) = self.records.remove(&number) {
                self.by_object
                    .remove(&(record.object_id, record.interface_name));
            }
        }
        Ok(())
    }

    pub fn object_id_for(&self, number: u64) -> NsxpcResult<u64> {
        self.records
            .get(&number)
            .map(|r| r.object_id)
            .ok_or(NsxpcError::PeerUnavailable)
    }

    pub fn contains(&self, number: u64) -> bool {
        self.records.contains_key(&number)
    }
}

impl Default for ExportTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct ImportedRecord {
    internal_refs: u64,
    generation: u64,
}

/// Import-side table: tracks imported proxies by their peer-assigned proxy
/// number, bumping a single logical internal refcount on repeated decodes
/// and fencing everything by connection generation so an interruption makes
/// old handles visibly stale rather than silently wrong.
pub struct ImportTable {
    records: DashMap<u64, ImportedRecord>,
}

impl ImportTable {
    pub fn new() -> Self {
        ImportTable {
            records: DashMap::new(),
        }
    }

    /// Decodes (or re-decodes) a proxy marker, returning its current
    /// generation for the caller to stash alongside the handle.
    pub fn import(&self, number: u64, generation: u64) -> u64 {
        let mut entry = self
            .records
            .entry(number)
            .or_insert(ImportedRecord {
                internal_refs: 0,
                generation,
            });
        entry.internal_refs += 1;
        entry.generation
    }

    /// Drops one internal reference; returns `true` when the count reached
    /// zero and a desist message should be sent to the peer.
    pub fn release(&self, number: u64) -> bool {
        let should_desist = {
            match self.records.get_mut(&number) {
                Some(mut record) => {
                    record.internal_refs = record.internal_refs.saturating_sub(1);
                    record.internal_refs == 0
                }
                None => false,
            }
        };
        if should_desist {
            self.records.remove(&number);
        }
        should_desist
    }

    /// A handle whose generation no longer matches `current_generation` was
    /// imported before the last interruption and is stale.
    pub fn is_stale(&self, number: u64, stamped_generation: u64, current_generation: u64) -> bool {
        let _ = number;
        stamped_generation != current_generation
    }

    /// Drops every imported proxy; called on interruption. No desist
    /// messages are sent, since the peer that would receive them is gone.
    pub fn clear_on_interruption(&self) {
        self.records.clear();
    }
}

impl Default for ImportTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_reuses_number_for_same_object_interface() {
        let table = ExportTable::new();
        let a = table.export(42, "Counter");
        let b = table.export(42, "Counter");
        assert_eq!(a, b);
        assert_ne!(a, ROOT_PROXY_NUMBER);
    }

    #[test]
    fn last_external_ref_drop_removes_record() {
        let table = ExportTable::new();
        let n = table.export(1, "Thing");
        table.add_external_ref(n).unwrap();
        table.add_external_ref(n).unwrap();
        table.remove_external_ref(n).unwrap();
        assert!(table.contains(n));
        table.remove_external_ref(n).unwrap();
        assert!(!table.contains(n));
    }

    #[test]
    fn root_record_survives_ref_drop_to_zero() {
        let table = ExportTable::new();
        table.install_root(1, "Root");
        table.add_external_ref(ROOT_PROXY_NUMBER).unwrap();
        table.remove_external_ref(ROOT_PROXY_NUMBER).unwrap();
        assert!(table.contains(ROOT_PROXY_NUMBER));
    }

    #[test]
    fn import_bumps_refcount_and_release_desists_at_zero() {
        let table = ImportTable::new();
        table.import(5, 0);
        table.import(5, 0);
        assert!(!table.release(5));
        assert!(table.release(5));
    }

    #[test]
    fn interruption_clears_without_desist() {
        let table = ImportTable::new();
        table.import(9, 0);
        table.clear_on_interruption();
        assert!(!table.release(9));
    }
}
