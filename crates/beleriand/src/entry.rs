use crate::codec::Payload;
use crate::slot::HashSlot;

/// An entry in the local (near) cache.
///
/// Entries are never mutated; a newer write replaces the whole entry. The
/// payload is reference counted so handing it out on a hit is a pointer copy.
///
/// `written_at` is compared with the slot table to decide freshness.
/// `version` orders competing local inserts of the same key: an entry read
/// from the shared store carries the time its fetch started, an entry from a
/// local write the time that write was acknowledged.
#[derive(Clone, Debug)]
pub struct LocalEntry {
    slot: HashSlot,
    written_at: i64,
    version: i64,
    payload: Payload,
}

impl LocalEntry {
    pub fn new(slot: HashSlot, written_at: i64, payload: Payload) -> Self {
        Self {
            slot,
            written_at,
            version: written_at,
            payload,
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn slot(&self) -> HashSlot {
        self.slot
    }

    pub fn written_at(&self) -> i64 {
        self.written_at
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Whether this entry may replace `existing`.
    pub fn supersedes(&self, existing: &LocalEntry) -> bool {
        self.version >= existing.version
    }
}
