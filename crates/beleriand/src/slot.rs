//! Hash slots and the per-instance slot freshness table.
//!
//! Keys are mapped onto a fixed space of 16384 slots with the same function
//! Redis Cluster uses (CRC16/XMODEM modulo 16384, honouring `{hashtag}`
//! sections). Invalidations are tracked per slot rather than per key, so the
//! bookkeeping stays a fixed-size array no matter how many keys exist. Two
//! unrelated keys may share a slot; an invalidation of one then forces a
//! refetch of the other.

use parking_lot::Mutex;

/// Number of hash slots.
pub const HASH_SLOT_COUNT: usize = 16384;

/// A hash slot in `[0, HASH_SLOT_COUNT)`.
pub type HashSlot = u16;

const CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC16/XMODEM (poly 0x1021, init 0, no reflection).
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        (crc << 8) ^ CRC16_TABLE[((crc >> 8) as u8 ^ byte) as usize]
    })
}

/// Compute the hash slot of a key.
///
/// If the key contains a non-empty `{...}` section, only the bytes between the
/// first `{` and the next `}` are hashed.
pub fn calculate(key: &str) -> HashSlot {
    let bytes = key.as_bytes();
    (crc16(hash_tag(bytes)) as usize % HASH_SLOT_COUNT) as HashSlot
}

fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// Slot freshness table: the timestamp of the most recent invalidation seen
/// for each slot.
///
/// A local entry written at `t` for slot `s` is fresh iff `t > table[s]`. All
/// reads and updates go through one lock, so a freshness check can never
/// interleave with an invalidation being applied.
pub struct SlotTable {
    stamps: Mutex<Box<[i64]>>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            stamps: Mutex::new(initial_stamps()),
        }
    }

    /// Whether an entry written at `written_at` for `slot` is still valid.
    pub fn is_fresh(&self, slot: HashSlot, written_at: i64) -> bool {
        written_at > self.stamps.lock()[slot as usize]
    }

    /// Record an invalidation of `slot` at `at`.
    pub fn mark(&self, slot: HashSlot, at: i64) {
        let mut stamps = self.stamps.lock();
        let stamp = &mut stamps[slot as usize];
        *stamp = (*stamp).max(at);
    }

    /// Record an invalidation of every slot at `at`.
    pub fn mark_all(&self, at: i64) {
        let mut stamps = self.stamps.lock();
        for stamp in stamps.iter_mut() {
            *stamp = (*stamp).max(at);
        }
    }

    /// Forget every invalidation.
    pub fn reset(&self) {
        *self.stamps.lock() = initial_stamps();
    }

    /// Last invalidation time recorded for `slot`.
    pub fn last_invalidated(&self, slot: HashSlot) -> i64 {
        self.stamps.lock()[slot as usize]
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

fn initial_stamps() -> Box<[i64]> {
    vec![i64::MIN; HASH_SLOT_COUNT].into_boxed_slice()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(b""), 0);
    }

    #[test]
    fn test_matches_redis_cluster_keyslot() {
        assert_eq!(calculate("foo"), 12182);
        assert_eq!(calculate("bar"), 5061);
        assert_eq!(calculate("hello"), 866);
    }

    #[test]
    fn test_hash_tags() {
        assert_eq!(
            calculate("{user1000}.following"),
            calculate("{user1000}.followers")
        );
        assert_eq!(calculate("Config:{tenant}.a"), calculate("tenant"));
        // Empty tag hashes the whole key
        assert_eq!(calculate("foo{}{bar}"), (crc16(b"foo{}{bar}") % 16384));
        // Unterminated tag hashes the whole key
        assert_eq!(calculate("foo{bar"), (crc16(b"foo{bar") % 16384));
    }

    #[test]
    fn test_slot_is_deterministic_and_in_range() {
        for i in 0..5000 {
            let key = format!("Config:{i}");
            let slot = calculate(&key);
            assert!((slot as usize) < HASH_SLOT_COUNT);
            assert_eq!(slot, calculate(&key));
        }
    }

    #[test]
    fn test_table_freshness() {
        let table = SlotTable::new();
        assert!(table.is_fresh(7, 0));
        assert_eq!(table.last_invalidated(7), i64::MIN);

        table.mark(7, 100);
        assert!(!table.is_fresh(7, 99));
        assert!(!table.is_fresh(7, 100));
        assert!(table.is_fresh(7, 101));
        assert!(table.is_fresh(8, 0));

        // Never moves backwards
        table.mark(7, 50);
        assert_eq!(table.last_invalidated(7), 100);

        table.mark_all(200);
        assert!(!table.is_fresh(8, 150));

        table.reset();
        assert!(table.is_fresh(7, 0));
        assert!(table.is_fresh(8, 0));
    }
}
