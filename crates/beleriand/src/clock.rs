//! Monotonic timestamps shared by local entries and the slot table.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since the first call in this process.
///
/// Never decreases; always greater than `i64::MIN`, the initial value of every
/// slot in a fresh `SlotTable`.
pub fn now() -> i64 {
    let nanos = EPOCH.get_or_init(Instant::now).elapsed().as_nanos();
    i64::try_from(nanos).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotonic() {
        let mut last = now();
        for _ in 0..1000 {
            let next = now();
            assert!(next >= last);
            last = next;
        }
        assert!(last > i64::MIN);
    }
}
