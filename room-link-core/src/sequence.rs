//! Replay window: per-peer 32-bit sequence watermark with serial-number wraparound.

use std::collections::HashMap;

use crate::protocol::HwAddr;

/// Half the counter space. A frame is "ahead" when its distance from the watermark is below this.
const HALF_RANGE: u32 = 1 << 31;

/// Tracks the last accepted sequence number per peer.
#[derive(Debug, Default, Clone)]
pub struct SequenceGuard {
    last_accepted: HashMap<HwAddr, u32>,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `seq` from `peer` and advance the watermark when it moves forward.
    ///
    /// - `seq == 0` is reserved and always rejected.
    /// - The first nonzero value seen from a peer is accepted as the baseline.
    /// - Otherwise accept when `seq > last` or `seq - last` (wrapping) is below 2^31; the
    ///   watermark only moves when `seq > last`.
    ///
    /// A frame repeating the watermark exactly is accepted (`diff == 0`).
    pub fn is_valid(&mut self, peer: HwAddr, seq: u32) -> bool {
        if seq == 0 {
            return false;
        }
        let Some(last) = self.last_accepted.get_mut(&peer) else {
            self.last_accepted.insert(peer, seq);
            return true;
        };
        let diff = seq.wrapping_sub(*last);
        if seq > *last || diff < HALF_RANGE {
            if seq > *last {
                *last = seq;
            }
            return true;
        }
        false
    }

    /// Watermark for a peer, if any frame has been accepted from it.
    pub fn last_accepted(&self, peer: &HwAddr) -> Option<u32> {
        self.last_accepted.get(peer).copied()
    }

    /// Forget a peer's window (pairing reset).
    pub fn reset(&mut self, peer: &HwAddr) {
        self.last_accepted.remove(peer);
    }

    pub fn clear(&mut self) {
        self.last_accepted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PEER: HwAddr = HwAddr([0x24, 0x0A, 0xC4, 0, 0, 1]);
    const OTHER: HwAddr = HwAddr([0x24, 0x0A, 0xC4, 0, 0, 2]);

    #[test]
    fn zero_always_rejected() {
        let mut g = SequenceGuard::new();
        assert!(!g.is_valid(PEER, 0));
        assert!(g.is_valid(PEER, 5));
        assert!(!g.is_valid(PEER, 0));
        assert_eq!(g.last_accepted(&PEER), Some(5));
    }

    #[test]
    fn first_value_is_baseline() {
        let mut g = SequenceGuard::new();
        assert!(g.is_valid(PEER, 3_000_000_000));
        assert_eq!(g.last_accepted(&PEER), Some(3_000_000_000));
    }

    #[test]
    fn older_rejected_newer_accepted() {
        let mut g = SequenceGuard::new();
        assert!(g.is_valid(PEER, 100));
        assert!(!g.is_valid(PEER, 99));
        assert!(g.is_valid(PEER, 101));
        assert_eq!(g.last_accepted(&PEER), Some(101));
        assert!(!g.is_valid(PEER, 100));
    }

    #[test]
    fn exact_repeat_of_watermark_is_accepted() {
        let mut g = SequenceGuard::new();
        assert!(g.is_valid(PEER, 42));
        assert!(g.is_valid(PEER, 42));
        assert_eq!(g.last_accepted(&PEER), Some(42));
    }

    #[test]
    fn rollover_accepted_without_moving_watermark() {
        let mut g = SequenceGuard::new();
        assert!(g.is_valid(PEER, u32::MAX - 1));
        // 3 - (MAX - 1) wraps to 5: ahead of the watermark.
        assert!(g.is_valid(PEER, 3));
        assert_eq!(g.last_accepted(&PEER), Some(u32::MAX - 1));
        // Far behind the watermark.
        assert!(!g.is_valid(PEER, u32::MAX / 2));
    }

    #[test]
    fn windows_are_per_peer() {
        let mut g = SequenceGuard::new();
        assert!(g.is_valid(PEER, 50));
        assert!(g.is_valid(OTHER, 1));
        assert!(!g.is_valid(PEER, 1));
        g.reset(&PEER);
        assert_eq!(g.last_accepted(&PEER), None);
        assert!(g.is_valid(PEER, 1));
        assert_eq!(g.last_accepted(&OTHER), Some(1));
    }

    proptest! {
        #[test]
        fn successor_accepted_predecessor_rejected(n in 2u32..u32::MAX) {
            let mut g = SequenceGuard::new();
            prop_assert!(g.is_valid(PEER, n));
            prop_assert!(!g.is_valid(PEER, n - 1));
            prop_assert!(g.is_valid(PEER, n + 1));
            prop_assert_eq!(g.last_accepted(&PEER), Some(n + 1));
        }
    }
}
