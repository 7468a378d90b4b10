//! Packet identifier allocation.
//!
//! QoS 1/2 PUBLISH, SUBSCRIBE and UNSUBSCRIBE each need a nonzero 16-bit
//! identifier that stays reserved until the matching acknowledgment arrives
//! [MQTT-2.3.1-2]. The allocator hands out ids sequentially and refuses to
//! reissue one that is still in flight.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct PacketIdAllocator {
    next_id: u16,
    in_use: HashSet<u16>,
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            in_use: HashSet::new(),
        }
    }

    /// Reserve an unused identifier. `None` when all 65535 are in flight.
    pub fn allocate(&mut self) -> Option<u16> {
        if self.next_id == 0 {
            self.next_id = 1;
        }
        let start = self.next_id;
        loop {
            let candidate = self.next_id;
            self.advance();
            if !self.in_use.contains(&candidate) {
                self.in_use.insert(candidate);
                return Some(candidate);
            }
            if self.next_id == start {
                return None;
            }
        }
    }

    /// Return an identifier once its exchange has completed: PUBACK for
    /// QoS 1, PUBCOMP for QoS 2, SUBACK and UNSUBACK for the control flows.
    pub fn release(&mut self, id: u16) {
        self.in_use.remove(&id);
    }

    pub fn is_in_use(&self, id: u16) -> bool {
        self.in_use.contains(&id)
    }

    pub fn in_flight(&self) -> usize {
        self.in_use.len()
    }

    /// Forget everything, for a clean-session reconnect.
    pub fn reset(&mut self) {
        self.in_use.clear();
        self.next_id = 1;
    }

    fn advance(&mut self) {
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_allocation() {
        let mut alloc = PacketIdAllocator::new();
        assert_eq!(alloc.allocate(), Some(1));
        assert_eq!(alloc.allocate(), Some(2));
        assert_eq!(alloc.allocate(), Some(3));
    }

    #[test]
    fn test_release_and_reuse() {
        let mut alloc = PacketIdAllocator::new();
        let first = alloc.allocate().unwrap();
        let second = alloc.allocate().unwrap();

        alloc.release(first);
        assert!(!alloc.is_in_use(first));
        assert!(alloc.is_in_use(second));
    }

    #[test]
    fn test_wraps_past_zero() {
        let mut alloc = PacketIdAllocator::new();
        alloc.next_id = 65535;
        assert_eq!(alloc.allocate(), Some(65535));
        assert_eq!(alloc.allocate(), Some(1));
    }

    #[test]
    fn test_in_flight_id_is_skipped() {
        let mut alloc = PacketIdAllocator::new();
        let held = alloc.allocate().unwrap();
        alloc.next_id = held;
        let next = alloc.allocate().unwrap();
        assert_ne!(next, held);
    }

    #[test]
    fn test_reset() {
        let mut alloc = PacketIdAllocator::new();
        alloc.allocate();
        alloc.allocate();
        alloc.reset();
        assert_eq!(alloc.in_flight(), 0);
        assert_eq!(alloc.allocate(), Some(1));
    }
}
