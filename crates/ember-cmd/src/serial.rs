//! # Serial Allocation
//!
//! Per-lane monotonic serial numbers.

use hashbrown::HashMap;

use ember_core::{LaneIndex, Serial};

/// Issues strictly increasing serials per lane
///
/// Not synchronized: the scheduler only calls it with its queue lock held.
#[derive(Debug, Default)]
pub struct SerialAllocator {
    /// Last value handed out per lane
    last: HashMap<LaneIndex, u64>,
}

impl SerialAllocator {
    /// Create an allocator with no serial issued on any lane
    pub fn new() -> Self {
        Self {
            last: HashMap::new(),
        }
    }

    /// Issue the next serial of `lane`
    ///
    /// # Panics
    /// If the lane's 64-bit counter wraps; that cannot happen within any
    /// realistic process lifetime and would break completion ordering.
    pub fn allocate(&mut self, lane: LaneIndex) -> Serial {
        let last = self.last.entry(lane).or_insert(0);
        let Some(next) = last.checked_add(1) else {
            panic!("serial counter overflow on {}", lane);
        };
        *last = next;
        Serial::new(lane, next)
    }

    /// Most recent serial issued on `lane`, or its zero sentinel
    pub fn last_allocated(&self, lane: LaneIndex) -> Serial {
        Serial::new(lane, self.last.get(&lane).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_per_lane() {
        let mut serials = SerialAllocator::new();
        let lane = LaneIndex::new(0);

        let first = serials.allocate(lane);
        assert_eq!(first.value(), 1);
        assert!(Serial::zero(lane) < first);

        let mut prev = first;
        for _ in 0..100 {
            let next = serials.allocate(lane);
            assert_eq!(next.value(), prev.value() + 1);
            prev = next;
        }
        assert_eq!(serials.last_allocated(lane), prev);
    }

    #[test]
    fn test_lanes_are_independent() {
        let mut serials = SerialAllocator::new();
        let a = LaneIndex::new(0);
        let b = LaneIndex::new(1);

        serials.allocate(a);
        serials.allocate(a);
        let first_b = serials.allocate(b);

        assert_eq!(first_b.value(), 1);
        assert_eq!(first_b.lane(), b);
        assert_eq!(serials.last_allocated(a).value(), 2);
        assert!(serials.last_allocated(LaneIndex::new(5)).is_zero());
    }
}
