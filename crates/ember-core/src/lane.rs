//! # Lane Allocation
//!
//! Hands out lane indices to command queues sharing one device.

use spin::Mutex;
use static_assertions::const_assert;

use crate::error::{Error, Result};
use crate::types::LaneIndex;

/// Maximum number of concurrently open lanes per device
pub const MAX_LANES: usize = 64;

const_assert!(MAX_LANES <= u64::BITS as usize);

/// Bitmask allocator for lane indices
#[derive(Debug)]
pub struct LaneAllocator {
    in_use: Mutex<u64>,
}

impl LaneAllocator {
    /// Create an allocator with every lane free
    pub const fn new() -> Self {
        Self {
            in_use: Mutex::new(0),
        }
    }

    /// Reserve the lowest free lane index
    pub fn allocate(&self) -> Result<LaneIndex> {
        let mut in_use = self.in_use.lock();
        let free = !*in_use;
        if free == 0 {
            log::error!("lane allocator exhausted ({} lanes in use)", MAX_LANES);
            return Err(Error::LanesExhausted);
        }

        let index = free.trailing_zeros();
        *in_use |= 1 << index;
        Ok(LaneIndex::new(index as u16))
    }

    /// Return a lane index to the pool
    pub fn release(&self, lane: LaneIndex) {
        let bit = 1u64 << lane.raw();
        let mut in_use = self.in_use.lock();
        debug_assert!(*in_use & bit != 0, "{} released twice", lane);
        *in_use &= !bit;
    }

    /// Number of lanes currently reserved
    pub fn in_use(&self) -> usize {
        self.in_use.lock().count_ones() as usize
    }
}

impl Default for LaneAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_lowest_free() {
        let lanes = LaneAllocator::new();
        let a = lanes.allocate().unwrap();
        let b = lanes.allocate().unwrap();
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);

        lanes.release(a);
        assert_eq!(lanes.allocate().unwrap().raw(), 0);
        assert_eq!(lanes.in_use(), 2);
    }

    #[test]
    fn test_exhaustion() {
        let lanes = LaneAllocator::new();
        for _ in 0..MAX_LANES {
            lanes.allocate().unwrap();
        }
        assert_eq!(lanes.allocate(), Err(Error::LanesExhausted));
    }
}
