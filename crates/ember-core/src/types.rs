//! # Ember Core Types
//!
//! Fundamental type definitions used across the queue stack.
//!
//! These types provide:
//! - Lane-local serial numbers with lane-checked ordering
//! - Strongly typed handles that cannot be mixed up

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

// =============================================================================
// LANE INDEX
// =============================================================================

/// Index of an independent, ordered submission stream on a device
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct LaneIndex(u16);

impl LaneIndex {
    /// Create a lane index
    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Get the raw index
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for LaneIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lane({})", self.0)
    }
}

impl fmt::Display for LaneIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lane{}", self.0)
    }
}

// =============================================================================
// SERIAL
// =============================================================================

/// Identifier of a submitted batch within a lane
///
/// Serials are totally ordered inside one lane. Comparing serials from two
/// different lanes has no meaning: `partial_cmp` returns `None` and every
/// ordering operator evaluates to `false`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Serial {
    lane: LaneIndex,
    value: u64,
}

impl Serial {
    /// Create a serial from its parts
    #[inline]
    pub const fn new(lane: LaneIndex, value: u64) -> Self {
        Self { lane, value }
    }

    /// The "nothing submitted yet" sentinel of a lane
    #[inline]
    pub const fn zero(lane: LaneIndex) -> Self {
        Self { lane, value: 0 }
    }

    /// Lane this serial belongs to
    #[inline]
    pub const fn lane(self) -> LaneIndex {
        self.lane
    }

    /// Lane-local counter value
    #[inline]
    pub const fn value(self) -> u64 {
        self.value
    }

    /// Check if this is the zero sentinel
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.value == 0
    }

    /// Check if both serials live on the same lane
    #[inline]
    pub const fn same_lane(self, other: Serial) -> bool {
        self.lane.0 == other.lane.0
    }
}

impl PartialOrd for Serial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.lane != other.lane {
            return None;
        }
        Some(self.value.cmp(&other.value))
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Serial({}#{})", self.lane, self.value)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.lane, self.value)
    }
}

// =============================================================================
// HANDLE TYPES
// =============================================================================

/// Numeric id tagged with the kind of object it names
///
/// A `ResourceId` and an `EventId` with the same number are different types,
/// so one cannot be passed where the other is expected. Values are assigned
/// by whoever creates the object; ember never interprets them.
#[repr(transparent)]
pub struct Handle<T> {
    id: u64,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Wrap `id`
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }

    /// The number behind the handle
    #[inline]
    pub const fn raw(self) -> u64 {
        self.id
    }
}

// Manual impls: derives would put bounds on the marker type.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = core::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Handle<{}>(0x{:x})", short, self.id)
    }
}

// Marker types for handles
/// Marker for resource handles
#[derive(Debug)]
pub enum ResourceMarker {}
/// Marker for event handles
#[derive(Debug)]
pub enum EventMarker {}
/// Marker for kernel handles
#[derive(Debug)]
pub enum KernelMarker {}

/// Stable identity of a buffer or image
pub type ResourceId = Handle<ResourceMarker>;
/// Identity of a client-visible event
pub type EventId = Handle<EventMarker>;
/// Identity of a compiled compute kernel
pub type KernelId = Handle<KernelMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_same_lane_ordering() {
        let lane = LaneIndex::new(3);
        let a = Serial::new(lane, 4);
        let b = Serial::new(lane, 5);
        assert!(a < b);
        assert!(Serial::zero(lane) < a);
        assert_eq!(a.partial_cmp(&a), Some(Ordering::Equal));
    }

    #[test]
    fn test_serial_cross_lane_is_unordered() {
        let a = Serial::new(LaneIndex::new(0), 1);
        let b = Serial::new(LaneIndex::new(1), 9);
        assert_eq!(a.partial_cmp(&b), None);
        assert!(!(a < b));
        assert!(!(a > b));
        assert_ne!(a, b);
        assert!(!a.same_lane(b));
    }

    #[test]
    fn test_handle_is_copy_without_marker_bounds() {
        let id = ResourceId::new(7);
        let copy = id;
        assert_eq!(id, copy);
        assert_eq!(ResourceId::new(7).raw(), 7);
        assert!(ResourceId::new(1) < ResourceId::new(2));
    }
}
