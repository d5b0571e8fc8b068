//! # Event Registry
//!
//! Per-serial buckets of the events a lane still has to settle and the
//! resources it keeps alive until then.

use std::collections::BTreeMap;
use std::sync::Arc;

use ember_core::{Error, LaneIndex, Resource, Result, Serial};

use crate::event::Event;

#[derive(Default)]
struct Bucket {
    events: Vec<Event>,
    retained: Vec<Arc<dyn Resource>>,
}

/// Serial → bucket map of one lane
///
/// Buckets are created on first reference to a serial and removed once that
/// serial is settled. Taking events out of the registry does not change
/// their status; the caller applies statuses after releasing its lock.
pub struct EventRegistry {
    lane: LaneIndex,
    buckets: BTreeMap<u64, Bucket>,
}

impl EventRegistry {
    /// Create an empty registry for `lane`
    pub fn new(lane: LaneIndex) -> Self {
        Self {
            lane,
            buckets: BTreeMap::new(),
        }
    }

    fn bucket(&mut self, serial: Serial) -> Result<&mut Bucket> {
        if serial.lane() != self.lane {
            return Err(Error::LaneMismatch);
        }
        Ok(self.buckets.entry(serial.value()).or_default())
    }

    /// Bind `event` to `serial`
    pub fn register(&mut self, serial: Serial, event: Event) -> Result<()> {
        self.bucket(serial)?.events.push(event);
        Ok(())
    }

    /// Keep `resource` alive until `serial` is settled
    pub fn retain(&mut self, serial: Serial, resource: Arc<dyn Resource>) -> Result<()> {
        self.bucket(serial)?.retained.push(resource);
        Ok(())
    }

    /// Events bound to exactly `serial`
    pub fn events(&self, serial: Serial) -> &[Event] {
        if serial.lane() != self.lane {
            return &[];
        }
        self.buckets
            .get(&serial.value())
            .map(|bucket| bucket.events.as_slice())
            .unwrap_or(&[])
    }

    /// Remove the bucket of `serial`, releasing its resources
    pub fn take(&mut self, serial: Serial) -> Vec<Event> {
        if serial.lane() != self.lane {
            return Vec::new();
        }
        self.buckets
            .remove(&serial.value())
            .map(|bucket| bucket.events)
            .unwrap_or_default()
    }

    /// Remove every bucket up to and including `serial`, lowest first
    pub fn take_up_to(&mut self, serial: Serial) -> Vec<Event> {
        if serial.lane() != self.lane {
            return Vec::new();
        }
        let remaining = self.buckets.split_off(&(serial.value().saturating_add(1)));
        std::mem::replace(&mut self.buckets, remaining)
            .into_values()
            .flat_map(|bucket| bucket.events)
            .collect()
    }

    /// Remove everything
    pub fn take_all(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.buckets)
            .into_values()
            .flat_map(|bucket| bucket.events)
            .collect()
    }

    /// Events still registered
    pub fn event_count(&self) -> usize {
        self.buckets.values().map(|b| b.events.len()).sum()
    }

    /// Resources still retained
    pub fn retained_count(&self) -> usize {
        self.buckets.values().map(|b| b.retained.len()).sum()
    }

    /// Check if no bucket is left
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("lane", &self.lane)
            .field("buckets", &self.buckets.len())
            .field("events", &self.event_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::detached;
    use ember_core::{AccessFlags, ResourceId};

    struct Buf;

    impl Resource for Buf {
        fn id(&self) -> ResourceId {
            ResourceId::new(7)
        }
        fn access(&self) -> AccessFlags {
            AccessFlags::READ
        }
        fn size(&self) -> u64 {
            16
        }
    }

    fn serial(value: u64) -> Serial {
        Serial::new(LaneIndex::new(0), value)
    }

    #[test]
    fn test_take_up_to_is_ordered() {
        let mut registry = EventRegistry::new(LaneIndex::new(0));
        let (a, b, c) = (detached(1), detached(2), detached(3));
        registry.register(serial(2), b.clone()).unwrap();
        registry.register(serial(1), a.clone()).unwrap();
        registry.register(serial(3), c.clone()).unwrap();

        let settled = registry.take_up_to(serial(2));
        assert_eq!(settled.len(), 2);
        assert!(settled[0].ptr_eq(&a));
        assert!(settled[1].ptr_eq(&b));
        assert_eq!(registry.events(serial(3)).len(), 1);

        // settling again finds nothing
        assert!(registry.take_up_to(serial(2)).is_empty());
    }

    #[test]
    fn test_retained_released_with_bucket() {
        let mut registry = EventRegistry::new(LaneIndex::new(0));
        let buf: Arc<dyn Resource> = Arc::new(Buf);
        registry.retain(serial(1), buf.clone()).unwrap();
        assert_eq!(Arc::strong_count(&buf), 2);

        assert!(registry.take(serial(1)).is_empty());
        assert_eq!(Arc::strong_count(&buf), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lane_mismatch() {
        let mut registry = EventRegistry::new(LaneIndex::new(0));
        let other = Serial::new(LaneIndex::new(1), 1);
        assert_eq!(
            registry.register(other, detached(1)),
            Err(Error::LaneMismatch)
        );
        assert!(registry.take_up_to(other).is_empty());
    }

    #[test]
    fn test_take_all() {
        let mut registry = EventRegistry::new(LaneIndex::new(0));
        registry.register(serial(1), detached(1)).unwrap();
        registry.register(serial(1), detached(1)).unwrap();
        registry.register(serial(4), detached(4)).unwrap();
        assert_eq!(registry.event_count(), 3);
        assert_eq!(registry.take_all().len(), 3);
        assert_eq!(registry.event_count(), 0);
    }
}
