//! # Dependency Tracker
//!
//! Remembers which resources the open recording scope read and wrote so the
//! scheduler knows when the next access needs a barrier.
//!
//! A hazard exists when the new access would race with a recorded one:
//!
//! | recorded \ new | read     | write    |
//! |----------------|----------|----------|
//! | read           | -        | barrier  |
//! | write          | barrier  | barrier  |
//!
//! Sub-allocations are tracked under their parent allocation as well, so an
//! access to a sub-range collides with accesses to the whole buffer. Both
//! sets are bounded; reaching the bound forces a barrier, which clears them.

use hashbrown::HashSet;

use ember_core::{Resource, ResourceId};

/// Entries per set before a barrier is forced
pub const MAX_TRACKED_ENTRIES: usize = 64;

static_assertions::const_assert!(MAX_TRACKED_ENTRIES > 0);

/// One resource access of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    /// Accessed resource
    pub id: ResourceId,
    /// Allocation the resource is a sub-range of
    pub parent: Option<ResourceId>,
    /// Write (or read-write) access
    pub is_write: bool,
}

impl Access {
    /// Access to `resource`
    pub fn of(resource: &dyn Resource, is_write: bool) -> Self {
        Self {
            id: resource.id(),
            parent: resource.parent(),
            is_write,
        }
    }
}

/// Read/write sets since the last barrier
#[derive(Debug, Default)]
pub struct DependencyTracker {
    reads: HashSet<ResourceId>,
    writes: HashSet<ResourceId>,
}

impl DependencyTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            reads: HashSet::new(),
            writes: HashSet::new(),
        }
    }

    /// Record an access to `resource`; returns whether a barrier must come first
    ///
    /// When it returns `true` the sets have already been reset to contain
    /// only this access, matching a barrier being appended before it.
    pub fn record(&mut self, resource: &dyn Resource, is_write: bool) -> bool {
        self.record_accesses(&[Access::of(resource, is_write)])
    }

    /// [`record`](Self::record) by identity
    pub fn record_access(
        &mut self,
        id: ResourceId,
        parent: Option<ResourceId>,
        is_write: bool,
    ) -> bool {
        self.record_accesses(&[Access {
            id,
            parent,
            is_write,
        }])
    }

    /// Record every access of one operation
    ///
    /// All accesses are checked against the state before the operation, so
    /// an operation may read and write the same resource without tripping
    /// over itself, and a barrier forced by one access never drops another.
    ///
    /// An operation touching more resources than a set holds also gets a
    /// barrier. The accesses past the bound are not kept; the saturated set
    /// forces a barrier before the next operation, which orders them.
    pub fn record_accesses(&mut self, accesses: &[Access]) -> bool {
        let mut needs_barrier = self.is_full() || accesses.iter().any(|a| self.conflicts(a));
        if needs_barrier {
            log::trace!(
                "tracker: barrier before {} accesses ({} reads, {} writes)",
                accesses.len(),
                self.reads.len(),
                self.writes.len()
            );
            self.clear();
        }

        let mut dropped = 0;
        for access in accesses {
            let set = if access.is_write {
                &mut self.writes
            } else {
                &mut self.reads
            };
            for id in core::iter::once(access.id).chain(access.parent) {
                if !insert_bounded(set, id) {
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            log::trace!("tracker: {} ids past the bound, barrier required", dropped);
            needs_barrier = true;
        }
        needs_barrier
    }

    /// Forget every recorded access
    pub fn clear(&mut self) {
        self.reads.clear();
        self.writes.clear();
    }

    /// Distinct ids recorded across both sets
    pub fn len(&self) -> usize {
        self.reads.len() + self.writes.len()
    }

    /// Check if nothing is recorded
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    fn conflicts(&self, access: &Access) -> bool {
        let hit = |set: &HashSet<ResourceId>| {
            set.contains(&access.id) || access.parent.map_or(false, |p| set.contains(&p))
        };
        hit(&self.writes) || (access.is_write && hit(&self.reads))
    }

    fn is_full(&self) -> bool {
        self.reads.len() >= MAX_TRACKED_ENTRIES || self.writes.len() >= MAX_TRACKED_ENTRIES
    }
}

fn insert_bounded(set: &mut HashSet<ResourceId>, id: ResourceId) -> bool {
    if set.len() >= MAX_TRACKED_ENTRIES && !set.contains(&id) {
        return false;
    }
    set.insert(id);
    true
}
