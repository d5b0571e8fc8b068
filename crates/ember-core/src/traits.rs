//! # Ember Core Traits
//!
//! Interfaces of the collaborators the command queue drives but does not own.
//!
//! ```text
//! Device
//!    │
//!    ├── submit / wait_for_serial / is_serial_reached
//!    ├── LaneAllocator
//!    └── StagingBuffer (allocate_staging)
//!
//! Resource
//!    │
//!    └── StagingBuffer
//! ```

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::time::Duration;

use crate::command::BatchRecord;
use crate::error::{Error, Result};
use crate::lane::LaneAllocator;
use crate::types::{ResourceId, Serial};

// =============================================================================
// RESOURCES
// =============================================================================

bitflags::bitflags! {
    /// Device-side access scope of a resource
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        /// Kernels and copies may read it
        const READ = 1 << 0;
        /// Kernels and copies may write it
        const WRITE = 1 << 1;
        /// Read and write
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// A buffer or image the queue can reference
///
/// The queue only ever looks at identity and access scope; storage belongs
/// to the resource itself.
pub trait Resource: Send + Sync {
    /// Stable identity
    fn id(&self) -> ResourceId;

    /// Identity of the allocation this resource is a sub-range of
    fn parent(&self) -> Option<ResourceId> {
        None
    }

    /// Access scope
    fn access(&self) -> AccessFlags;

    /// Size in bytes
    fn size(&self) -> u64;

    /// Check if device operations may read it
    fn is_readable(&self) -> bool {
        self.access().contains(AccessFlags::READ)
    }

    /// Check if device operations may write it
    fn is_writable(&self) -> bool {
        self.access().contains(AccessFlags::WRITE)
    }
}

/// Host-visible buffer used to stage transfers to and from client memory
pub trait StagingBuffer: Resource {
    /// Copy bytes out of the staging buffer
    fn read(&self, offset: u64, dst: &mut [u8]) -> Result<()>;

    /// Copy bytes into the staging buffer
    fn write(&self, offset: u64, src: &[u8]) -> Result<()>;

    /// Fill `size` bytes at `offset` by repeating `pattern`
    fn fill(&self, pattern: &[u8], offset: u64, size: u64) -> Result<()> {
        if pattern.is_empty() || size % pattern.len() as u64 != 0 {
            return Err(Error::InvalidParameter);
        }
        let bytes: Vec<u8> = pattern
            .iter()
            .copied()
            .cycle()
            .take(size as usize)
            .collect();
        self.write(offset, &bytes)
    }
}

// =============================================================================
// DEVICE
// =============================================================================

/// The device the queue submits to
///
/// Every lane completes its serials in submission order. An implementation
/// must treat a submission carrying a serial that was previously rejected as
/// the authoritative submission for that serial.
pub trait Device: Send + Sync + 'static {
    /// Lane indices of this device
    fn lane_allocator(&self) -> &LaneAllocator;

    /// Hand off a batch; the device signals `serial` once it has executed
    fn submit(&self, serial: Serial, records: Vec<BatchRecord>) -> Result<()>;

    /// Block until `serial` is reached, the timeout elapses
    /// (`Error::Timeout`) or the device fails
    fn wait_for_serial(&self, serial: Serial, timeout: Duration) -> Result<()>;

    /// Non-blocking completion poll
    fn is_serial_reached(&self, serial: Serial) -> bool;

    /// Allocate a host-visible staging buffer
    fn allocate_staging(&self, size: u64) -> Result<Arc<dyn StagingBuffer>>;
}
