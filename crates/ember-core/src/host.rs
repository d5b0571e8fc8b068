//! # Host Memory
//!
//! Client-owned host memory targeted by deferred transfers, and the
//! rectangle geometry used by rect and image transfers.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{Error, Result};

// =============================================================================
// HOST MEMORY
// =============================================================================

/// Shared host-side byte buffer
///
/// Clones alias the same storage, so the client keeps one handle while the
/// queue holds another until the deferred transfer has been resolved.
#[derive(Debug, Clone, Default)]
pub struct HostMemory {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl HostMemory {
    /// Allocate `len` zeroed bytes
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    /// Wrap existing bytes
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Copy `dst.len()` bytes starting at `offset` out of host memory
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let end = offset.checked_add(dst.len()).ok_or(Error::BufferOverflow)?;
        let src = bytes.get(offset..end).ok_or(Error::BufferOverflow)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Copy `src` into host memory starting at `offset`
    pub fn write(&self, offset: usize, src: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let end = offset.checked_add(src.len()).ok_or(Error::BufferOverflow)?;
        let dst = bytes.get_mut(offset..end).ok_or(Error::BufferOverflow)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Check if two handles alias the same storage
    pub fn ptr_eq(&self, other: &HostMemory) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

// =============================================================================
// BUFFER RECT
// =============================================================================

/// A 3D box inside linearly addressed memory
///
/// `origin` and `region` are in elements along x and in rows/slices along y
/// and z. A zero pitch means "tightly packed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRect {
    /// Origin (x in elements, y in rows, z in slices)
    pub origin: [usize; 3],
    /// Extent (width in elements, height in rows, depth in slices)
    pub region: [usize; 3],
    /// Bytes between consecutive rows
    pub row_pitch: usize,
    /// Bytes between consecutive slices
    pub slice_pitch: usize,
    /// Bytes per element
    pub element_size: usize,
}

impl BufferRect {
    /// Create a rect, resolving zero pitches to tightly packed ones
    pub fn new(
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        element_size: usize,
    ) -> Self {
        // saturated pitches fail the checked geometry below
        let row_pitch = if row_pitch == 0 {
            region[0].saturating_mul(element_size)
        } else {
            row_pitch
        };
        let slice_pitch = if slice_pitch == 0 {
            region[1].saturating_mul(row_pitch)
        } else {
            slice_pitch
        };

        Self {
            origin,
            region,
            row_pitch,
            slice_pitch,
            element_size,
        }
    }

    /// Bytes copied per row
    #[inline]
    pub const fn row_size(&self) -> usize {
        self.region[0] * self.element_size
    }

    /// Number of rows across all slices
    #[inline]
    pub const fn row_count(&self) -> usize {
        self.region[1] * self.region[2]
    }

    /// Total bytes covered by the box
    #[inline]
    pub const fn copy_size(&self) -> usize {
        self.row_size() * self.row_count()
    }

    /// Check if the box covers no bytes
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.region[0] == 0 || self.region[1] == 0 || self.region[2] == 0 || self.element_size == 0
    }

    /// Byte offset of row `y` of slice `z`
    #[inline]
    pub const fn row_offset(&self, y: usize, z: usize) -> usize {
        (self.origin[2] + z) * self.slice_pitch
            + (self.origin[1] + y) * self.row_pitch
            + self.origin[0] * self.element_size
    }

    /// One past the last byte the box touches
    pub const fn span(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        self.row_offset(self.region[1] - 1, self.region[2] - 1) + self.row_size()
    }

    /// [`copy_size`](Self::copy_size), or `None` if it overflows
    pub fn checked_copy_size(&self) -> Option<usize> {
        self.region[0]
            .checked_mul(self.element_size)?
            .checked_mul(self.region[1])?
            .checked_mul(self.region[2])
    }

    /// [`span`](Self::span), or `None` if any offset overflows
    ///
    /// Callers validate client rects with this before using the unchecked
    /// accessors.
    pub fn checked_span(&self) -> Option<usize> {
        let row_size = self.region[0].checked_mul(self.element_size)?;
        if self.is_empty() {
            return Some(0);
        }
        let last_slice = self.origin[2].checked_add(self.region[2] - 1)?;
        let last_row = self.origin[1].checked_add(self.region[1] - 1)?;
        last_slice
            .checked_mul(self.slice_pitch)?
            .checked_add(last_row.checked_mul(self.row_pitch)?)?
            .checked_add(self.origin[0].checked_mul(self.element_size)?)?
            .checked_add(row_size)
    }

    /// Byte offsets of every row, slice-major
    pub fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.region[2])
            .flat_map(move |z| (0..self.region[1]).map(move |y| self.row_offset(y, z)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_memory_bounds() {
        let mem = HostMemory::zeroed(8);
        mem.write(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mem.write(6, &[0; 4]), Err(Error::BufferOverflow));

        let mut out = [0u8; 2];
        mem.read(5, &mut out).unwrap();
        assert_eq!(out, [2, 3]);
        assert_eq!(mem.read(usize::MAX, &mut out), Err(Error::BufferOverflow));
    }

    #[test]
    fn test_rect_geometry() {
        let rect = BufferRect::new([1, 1, 0], [2, 2, 1], 4, 0, 1);
        assert_eq!(rect.slice_pitch, 8);
        assert_eq!(rect.checked_copy_size(), Some(4));
        assert_eq!(rect.checked_span(), Some(rect.span()));
        assert_eq!(rect.span(), 11);
        assert_eq!(rect.rows().collect::<Vec<_>>(), vec![5, 9]);

        let empty = BufferRect::new([3, 3, 3], [0, 2, 1], 0, 0, 4);
        assert!(empty.is_empty());
        assert_eq!(empty.checked_span(), Some(0));
    }

    #[test]
    fn test_rect_overflow_is_detected() {
        let huge = BufferRect::new([0; 3], [1 << 40, 1 << 40, 1], 1, 1, 1);
        assert_eq!(huge.checked_copy_size(), None);

        let packed = BufferRect::new([0; 3], [usize::MAX, 2, 2], 0, 0, 2);
        assert_eq!(packed.row_pitch, usize::MAX);
        assert_eq!(packed.checked_span(), None);

        let far = BufferRect::new([0, usize::MAX, 0], [1, 2, 1], 1, 0, 1);
        assert_eq!(far.checked_span(), None);
    }

    #[test]
    fn test_host_memory_aliasing() {
        let a = HostMemory::zeroed(4);
        let b = a.clone();
        b.write(0, &[9]).unwrap();
        assert_eq!(a.to_vec()[0], 9);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&HostMemory::zeroed(4)));
    }

    #[test]
    fn test_rect_packed_pitches() {
        let rect = BufferRect::new([0; 3], [4, 3, 2], 0, 0, 2);
        assert_eq!(rect.row_pitch, 8);
        assert_eq!(rect.slice_pitch, 24);
        assert_eq!(rect.copy_size(), 48);
        assert_eq!(rect.span(), 48);
    }

    #[test]
    fn test_rect_row_offsets_with_origin() {
        let rect = BufferRect::new([1, 1, 0], [2, 2, 1], 16, 0, 4);
        let rows: Vec<usize> = rect.rows().collect();
        assert_eq!(rows, vec![20, 36]);
        assert_eq!(rect.span(), 44);
    }
}
