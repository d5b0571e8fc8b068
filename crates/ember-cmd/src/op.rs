//! # Operations
//!
//! What a client hands the scheduler, and how host transfers are staged
//! into batch records.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use ember_core::{
    BatchRecord, BufferRect, CopyRegion, Error, HostMemory, KernelId, MemoryBarrier, Resource,
    Result, StagingBuffer,
};

// =============================================================================
// OPERATION
// =============================================================================

/// One unit of work enqueued on a command queue
pub enum Operation {
    /// Device-side copy between two resources
    Copy(BufferCopy),
    /// Kernel dispatch
    Dispatch(Dispatch),
    /// Orders everything enqueued before it against everything after it
    Barrier,
    /// Completion point with no device work of its own
    Marker,
    /// Copy between a resource and client host memory
    HostTransfer(HostTransfer),
}

impl Operation {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Copy(_) => "copy",
            Operation::Dispatch(_) => "dispatch",
            Operation::Barrier => "barrier",
            Operation::Marker => "marker",
            Operation::HostTransfer(t) => t.kind.name(),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Device-side copy
pub struct BufferCopy {
    /// Read side
    pub src: Arc<dyn Resource>,
    /// Written side
    pub dst: Arc<dyn Resource>,
    /// Layout
    pub region: CopyRegion,
}

impl BufferCopy {
    /// Check the region against both resources
    pub fn validate(&self) -> Result<()> {
        match self.region {
            CopyRegion::Linear {
                src_offset,
                dst_offset,
                size,
            } => {
                check_range(self.src.as_ref(), src_offset, size)?;
                check_range(self.dst.as_ref(), dst_offset, size)
            }
            CopyRegion::Rect { src, dst } => {
                let size = src.checked_copy_size().ok_or(Error::InvalidParameter)?;
                if dst.checked_copy_size() != Some(size) {
                    return Err(Error::InvalidParameter);
                }
                check_range(self.src.as_ref(), 0, rect_span(&src)?)?;
                check_range(self.dst.as_ref(), 0, rect_span(&dst)?)
            }
        }
    }

    /// Encoded form
    pub fn record(&self) -> BatchRecord {
        BatchRecord::Copy {
            src: self.src.id(),
            dst: self.dst.id(),
            region: self.region,
        }
    }
}

/// Kernel dispatch
pub struct Dispatch {
    /// Kernel
    pub kernel: KernelId,
    /// Workgroup counts
    pub workgroups: [u32; 3],
    /// Bound resources; written ones are those with write access
    pub args: Vec<Arc<dyn Resource>>,
}

impl Dispatch {
    /// Encoded form
    pub fn record(&self) -> BatchRecord {
        BatchRecord::Dispatch {
            kernel: self.kernel,
            workgroups: self.workgroups,
            args: self.args.iter().map(|a| a.id()).collect(),
        }
    }
}

fn rect_span(rect: &BufferRect) -> Result<u64> {
    rect.checked_span()
        .map(|span| span as u64)
        .ok_or(Error::InvalidParameter)
}

fn check_range(resource: &dyn Resource, offset: u64, size: u64) -> Result<()> {
    let end = offset.checked_add(size).ok_or(Error::InvalidParameter)?;
    if end > resource.size() {
        return Err(Error::InvalidParameter);
    }
    Ok(())
}

// =============================================================================
// HOST TRANSFERS
// =============================================================================

/// Kind of host transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Linear buffer read
    ReadBuffer,
    /// Strided buffer read
    ReadBufferRect,
    /// Image read
    ReadImage,
    /// Linear buffer write
    WriteBuffer,
    /// Strided buffer write
    WriteBufferRect,
    /// Image write
    WriteImage,
    /// Pattern fill
    FillBuffer,
}

impl TransferKind {
    /// Check if the transfer moves data from the device to the host
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            TransferKind::ReadBuffer | TransferKind::ReadBufferRect | TransferKind::ReadImage
        )
    }

    /// Check if the transfer uses a strided region
    pub const fn is_rect(self) -> bool {
        matches!(
            self,
            TransferKind::ReadBufferRect
                | TransferKind::ReadImage
                | TransferKind::WriteBufferRect
                | TransferKind::WriteImage
        )
    }

    /// Short name for logging
    pub const fn name(self) -> &'static str {
        match self {
            TransferKind::ReadBuffer => "read-buffer",
            TransferKind::ReadBufferRect => "read-buffer-rect",
            TransferKind::ReadImage => "read-image",
            TransferKind::WriteBuffer => "write-buffer",
            TransferKind::WriteBufferRect => "write-buffer-rect",
            TransferKind::WriteImage => "write-image",
            TransferKind::FillBuffer => "fill-buffer",
        }
    }
}

/// Area a host transfer covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRegion {
    /// `size` bytes at `offset` in the resource, at offset 0 in host memory
    Linear {
        /// Offset in the resource
        offset: u64,
        /// Byte count
        size: u64,
    },
    /// Strided box on both sides
    Rect {
        /// Box in the resource
        device: BufferRect,
        /// Box in host memory
        host: BufferRect,
    },
}

/// Copy between a resource and client host memory
///
/// For fills, `host` holds the pattern.
pub struct HostTransfer {
    /// Kind
    pub kind: TransferKind,
    /// Resource on the device side
    pub target: Arc<dyn Resource>,
    /// Covered area
    pub region: TransferRegion,
    /// Client memory
    pub host: HostMemory,
    /// Return only once the transfer has completed
    pub blocking: bool,
}

impl HostTransfer {
    /// Read `size` bytes at `offset` of `target` into `host`
    pub fn read_buffer(
        target: Arc<dyn Resource>,
        offset: u64,
        size: u64,
        host: HostMemory,
        blocking: bool,
    ) -> Self {
        Self {
            kind: TransferKind::ReadBuffer,
            target,
            region: TransferRegion::Linear { offset, size },
            host,
            blocking,
        }
    }

    /// Write the first `size` bytes of `host` at `offset` of `target`
    pub fn write_buffer(
        target: Arc<dyn Resource>,
        offset: u64,
        size: u64,
        host: HostMemory,
        blocking: bool,
    ) -> Self {
        Self {
            kind: TransferKind::WriteBuffer,
            target,
            region: TransferRegion::Linear { offset, size },
            host,
            blocking,
        }
    }

    /// Fill `size` bytes at `offset` of `target` with `pattern`
    pub fn fill_buffer(target: Arc<dyn Resource>, pattern: &[u8], offset: u64, size: u64) -> Self {
        Self {
            kind: TransferKind::FillBuffer,
            target,
            region: TransferRegion::Linear { offset, size },
            host: HostMemory::from_vec(pattern.to_vec()),
            blocking: false,
        }
    }

    /// Read the `device` box of `target` into the `host` box of `memory`
    pub fn read_buffer_rect(
        target: Arc<dyn Resource>,
        device: BufferRect,
        host: BufferRect,
        memory: HostMemory,
        blocking: bool,
    ) -> Self {
        Self {
            kind: TransferKind::ReadBufferRect,
            target,
            region: TransferRegion::Rect { device, host },
            host: memory,
            blocking,
        }
    }

    /// Write the `host` box of `memory` into the `device` box of `target`
    pub fn write_buffer_rect(
        target: Arc<dyn Resource>,
        device: BufferRect,
        host: BufferRect,
        memory: HostMemory,
        blocking: bool,
    ) -> Self {
        Self {
            kind: TransferKind::WriteBufferRect,
            target,
            region: TransferRegion::Rect { device, host },
            host: memory,
            blocking,
        }
    }

    /// Read an image region into host memory laid out with the given pitches
    pub fn read_image(
        target: Arc<dyn Resource>,
        image: BufferRect,
        row_pitch: usize,
        slice_pitch: usize,
        memory: HostMemory,
        blocking: bool,
    ) -> Self {
        Self {
            kind: TransferKind::ReadImage,
            target,
            region: image_region(image, row_pitch, slice_pitch),
            host: memory,
            blocking,
        }
    }

    /// Write host memory laid out with the given pitches into an image region
    pub fn write_image(
        target: Arc<dyn Resource>,
        image: BufferRect,
        row_pitch: usize,
        slice_pitch: usize,
        memory: HostMemory,
        blocking: bool,
    ) -> Self {
        Self {
            kind: TransferKind::WriteImage,
            target,
            region: image_region(image, row_pitch, slice_pitch),
            host: memory,
            blocking,
        }
    }

    /// Check the region against the resource and host memory
    pub fn validate(&self) -> Result<()> {
        match (self.kind.is_rect(), self.region) {
            (false, TransferRegion::Linear { offset, size }) => {
                if size == 0 {
                    return Err(Error::InvalidParameter);
                }
                check_range(self.target.as_ref(), offset, size)?;
                if self.kind == TransferKind::FillBuffer {
                    let pattern = self.host.len() as u64;
                    if pattern == 0 || size % pattern != 0 {
                        return Err(Error::InvalidParameter);
                    }
                } else if (self.host.len() as u64) < size {
                    return Err(Error::BufferOverflow);
                }
                Ok(())
            }
            (true, TransferRegion::Rect { device, host }) => {
                if device.is_empty() || device.region != host.region {
                    return Err(Error::InvalidParameter);
                }
                device.checked_copy_size().ok_or(Error::InvalidParameter)?;
                check_range(self.target.as_ref(), 0, rect_span(&device)?)?;
                if (self.host.len() as u64) < rect_span(&host)? {
                    return Err(Error::BufferOverflow);
                }
                Ok(())
            }
            _ => Err(Error::InvalidParameter),
        }
    }

    /// Size of the staging buffer this transfer needs
    ///
    /// Rect staging mirrors the host layout so the host side can be copied
    /// row by row at identical offsets.
    pub fn staging_size(&self) -> u64 {
        match self.region {
            TransferRegion::Linear { size, .. } => size,
            TransferRegion::Rect { host, .. } => host.span() as u64,
        }
    }

    /// Load host data into `staging` ahead of the device copy
    ///
    /// Reads have nothing to stage.
    pub fn stage(&self, staging: &dyn StagingBuffer) -> Result<()> {
        match (self.kind, self.region) {
            (TransferKind::FillBuffer, TransferRegion::Linear { size, .. }) => {
                staging.fill(&self.host.to_vec(), 0, size)
            }
            (kind, _) if kind.is_read() => Ok(()),
            (_, TransferRegion::Linear { size, .. }) => {
                let mut bytes = vec![0u8; size as usize];
                self.host.read(0, &mut bytes)?;
                staging.write(0, &bytes)
            }
            (_, TransferRegion::Rect { host, .. }) => {
                let mut row = vec![0u8; host.row_size()];
                for offset in host.rows() {
                    self.host.read(offset, &mut row)?;
                    staging.write(offset as u64, &row)?;
                }
                Ok(())
            }
        }
    }

    /// Device copy between the target and `staging`
    pub fn copy_record(&self, staging: &dyn StagingBuffer) -> BatchRecord {
        let (src, dst) = if self.kind.is_read() {
            (self.target.id(), staging.id())
        } else {
            (staging.id(), self.target.id())
        };

        let region = match self.region {
            TransferRegion::Linear { offset, size } if self.kind.is_read() => CopyRegion::Linear {
                src_offset: offset,
                dst_offset: 0,
                size,
            },
            TransferRegion::Linear { offset, size } => CopyRegion::Linear {
                src_offset: 0,
                dst_offset: offset,
                size,
            },
            TransferRegion::Rect { device, host } if self.kind.is_read() => CopyRegion::Rect {
                src: device,
                dst: host,
            },
            TransferRegion::Rect { device, host } => CopyRegion::Rect {
                src: host,
                dst: device,
            },
        };

        BatchRecord::Copy { src, dst, region }
    }

    /// Barrier that makes the copy visible to whoever consumes it next
    ///
    /// It also orders every earlier command of the batch, so the caller may
    /// reset hazard tracking after it.
    pub fn completion_barrier(&self) -> MemoryBarrier {
        if self.kind.is_read() {
            MemoryBarrier::device_to_host()
        } else {
            MemoryBarrier::execution()
        }
    }
}

fn image_region(image: BufferRect, row_pitch: usize, slice_pitch: usize) -> TransferRegion {
    let host = BufferRect::new(
        [0; 3],
        image.region,
        row_pitch,
        slice_pitch,
        image.element_size,
    );
    TransferRegion::Rect {
        device: image,
        host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::tests::TestStaging;
    use ember_core::{AccessFlags, PipelineStage, ResourceId};

    struct Buf(u64, u64);

    impl Resource for Buf {
        fn id(&self) -> ResourceId {
            ResourceId::new(self.0)
        }
        fn access(&self) -> AccessFlags {
            AccessFlags::READ_WRITE
        }
        fn size(&self) -> u64 {
            self.1
        }
    }

    fn buf(id: u64, size: u64) -> Arc<dyn Resource> {
        Arc::new(Buf(id, size))
    }

    #[test]
    fn test_linear_validation() {
        let host = HostMemory::zeroed(16);
        assert!(HostTransfer::read_buffer(buf(1, 64), 48, 16, host.clone(), false)
            .validate()
            .is_ok());
        assert_eq!(
            HostTransfer::read_buffer(buf(1, 64), 56, 16, host.clone(), false).validate(),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            HostTransfer::write_buffer(buf(1, 64), 0, 32, host, false).validate(),
            Err(Error::BufferOverflow)
        );
    }

    #[test]
    fn test_oversized_rects_rejected() {
        let huge = BufferRect::new([0; 3], [1 << 40, 1 << 40, 1], 1, 1, 1);
        let read = HostTransfer::read_buffer_rect(buf(1, 64), huge, huge, HostMemory::zeroed(16), false);
        assert_eq!(read.validate(), Err(Error::InvalidParameter));

        // offset overflow with a small extent
        let far = BufferRect::new([0, usize::MAX, 0], [1, 2, 1], 1, 0, 1);
        let host = BufferRect::new([0; 3], [1, 2, 1], 0, 0, 1);
        let write = HostTransfer::write_buffer_rect(buf(1, 64), far, host, HostMemory::zeroed(16), false);
        assert_eq!(write.validate(), Err(Error::InvalidParameter));

        let copy = BufferCopy {
            src: buf(1, 64),
            dst: buf(2, 64),
            region: CopyRegion::Rect { src: huge, dst: huge },
        };
        assert_eq!(copy.validate(), Err(Error::InvalidParameter));
    }

    #[test]
    fn test_fill_pattern_must_divide_size() {
        assert!(HostTransfer::fill_buffer(buf(1, 64), &[1, 2, 3, 4], 0, 16)
            .validate()
            .is_ok());
        assert_eq!(
            HostTransfer::fill_buffer(buf(1, 64), &[1, 2, 3], 0, 16).validate(),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn test_read_record_direction() {
        let staging = TestStaging::new(99, 16);
        let read = HostTransfer::read_buffer(buf(1, 64), 8, 16, HostMemory::zeroed(16), false);
        assert_eq!(
            read.copy_record(&staging),
            BatchRecord::Copy {
                src: ResourceId::new(1),
                dst: ResourceId::new(99),
                region: CopyRegion::Linear {
                    src_offset: 8,
                    dst_offset: 0,
                    size: 16
                },
            }
        );
        let barrier = read.completion_barrier();
        assert_eq!(barrier.src_stage, PipelineStage::ALL_COMMANDS);
        assert!(barrier.dst_stage.contains(PipelineStage::ALL_COMMANDS | PipelineStage::HOST));
    }

    #[test]
    fn test_write_stages_host_bytes() {
        let staging = TestStaging::new(99, 4);
        let write = HostTransfer::write_buffer(
            buf(1, 64),
            0,
            4,
            HostMemory::from_vec(vec![5, 6, 7, 8, 9]),
            false,
        );
        write.stage(&staging).unwrap();
        assert_eq!(staging.bytes(), vec![5, 6, 7, 8]);
        assert_eq!(write.completion_barrier(), MemoryBarrier::execution());
    }

    #[test]
    fn test_image_region_is_host_packed() {
        let image = BufferRect::new([2, 2, 0], [4, 4, 1], 64, 0, 4);
        let read = HostTransfer::read_image(buf(1, 4096), image, 0, 0, HostMemory::zeroed(64), true);
        assert!(read.validate().is_ok());
        assert_eq!(read.staging_size(), 64);
    }
}
