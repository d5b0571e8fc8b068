//! # Batch Records
//!
//! The encoded operation records a batch hands to the device.
//!
//! Turning these into native submission data is the device's job; the
//! scheduling core only decides which records go into which batch and where
//! barriers are required.

use alloc::vec::Vec;

use crate::host::BufferRect;
use crate::types::{KernelId, ResourceId};

// =============================================================================
// BARRIERS
// =============================================================================

bitflags::bitflags! {
    /// Pipeline stages that can be synchronized
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        /// Compute shader
        const COMPUTE_SHADER = 1 << 0;
        /// Transfer operations
        const TRANSFER = 1 << 1;
        /// Host access
        const HOST = 1 << 2;
        /// All device stages
        const ALL_COMMANDS = Self::COMPUTE_SHADER.bits() | Self::TRANSFER.bits();
    }
}

/// Memory barrier between two groups of pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBarrier {
    /// Stages that must complete first
    pub src_stage: PipelineStage,
    /// Stages that wait
    pub dst_stage: PipelineStage,
}

impl MemoryBarrier {
    /// Full execution and memory barrier between compute work
    pub const fn execution() -> Self {
        Self {
            src_stage: PipelineStage::ALL_COMMANDS,
            dst_stage: PipelineStage::ALL_COMMANDS,
        }
    }

    /// Device writes visible to host reads and to later device work
    pub const fn device_to_host() -> Self {
        Self {
            src_stage: PipelineStage::ALL_COMMANDS,
            dst_stage: PipelineStage::ALL_COMMANDS.union(PipelineStage::HOST),
        }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// Source/destination layout of a copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyRegion {
    /// Contiguous byte range
    Linear {
        /// Offset into the source
        src_offset: u64,
        /// Offset into the destination
        dst_offset: u64,
        /// Byte count
        size: u64,
    },
    /// Strided box
    Rect {
        /// Box inside the source
        src: BufferRect,
        /// Box inside the destination
        dst: BufferRect,
    },
}

impl CopyRegion {
    /// Bytes moved by the copy
    pub fn byte_count(&self) -> u64 {
        match self {
            CopyRegion::Linear { size, .. } => *size,
            CopyRegion::Rect { src, .. } => src.copy_size() as u64,
        }
    }
}

/// One encoded entry of a command batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRecord {
    /// Copy between two resources
    Copy {
        /// Source resource
        src: ResourceId,
        /// Destination resource
        dst: ResourceId,
        /// Layout
        region: CopyRegion,
    },
    /// Compute dispatch
    Dispatch {
        /// Kernel to run
        kernel: KernelId,
        /// Workgroup counts (x, y, z)
        workgroups: [u32; 3],
        /// Resources bound as kernel arguments
        args: Vec<ResourceId>,
    },
    /// Ordering point
    Barrier(MemoryBarrier),
}

impl BatchRecord {
    /// Check if this record is a barrier
    pub fn is_barrier(&self) -> bool {
        matches!(self, BatchRecord::Barrier(_))
    }
}
