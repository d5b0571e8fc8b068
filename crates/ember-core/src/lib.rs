//! # Ember Core
//!
//! Foundational types and collaborator traits for the Ember command queue.
//!
//! This crate holds everything the scheduling layers agree on but that does
//! not itself schedule anything:
//!
//! - Lane-local [`Serial`] numbers and the [`LaneAllocator`]
//! - The unified [`Error`] type
//! - Resource identity ([`ResourceId`]) and host memory ([`HostMemory`])
//! - Encoded batch records handed to the device ([`BatchRecord`])
//! - The [`Device`], [`Resource`] and [`StagingBuffer`] collaborator traits
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ember-core                           │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Traits    │  │   Types     │  │     Error           │  │
//! │  │  (Device,   │  │ (Serial,    │  │   Handling          │  │
//! │  │  Resource)  │  │  LaneIndex) │  │                     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod command;
pub mod error;
pub mod host;
pub mod lane;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use command::{BatchRecord, CopyRegion, MemoryBarrier, PipelineStage};
pub use error::{Error, Result};
pub use host::{BufferRect, HostMemory};
pub use lane::{LaneAllocator, MAX_LANES};
pub use traits::*;
pub use types::*;
