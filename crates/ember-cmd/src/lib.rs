//! # Ember Command System
//!
//! Command batches, hazard tracking and deferred host transfers.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Command Recording Pipeline                     │
//! │                                                                   │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────────┐     │
//! │  │  Operation   │    │  Dependency  │    │  Command Batch   │     │
//! │  │  (client)    │───▶│   Tracker    │───▶│  (open, serial)  │     │
//! │  └──────┬───────┘    └──────────────┘    └────────┬─────────┘     │
//! │         │                                         │ flush         │
//! │  ┌──────▼───────┐                        ┌────────▼─────────┐     │
//! │  │ Host Transfer│  resolved once the     │     Device       │     │
//! │  │    Queue     │◀── serial completes ───│  (submit/wait)   │     │
//! │  └──────────────┘                        └──────────────────┘     │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Recording Flow
//!
//! 1. The scheduler receives an [`Operation`]
//! 2. Every resource it touches goes through the [`DependencyTracker`]
//! 3. A barrier is appended when the tracker reports a hazard
//! 4. The operation's records are appended to the open [`CommandBatch`]
//! 5. Host copies register a [`HostTransferEntry`] for the batch's serial

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod batch;
pub mod op;
pub mod serial;
pub mod tracker;
pub mod transfer;

// Re-exports
pub use batch::{BatchState, CommandBatch};
pub use op::{BufferCopy, Dispatch, HostTransfer, Operation, TransferKind, TransferRegion};
pub use serial::SerialAllocator;
pub use tracker::{Access, DependencyTracker, MAX_TRACKED_ENTRIES};
pub use transfer::{HostTransferEntry, HostTransferQueue, ResolveReport};
