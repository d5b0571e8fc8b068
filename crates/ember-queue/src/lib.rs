//! # Ember Command Queue
//!
//! Client-facing command queue: events, the background completion worker
//! and the scheduler tying batches, hazards and host transfers together.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Scheduler                               │
//! │                                                                      │
//! │   client threads                              completion worker      │
//! │   ──────────────                              ─────────────────      │
//! │   submit / flush / finish                     wait_for_serial        │
//! │          │                                          │                │
//! │          ▼                                          ▼                │
//! │   ┌─────────────────────── queue lock ──────────────────────────┐    │
//! │   │ CommandBatch · DependencyTracker · HostTransferQueue ·      │    │
//! │   │ EventRegistry · serial bookkeeping                          │    │
//! │   └─────────────────────────────────────────────────────────────┘    │
//! │          │ settle (lock released)                                    │
//! │          ▼                                                           │
//! │       Event status + callbacks                                       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let queue = Scheduler::new(device, QueueConfig::default())?;
//! let upload = queue.submit(Operation::HostTransfer(write), &[])?;
//! let run = queue.submit(Operation::Dispatch(dispatch), &[upload])?;
//! queue.flush()?;
//! run.wait()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod event;
pub mod registry;
pub mod scheduler;
pub mod waiter;

#[cfg(test)]
mod mock;

// Re-exports
pub use config::QueueConfig;
pub use event::{wait_for_events, Event, EventStatus, LaneSync};
pub use registry::EventRegistry;
pub use scheduler::Scheduler;
pub use waiter::{CompletionWaiter, SerialSink, COMPLETION_QUEUE_CAPACITY};

pub use ember_cmd::{
    BufferCopy, Dispatch, HostTransfer, Operation, TransferKind, TransferRegion,
};
pub use ember_core::{Device, Error, Resource, Result, Serial, StagingBuffer};
