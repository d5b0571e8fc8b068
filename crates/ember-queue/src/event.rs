//! # Events
//!
//! Client-visible completion handles.
//!
//! ```text
//! Queued ──▶ Submitted ──▶ Running ──▶ Complete
//!    │           │            │
//!    └───────────┴────────────┴──────▶ Error
//! ```
//!
//! Status only ever moves to the right; `Complete` and `Error` are final.
//! An event refers to its queue through a weak handle and to its batch only
//! by serial.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use ember_core::{Error, EventId, LaneIndex, Result, Serial};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// STATUS
// =============================================================================

/// Execution status of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    /// Recorded into an open batch
    Queued,
    /// Batch handed to the device
    Submitted,
    /// Device accepted the batch
    Running,
    /// Finished successfully
    Complete,
    /// Finished unsuccessfully or abandoned
    Error,
}

impl EventStatus {
    const fn rank(self) -> u8 {
        match self {
            EventStatus::Queued => 0,
            EventStatus::Submitted => 1,
            EventStatus::Running => 2,
            EventStatus::Complete | EventStatus::Error => 3,
        }
    }

    /// Check if the status is final
    pub const fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Complete | EventStatus::Error)
    }
}

// =============================================================================
// QUEUE LINK
// =============================================================================

/// What an event needs from the queue that produced it
pub trait LaneSync: Send + Sync {
    /// Lane of the queue
    fn lane(&self) -> LaneIndex;

    /// Submit the open batch
    fn flush(&self) -> Result<()>;

    /// Submit the open batch and block until the lane is idle
    fn finish(&self) -> Result<()>;
}

enum Origin {
    User,
    Queue {
        lane: LaneIndex,
        serial: Serial,
        queue: Weak<dyn LaneSync>,
    },
}

// =============================================================================
// EVENT
// =============================================================================

type Callback = Box<dyn FnOnce(EventStatus) + Send>;

struct EventState {
    status: EventStatus,
    callbacks: Vec<(EventStatus, Callback)>,
}

struct EventInner {
    id: EventId,
    origin: Origin,
    state: Mutex<EventState>,
    changed: Condvar,
}

/// Completion handle shared between the client and the queue
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    fn with_origin(origin: Origin, status: EventStatus) -> Self {
        Self {
            inner: Arc::new(EventInner {
                id: EventId::new(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed)),
                origin,
                state: Mutex::new(EventState {
                    status,
                    callbacks: Vec::new(),
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Create a client-settable event
    pub fn user() -> Self {
        Self::with_origin(Origin::User, EventStatus::Submitted)
    }

    /// Create a queued event bound to `serial`
    pub(crate) fn queued(serial: Serial, queue: Weak<dyn LaneSync>) -> Self {
        Self::with_origin(
            Origin::Queue {
                lane: serial.lane(),
                serial,
                queue,
            },
            EventStatus::Queued,
        )
    }

    /// Unique identity
    pub fn id(&self) -> EventId {
        self.inner.id
    }

    /// Serial of the batch the event completes with
    pub fn serial(&self) -> Option<Serial> {
        match self.inner.origin {
            Origin::Queue { serial, .. } => Some(serial),
            Origin::User => None,
        }
    }

    /// Lane of the producing queue
    pub fn lane(&self) -> Option<LaneIndex> {
        match self.inner.origin {
            Origin::Queue { lane, .. } => Some(lane),
            Origin::User => None,
        }
    }

    /// Check if this is a client-settable event
    pub fn is_user(&self) -> bool {
        matches!(self.inner.origin, Origin::User)
    }

    /// Current status
    pub fn status(&self) -> EventStatus {
        self.inner.state.lock().status
    }

    /// Check if two handles refer to the same event
    pub fn ptr_eq(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn queue(&self) -> Option<Arc<dyn LaneSync>> {
        match &self.inner.origin {
            Origin::Queue { queue, .. } => queue.upgrade(),
            Origin::User => None,
        }
    }

    /// Move forward to `status`; returns whether anything changed
    ///
    /// Callbacks that became due run on the calling thread after the
    /// event's lock is released.
    pub(crate) fn advance(&self, status: EventStatus) -> bool {
        let due = {
            let mut state = self.inner.state.lock();
            if state.status.is_terminal() || status.rank() <= state.status.rank() {
                return false;
            }
            state.status = status;

            let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.callbacks)
                .into_iter()
                .partition(|(target, _)| target.rank() <= status.rank());
            state.callbacks = waiting;
            due
        };
        self.inner.changed.notify_all();

        for (_, callback) in due {
            callback(status);
        }
        true
    }

    /// Complete or fail a user event
    ///
    /// Allowed once, and only on user events.
    pub fn set_status(&self, status: EventStatus) -> Result<()> {
        if !self.is_user() || !status.is_terminal() {
            return Err(Error::InvalidState);
        }
        if self.advance(status) {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    /// Run `callback` once the event reaches `target` or any later status
    ///
    /// Runs immediately on the calling thread if that already happened.
    /// An event that fails passes `Error` to every pending callback.
    pub fn on_status<F>(&self, target: EventStatus, callback: F) -> Result<()>
    where
        F: FnOnce(EventStatus) + Send + 'static,
    {
        if target == EventStatus::Queued || target == EventStatus::Error {
            return Err(Error::InvalidParameter);
        }

        let mut state = self.inner.state.lock();
        if state.status.rank() >= target.rank() {
            let status = state.status;
            drop(state);
            callback(status);
        } else {
            state.callbacks.push((target, Box::new(callback)));
        }
        Ok(())
    }

    /// Block until the event is final
    ///
    /// Does not flush the producing queue; see [`wait_for_events`].
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            self.inner.changed.wait(&mut state);
        }
        terminal_result(state.status)
    }

    /// [`wait`](Self::wait) with an upper bound
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            if self
                .inner
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
                && !state.status.is_terminal()
            {
                return Err(Error::Timeout);
            }
        }
        terminal_result(state.status)
    }
}

fn terminal_result(status: EventStatus) -> Result<()> {
    if status == EventStatus::Error {
        Err(Error::WaitListEventFailed)
    } else {
        Ok(())
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("serial", &self.serial())
            .field("status", &self.status())
            .finish()
    }
}

/// Flush the queues the events belong to, then block until all are final
///
/// Fails with `WaitListEventFailed` if any of them ended in `Error`.
pub fn wait_for_events(events: &[Event]) -> Result<()> {
    if events.is_empty() {
        return Err(Error::InvalidParameter);
    }

    let mut flushed: Vec<LaneIndex> = Vec::new();
    for event in events {
        if event.status() != EventStatus::Queued {
            continue;
        }
        let Some(queue) = event.queue() else {
            continue;
        };
        if !flushed.contains(&queue.lane()) {
            flushed.push(queue.lane());
            queue.flush()?;
        }
    }

    let mut result = Ok(());
    for event in events {
        if let Err(err) = event.wait() {
            result = Err(err);
        }
    }
    result
}
