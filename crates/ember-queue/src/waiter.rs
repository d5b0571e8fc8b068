//! # Completion Waiter
//!
//! Background worker that waits on submitted serials in submission order
//! and hands each completed one back to the queue for bookkeeping.
//!
//! ```text
//!  producer (flush)            worker thread
//!  ────────────────            ─────────────
//!  notify(serial) ──▶ [ FIFO ] ──▶ pop ──▶ wait_for_serial ──▶ finish_serial
//!        ▲  full: retry         │                 │ error
//!        └── has_slot ◀─────────┘                 └──────────▶ fail_serial
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use heapless::Deque;
use parking_lot::{Condvar, Mutex, MutexGuard};

use ember_core::{Error, Result, Serial};

use crate::config::QueueConfig;

/// Serials the worker can have outstanding
pub const COMPLETION_QUEUE_CAPACITY: usize = 4;

static_assertions::const_assert!(COMPLETION_QUEUE_CAPACITY > 0);

/// Receiver of the worker's per-serial results
pub trait SerialSink: Send + Sync {
    /// Block until `serial` is reached on the device
    fn wait_for_serial(&self, serial: Serial, timeout: Duration) -> Result<()>;

    /// `serial` has been reached
    fn finish_serial(&self, serial: Serial) -> Result<()>;

    /// Waiting on `serial` failed
    fn fail_serial(&self, serial: Serial, error: Error);
}

struct Shared {
    fifo: Mutex<Deque<Serial, COMPLETION_QUEUE_CAPACITY>>,
    has_work: Condvar,
    has_slot: Condvar,
    terminating: AtomicBool,
}

/// Bounded FIFO of submitted serials plus the thread draining it
pub struct CompletionWaiter {
    shared: Arc<Shared>,
    retry_interval: Duration,
    max_retries: u32,
    budget: Duration,
    wait_timeout: Duration,
    worker: Mutex<Option<(ThreadId, JoinHandle<()>)>>,
}

impl CompletionWaiter {
    /// Create an idle waiter
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                fifo: Mutex::new(Deque::new()),
                has_work: Condvar::new(),
                has_slot: Condvar::new(),
                terminating: AtomicBool::new(false),
            }),
            retry_interval: config.notify_retry_interval,
            max_retries: config.notify_max_retries,
            budget: config.notify_budget(),
            wait_timeout: config.device_wait_timeout,
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker thread
    pub fn start(&self, sink: Arc<dyn SerialSink>, name: &str) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.is_terminating() {
            return Err(Error::InvalidState);
        }

        let shared = self.shared.clone();
        let timeout = self.wait_timeout;
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || run(&shared, sink.as_ref(), timeout))
            .map_err(|err| {
                log::error!("failed to spawn completion worker: {}", err);
                Error::OutOfResources
            })?;

        *worker = Some((handle.thread().id(), handle));
        Ok(())
    }

    /// Hand `serial` to the worker
    ///
    /// Blocks while the FIFO is full, giving up with `DeviceUnresponsive`
    /// after the configured number of retries.
    pub fn notify(&self, serial: Serial) -> Result<()> {
        let mut fifo = self.shared.fifo.lock();

        if let Some(last) = fifo.back() {
            debug_assert!(serial.same_lane(*last) && serial.value() >= last.value());
            if *last == serial {
                return Ok(());
            }
        }

        let mut retries = 0;
        loop {
            if self.is_terminating() {
                return Err(Error::QueueTerminated);
            }
            if !fifo.is_full() {
                break;
            }
            if retries == self.max_retries {
                log::error!(
                    "completion worker unresponsive: {} still queued after {} retries ({:?})",
                    serial,
                    retries,
                    self.budget
                );
                return Err(Error::DeviceUnresponsive);
            }
            retries += 1;
            self.shared
                .has_slot
                .wait_for(&mut fifo, self.retry_interval);
        }

        if fifo.push_back(serial).is_err() {
            return Err(Error::DeviceUnresponsive);
        }
        self.shared.has_work.notify_one();
        Ok(())
    }

    /// Serials waiting for the worker
    pub fn pending(&self) -> usize {
        self.shared.fifo.lock().len()
    }

    /// Check if the worker was told to stop
    pub fn is_terminating(&self) -> bool {
        self.shared.terminating.load(Ordering::Acquire)
    }

    /// Stop the worker and join it
    ///
    /// Serials still in the FIFO are left for the owner to settle.
    pub fn terminate(&self) {
        {
            let _fifo = self.shared.fifo.lock();
            self.shared.terminating.store(true, Ordering::Release);
        }
        self.shared.has_work.notify_all();
        self.shared.has_slot.notify_all();

        let Some((id, handle)) = self.worker.lock().take() else {
            return;
        };
        if id == thread::current().id() {
            // dropped from inside a worker callback; the loop exits on its own
            return;
        }
        if handle.join().is_err() {
            log::error!("completion worker panicked");
        }
    }

    /// Serials left in the FIFO, oldest first
    pub fn drain(&self) -> Vec<Serial> {
        let mut fifo = self.shared.fifo.lock();
        let mut serials = Vec::with_capacity(fifo.len());
        while let Some(serial) = fifo.pop_front() {
            serials.push(serial);
        }
        self.shared.has_slot.notify_all();
        serials
    }
}

impl Drop for CompletionWaiter {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run(shared: &Shared, sink: &dyn SerialSink, timeout: Duration) {
    let mut fifo = shared.fifo.lock();
    loop {
        if shared.terminating.load(Ordering::Acquire) {
            break;
        }
        let Some(serial) = fifo.pop_front() else {
            shared.has_work.wait(&mut fifo);
            continue;
        };
        shared.has_slot.notify_all();

        MutexGuard::unlocked(&mut fifo, || complete(shared, sink, serial, timeout));
    }
    log::debug!("completion worker exiting, {} serials left", fifo.len());
}

fn complete(shared: &Shared, sink: &dyn SerialSink, serial: Serial, timeout: Duration) {
    loop {
        match sink.wait_for_serial(serial, timeout) {
            Ok(()) => {
                if let Err(err) = sink.finish_serial(serial) {
                    log::warn!("finishing {} failed: {}", serial, err);
                }
                return;
            }
            Err(Error::Timeout) if !shared.terminating.load(Ordering::Acquire) => {
                log::debug!("still waiting for {}", serial);
            }
            Err(Error::Timeout) => {
                sink.fail_serial(serial, Error::QueueTerminated);
                return;
            }
            Err(err) => {
                log::error!("waiting for {} failed: {}", serial, err);
                sink.fail_serial(serial, err);
                return;
            }
        }
    }
}
