//! # Scheduler
//!
//! One command queue bound to one device lane.
//!
//! ```text
//! submit ──▶ wait list ──▶ tracker ──▶ open batch ──flush──▶ Device::submit
//!               │                         │                     │
//!               │ other lanes / user      │ host transfers      │ notify
//!               ▼                         ▼                     ▼
//!          external waits          HostTransferQueue     CompletionWaiter
//!          (resolved at flush)                                  │
//!                                                    finish_serial ◀─┘
//! ```
//!
//! All queue state sits behind one lock. Event status changes decided under
//! that lock are applied after it is released, so event callbacks may call
//! back into the queue.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, ReentrantMutex};

use ember_cmd::{
    Access, CommandBatch, DependencyTracker, HostTransfer, HostTransferEntry, HostTransferQueue,
    Operation, SerialAllocator,
};
use ember_core::{Device, Error, EventId, LaneIndex, MemoryBarrier, Result, Serial};

use crate::config::QueueConfig;
use crate::event::{Event, EventStatus, LaneSync};
use crate::registry::EventRegistry;
use crate::waiter::{CompletionWaiter, SerialSink};

// =============================================================================
// QUEUE STATE
// =============================================================================

struct QueueState {
    serials: SerialAllocator,
    batch: CommandBatch,
    in_flight: VecDeque<CommandBatch>,
    tracker: DependencyTracker,
    transfers: HostTransferQueue,
    registry: EventRegistry,
    external_waits: Vec<Event>,
    /// Status changes to apply once the lock is released
    settle: Vec<(Event, EventStatus)>,
    last_submitted: Serial,
    last_finished: Serial,
    lost: bool,
}

impl QueueState {
    fn new(lane: LaneIndex) -> Self {
        let mut serials = SerialAllocator::new();
        let first = serials.allocate(lane);
        Self {
            serials,
            batch: CommandBatch::new(first),
            in_flight: VecDeque::new(),
            tracker: DependencyTracker::new(),
            transfers: HostTransferQueue::new(lane),
            registry: EventRegistry::new(lane),
            external_waits: Vec::new(),
            settle: Vec::new(),
            last_submitted: Serial::zero(lane),
            last_finished: Serial::zero(lane),
            lost: false,
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.lost {
            Err(Error::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn barrier(&mut self) -> Result<()> {
        self.batch.append_barrier(MemoryBarrier::execution())?;
        self.tracker.clear();
        Ok(())
    }

    fn track(&mut self, accesses: &[Access]) -> Result<()> {
        if self.tracker.record_accesses(accesses) {
            self.batch.append_barrier(MemoryBarrier::execution())?;
        }
        Ok(())
    }

    fn settle_all(&mut self, events: Vec<Event>, status: EventStatus) {
        self.settle.extend(events.into_iter().map(|event| (event, status)));
    }

    fn open_next_batch(&mut self) -> CommandBatch {
        let lane = self.batch.serial().lane();
        let next = CommandBatch::new(self.serials.allocate(lane));
        std::mem::replace(&mut self.batch, next)
    }
}

// =============================================================================
// QUEUE CORE
// =============================================================================

pub(crate) struct QueueCore<D: Device> {
    device: Arc<D>,
    lane: LaneIndex,
    config: QueueConfig,
    waiter: CompletionWaiter,
    this: Weak<QueueCore<D>>,
    /// Serializes flushes, including the unlocked external-wait phase.
    /// Reentrant: event callbacks run while it is held and may flush.
    flush_lock: ReentrantMutex<()>,
    state: Mutex<QueueState>,
}

impl<D: Device> QueueCore<D> {
    /// Unlock and apply the status changes decided under the lock
    fn release(&self, mut state: MutexGuard<'_, QueueState>) {
        let settle = std::mem::take(&mut state.settle);
        drop(state);
        for (event, status) in settle {
            event.advance(status);
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MutexGuard<'_, QueueState>) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let result = f(&mut state);
        self.release(state);
        result
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    fn record(&self, op: Operation, waits: &[Event]) -> Result<(Event, bool)> {
        match &op {
            Operation::Copy(copy) => copy.validate()?,
            Operation::HostTransfer(transfer) => transfer.validate()?,
            Operation::Dispatch(_) | Operation::Barrier | Operation::Marker => {}
        }

        self.with_state(|state| {
            state.ensure_usable()?;
            self.process_wait_list(state, waits)?;

            let serial = state.batch.serial();
            let event = Event::queued(serial, self.this.clone());
            log::trace!("{}: recording {:?} into {}", self.lane, op, serial);

            let blocking = match op {
                Operation::Copy(copy) => {
                    state.track(&[
                        Access::of(copy.src.as_ref(), false),
                        Access::of(copy.dst.as_ref(), true),
                    ])?;
                    state.batch.append(copy.record())?;
                    state.registry.retain(serial, copy.src)?;
                    state.registry.retain(serial, copy.dst)?;
                    false
                }
                Operation::Dispatch(dispatch) => {
                    let accesses: Vec<Access> = dispatch
                        .args
                        .iter()
                        .map(|arg| Access::of(arg.as_ref(), arg.is_writable()))
                        .collect();
                    state.track(&accesses)?;
                    state.batch.append(dispatch.record())?;
                    for arg in dispatch.args {
                        state.registry.retain(serial, arg)?;
                    }
                    false
                }
                Operation::Barrier => {
                    if waits.is_empty() {
                        state.barrier()?;
                    }
                    false
                }
                Operation::Marker => false,
                Operation::HostTransfer(transfer) => {
                    self.record_transfer(state, serial, event.id(), transfer)?
                }
            };

            state.registry.register(serial, event.clone())?;
            Ok((event, blocking))
        })
    }

    fn record_transfer(
        &self,
        state: &mut QueueState,
        serial: Serial,
        event: EventId,
        transfer: HostTransfer,
    ) -> Result<bool> {
        let staging = self.device.allocate_staging(transfer.staging_size())?;
        transfer.stage(staging.as_ref())?;

        let is_read = transfer.kind.is_read();
        if is_read && !state.batch.is_empty() && transfer.target.is_writable() {
            state.barrier()?;
        }
        state.track(&[Access::of(transfer.target.as_ref(), !is_read)])?;

        state.batch.append(transfer.copy_record(staging.as_ref()))?;
        state.batch.append_barrier(transfer.completion_barrier())?;
        state.tracker.clear();

        state
            .transfers
            .enqueue(serial, HostTransferEntry::new(&transfer, staging, Some(event)))?;
        state.registry.retain(serial, transfer.target)?;
        Ok(transfer.blocking)
    }

    fn process_wait_list(&self, state: &mut QueueState, waits: &[Event]) -> Result<()> {
        let mut same_lane = false;
        for event in waits {
            if event.status() == EventStatus::Complete {
                continue;
            }
            if event.lane() == Some(self.lane) {
                same_lane = true;
            } else {
                state.external_waits.push(event.clone());
            }
        }

        // one barrier orders every earlier command of this lane
        if same_lane {
            state.barrier()?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------------

    /// Submit the open batch without telling the worker
    fn flush_unnotified(&self) -> Result<Serial> {
        self.with_state(|state| {
            loop {
                state.ensure_usable()?;
                if state.external_waits.is_empty() {
                    break;
                }

                let waits = std::mem::take(&mut state.external_waits);
                if let Err(err) = MutexGuard::unlocked(state, || self.resolve_external(&waits)) {
                    log::warn!("{}: wait list failed, aborting {}", self.lane, state.batch.serial());
                    self.abort_batch(state)?;
                    return Err(err);
                }
            }
            self.submit_batch(state)
        })
    }

    fn resolve_external(&self, waits: &[Event]) -> Result<()> {
        for event in waits {
            if let Some(queue) = event.queue() {
                if queue.lane() != self.lane {
                    if let Err(err) = queue.finish() {
                        log::warn!("{}: finishing {} failed: {}", self.lane, queue.lane(), err);
                    }
                }
            }
            event.wait()?;
        }
        Ok(())
    }

    fn submit_batch(&self, state: &mut QueueState) -> Result<Serial> {
        let serial = state.batch.serial();
        let events = state.registry.events(serial).to_vec();
        state.settle_all(events.clone(), EventStatus::Submitted);

        let records = state.batch.flush()?;
        let count = records.len();
        match self.device.submit(serial, records) {
            Ok(()) => {
                state.batch.mark_submitted()?;
                state.settle_all(events, EventStatus::Running);
                state.last_submitted = serial;
                let submitted = state.open_next_batch();
                state.in_flight.push_back(submitted);
                log::debug!("{}: submitted {} ({} records)", self.lane, serial, count);
                Ok(serial)
            }
            Err(err) => {
                log::warn!("{}: submission of {} failed: {}", self.lane, serial, err);
                self.abort_batch(state)?;
                Err(err)
            }
        }
    }

    /// Discard the open batch and keep the serial timeline moving
    ///
    /// The device receives an empty submission under the discarded serial so
    /// anything waiting for it still sees it reached; the next batch takes
    /// the following serial.
    fn abort_batch(&self, state: &mut QueueState) -> Result<()> {
        let serial = state.batch.serial();
        if let Err(err) = state.batch.mark_errored() {
            log::debug!("{}: batch {} already left recording: {}", self.lane, serial, err);
        }

        let failed = state.registry.take(serial);
        log::warn!("{}: discarding {} with {} events", self.lane, serial, failed.len());
        state.settle_all(failed, EventStatus::Error);
        state.transfers.discard(serial);
        state.tracker.clear();
        state.external_waits.clear();

        if let Err(err) = self.device.submit(serial, Vec::new()) {
            log::error!("{}: empty resubmission of {} failed: {}", self.lane, serial, err);
            self.lose(state);
            return Err(Error::DeviceLost);
        }
        state.last_submitted = serial;
        state.open_next_batch();
        Ok(())
    }

    fn notify(&self, serial: Serial) -> Result<()> {
        if let Err(err) = self.waiter.notify(serial) {
            log::error!("{}: cannot hand {} to the completion worker: {}", self.lane, serial, err);
            let mut state = self.state.lock();
            self.lose(&mut state);
            self.release(state);
            return Err(err);
        }
        Ok(())
    }

    pub(crate) fn flush(&self) -> Result<()> {
        let _flushing = self.flush_lock.lock();
        let serial = self.flush_unnotified()?;
        self.notify(serial)
    }

    pub(crate) fn finish(&self) -> Result<()> {
        let serial = {
            let _flushing = self.flush_lock.lock();
            self.flush_unnotified()?
        };

        loop {
            match self.device.wait_for_serial(serial, self.config.device_wait_timeout) {
                Ok(()) => break,
                Err(Error::Timeout) => log::debug!("{}: finish still waiting for {}", self.lane, serial),
                Err(err) => {
                    self.fail(serial, err);
                    return Err(err);
                }
            }
        }
        self.with_state(|state| self.finish_serial_locked(state, serial))
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    fn finish_serial_locked(&self, state: &mut QueueState, serial: Serial) -> Result<()> {
        if serial.lane() != self.lane {
            return Err(Error::LaneMismatch);
        }
        if serial.value() <= state.last_finished.value() {
            return Ok(());
        }
        if serial.value() > state.last_submitted.value() {
            return Err(Error::InvalidState);
        }

        let report = state.transfers.resolve_all(serial);
        let failed: Vec<EventId> = report.failed.iter().filter_map(|(id, _)| *id).collect();

        let events = state.registry.take_up_to(serial);
        let count = events.len();
        for event in events {
            let status = if failed.contains(&event.id()) {
                EventStatus::Error
            } else {
                EventStatus::Complete
            };
            state.settle.push((event, status));
        }

        while state
            .in_flight
            .front()
            .map_or(false, |batch| batch.serial().value() <= serial.value())
        {
            if let Some(mut batch) = state.in_flight.pop_front() {
                if let Err(err) = batch.mark_finished() {
                    log::warn!("{}: batch {} not finishable: {}", self.lane, batch.serial(), err);
                }
            }
        }

        state.last_finished = serial;
        log::debug!(
            "{}: finished {} ({} events, {} transfers, {} failed)",
            self.lane,
            serial,
            count,
            report.resolved,
            report.failed.len()
        );
        Ok(())
    }

    fn fail(&self, serial: Serial, error: Error) {
        let mut state = self.state.lock();
        let events = state.registry.take(serial);
        log::warn!("{}: {} failed with {} events: {}", self.lane, serial, events.len(), error);
        state.settle_all(events, EventStatus::Error);
        state.transfers.discard(serial);
        if error.is_device_loss() {
            self.lose(&mut state);
        }
        self.release(state);
    }

    /// Fail every outstanding event and refuse further work
    fn lose(&self, state: &mut QueueState) {
        if state.lost {
            return;
        }
        state.lost = true;
        let events = state.registry.take_all();
        log::error!("{}: device lost, failing {} events", self.lane, events.len());
        state.settle_all(events, EventStatus::Error);
        state.transfers.clear();
        state.external_waits.clear();
        state.tracker.clear();
    }

    fn shutdown(&self) {
        if !self.state.lock().lost {
            if let Err(err) = self.finish() {
                log::warn!("{}: finish on shutdown failed: {}", self.lane, err);
            }
        }
        self.waiter.terminate();
        let unserved = self.waiter.drain();
        if !unserved.is_empty() {
            log::debug!("{}: worker stopped with {} serials queued", self.lane, unserved.len());
        }

        let mut state = self.state.lock();
        let retained = state.registry.retained_count();
        let events = state.registry.take_all();
        if !events.is_empty() {
            log::warn!(
                "{}: {} events abandoned on shutdown, releasing {} resources",
                self.lane,
                events.len(),
                retained
            );
        }
        state.settle_all(events, EventStatus::Error);
        state.transfers.clear();
        self.release(state);
    }
}

impl<D: Device> LaneSync for QueueCore<D> {
    fn lane(&self) -> LaneIndex {
        self.lane
    }

    fn flush(&self) -> Result<()> {
        QueueCore::flush(self)
    }

    fn finish(&self) -> Result<()> {
        QueueCore::finish(self)
    }
}

impl<D: Device> SerialSink for QueueCore<D> {
    fn wait_for_serial(&self, serial: Serial, timeout: Duration) -> Result<()> {
        self.device.wait_for_serial(serial, timeout)
    }

    fn finish_serial(&self, serial: Serial) -> Result<()> {
        self.with_state(|state| self.finish_serial_locked(state, serial))
    }

    fn fail_serial(&self, serial: Serial, error: Error) {
        self.fail(serial, error);
    }
}

impl<D: Device> Drop for QueueCore<D> {
    fn drop(&mut self) {
        self.device.lane_allocator().release(self.lane);
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// A command queue on one lane of `D`
pub struct Scheduler<D: Device> {
    core: Arc<QueueCore<D>>,
}

impl<D: Device> Scheduler<D> {
    /// Open a queue on a free lane of `device` and start its completion worker
    pub fn new(device: Arc<D>, config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let lane = device.lane_allocator().allocate()?;
        let name = config
            .worker_name
            .clone()
            .unwrap_or_else(|| format!("ember-{}", lane));

        let core = Arc::new_cyclic(|this| QueueCore {
            device,
            lane,
            waiter: CompletionWaiter::new(&config),
            config,
            this: this.clone(),
            flush_lock: ReentrantMutex::new(()),
            state: Mutex::new(QueueState::new(lane)),
        });
        core.waiter.start(core.clone(), &name)?;

        log::debug!("{}: queue created", lane);
        Ok(Self { core })
    }

    /// Record `op` after `wait_events`; returns its event
    ///
    /// Blocking transfers, and every operation under serialized execution,
    /// finish the queue before returning.
    pub fn submit(&self, op: Operation, wait_events: &[Event]) -> Result<Event> {
        let (event, blocking) = self.core.record(op, wait_events)?;
        if blocking || self.core.config.serialized_execution {
            self.core.finish()?;
        }
        Ok(event)
    }

    /// Event completing once all earlier work and `wait_events` have
    pub fn enqueue_marker(&self, wait_events: &[Event]) -> Result<Event> {
        self.submit(Operation::Marker, wait_events)
    }

    /// Like [`enqueue_marker`](Self::enqueue_marker), but later work is also
    /// ordered after it
    pub fn enqueue_barrier(&self, wait_events: &[Event]) -> Result<Event> {
        self.submit(Operation::Barrier, wait_events)
    }

    /// Make later work wait for `events` without blocking the caller
    pub fn wait_for_events(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Err(Error::InvalidParameter);
        }
        self.core.with_state(|state| {
            state.ensure_usable()?;
            self.core.process_wait_list(state, events)
        })
    }

    /// Submit the open batch
    pub fn flush(&self) -> Result<()> {
        self.core.flush()
    }

    /// Submit the open batch and block until everything submitted completed
    pub fn finish(&self) -> Result<()> {
        self.core.finish()
    }

    /// Settle a serial the device has reached
    pub fn finish_serial(&self, serial: Serial) -> Result<()> {
        if serial.lane() != self.core.lane {
            return Err(Error::LaneMismatch);
        }
        if !self.core.device.is_serial_reached(serial) {
            return Err(Error::InvalidState);
        }
        self.core
            .with_state(|state| self.core.finish_serial_locked(state, serial))
    }

    /// Current status of `event`
    pub fn get_status(&self, event: &Event) -> EventStatus {
        event.status()
    }

    /// Serial of the most recent accepted submission
    pub fn last_submitted_serial(&self) -> Serial {
        self.core.state.lock().last_submitted
    }

    /// Highest serial whose bookkeeping has run
    pub fn last_finished_serial(&self) -> Serial {
        self.core.state.lock().last_finished
    }

    /// Check if the open batch holds anything a flush would submit
    pub fn has_pending_submission(&self) -> bool {
        let state = self.core.state.lock();
        !state.batch.is_empty()
            || !state.external_waits.is_empty()
            || !state.registry.events(state.batch.serial()).is_empty()
    }

    /// Non-blocking device poll
    pub fn is_serial_reached(&self, serial: Serial) -> bool {
        serial.lane() == self.core.lane && self.core.device.is_serial_reached(serial)
    }

    /// Check if the lane was lost
    pub fn is_lost(&self) -> bool {
        self.core.state.lock().lost
    }

    /// Lane of this queue
    pub fn lane(&self) -> LaneIndex {
        self.core.lane
    }

    /// Configuration
    pub fn config(&self) -> &QueueConfig {
        &self.core.config
    }

    /// Device
    pub fn device(&self) -> &Arc<D> {
        &self.core.device
    }
}

impl<D: Device> Drop for Scheduler<D> {
    fn drop(&mut self) {
        self.core.shutdown();
    }
}

impl<D: Device> std::fmt::Debug for Scheduler<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("Scheduler")
            .field("lane", &self.core.lane)
            .field("open", &state.serials.last_allocated(self.core.lane))
            .field("retained", &state.registry.retained_count())
            .field("last_submitted", &state.last_submitted)
            .field("last_finished", &state.last_finished)
            .field("lost", &state.lost)
            .finish()
    }
}
