//! In-memory device for tests
//!
//! Executes copy records against host-side buffer storage at submit time and
//! signals completion immediately unless held.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use ember_core::{
    AccessFlags, BatchRecord, CopyRegion, Device, Error, LaneAllocator, LaneIndex, Resource,
    ResourceId, Result, Serial, StagingBuffer,
};

type Storage = Arc<Mutex<Vec<u8>>>;

/// Buffer backed by host memory
pub(crate) struct MockBuffer {
    id: ResourceId,
    parent: Option<ResourceId>,
    access: AccessFlags,
    data: Storage,
    poisoned: bool,
}

impl MockBuffer {
    pub(crate) fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.poisoned {
            Err(Error::HostTransferFailed)
        } else {
            Ok(())
        }
    }
}

impl Resource for MockBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn parent(&self) -> Option<ResourceId> {
        self.parent
    }

    fn access(&self) -> AccessFlags {
        self.access
    }

    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }
}

impl StagingBuffer for MockBuffer {
    fn read(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        self.check()?;
        let data = self.data.lock();
        let start = offset as usize;
        let src = data
            .get(start..start + dst.len())
            .ok_or(Error::BufferOverflow)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn write(&self, offset: u64, src: &[u8]) -> Result<()> {
        self.check()?;
        let mut data = self.data.lock();
        let start = offset as usize;
        let dst = data
            .get_mut(start..start + src.len())
            .ok_or(Error::BufferOverflow)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

#[derive(Default)]
struct DeviceState {
    memory: HashMap<ResourceId, Storage>,
    submissions: Vec<(Serial, Vec<BatchRecord>)>,
    reached: HashMap<LaneIndex, u64>,
    held: bool,
    fail_submits: usize,
    wait_error: Option<Error>,
    poison_next_staging: bool,
    waits: usize,
    next_id: u64,
}

impl DeviceState {
    fn storage(&self, id: ResourceId) -> Result<Storage> {
        self.memory.get(&id).cloned().ok_or(Error::InvalidParameter)
    }

    fn execute(&self, record: &BatchRecord) -> Result<()> {
        let BatchRecord::Copy { src, dst, region } = record else {
            return Ok(());
        };
        let (src, dst) = (self.storage(*src)?, self.storage(*dst)?);

        match *region {
            CopyRegion::Linear {
                src_offset,
                dst_offset,
                size,
            } => {
                let (from, to, len) = (src_offset as usize, dst_offset as usize, size as usize);
                let bytes = src.lock()[from..from + len].to_vec();
                dst.lock()[to..to + len].copy_from_slice(&bytes);
            }
            CopyRegion::Rect { src: from, dst: to } => {
                let row = from.row_size();
                for (s, d) in from.rows().zip(to.rows()) {
                    let bytes = src.lock()[s..s + row].to_vec();
                    dst.lock()[d..d + row].copy_from_slice(&bytes);
                }
            }
        }
        Ok(())
    }
}

/// Device double with controllable completion and failures
#[derive(Default)]
pub(crate) struct MockDevice {
    lanes: LaneAllocator,
    state: Mutex<DeviceState>,
    progress: Condvar,
}

impl MockDevice {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn create(&self, size: usize, access: AccessFlags, parent: Option<ResourceId>) -> MockBuffer {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = ResourceId::new(state.next_id);
        let data: Storage = Arc::new(Mutex::new(vec![0; size]));
        state.memory.insert(id, data.clone());
        MockBuffer {
            id,
            parent,
            access,
            data,
            poisoned: false,
        }
    }

    /// Device buffer of `size` zeroed bytes
    pub(crate) fn buffer(&self, size: usize, access: AccessFlags) -> Arc<MockBuffer> {
        Arc::new(self.create(size, access, None))
    }

    /// Buffer reported as a sub-range of `parent`
    pub(crate) fn sub_buffer(&self, parent: &MockBuffer, size: usize) -> Arc<MockBuffer> {
        Arc::new(self.create(size, parent.access, Some(parent.id)))
    }

    /// Stop signalling completion
    pub(crate) fn hold(&self) {
        self.state.lock().held = true;
    }

    /// Complete everything submitted so far and resume signalling
    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        state.held = false;
        let latest: Vec<(LaneIndex, u64)> = state
            .submissions
            .iter()
            .map(|(serial, _)| (serial.lane(), serial.value()))
            .collect();
        for (lane, value) in latest {
            let reached = state.reached.entry(lane).or_insert(0);
            *reached = (*reached).max(value);
        }
        self.progress.notify_all();
    }

    /// Reject the next `count` submissions
    pub(crate) fn fail_next_submits(&self, count: usize) {
        self.state.lock().fail_submits = count;
    }

    /// Make every wait fail with `error`
    pub(crate) fn fail_waits(&self, error: Error) {
        self.state.lock().wait_error = Some(error);
        self.progress.notify_all();
    }

    /// Next staging buffer fails every host access
    pub(crate) fn poison_next_staging(&self) {
        self.state.lock().poison_next_staging = true;
    }

    /// Accepted submissions in order
    pub(crate) fn submissions(&self) -> Vec<(Serial, Vec<BatchRecord>)> {
        self.state.lock().submissions.clone()
    }

    /// Records of the last accepted submission of `serial`
    pub(crate) fn records(&self, serial: Serial) -> Vec<BatchRecord> {
        self.state
            .lock()
            .submissions
            .iter()
            .rev()
            .find(|(s, _)| *s == serial)
            .map(|(_, records)| records.clone())
            .unwrap_or_default()
    }

    /// `wait_for_serial` calls so far
    pub(crate) fn waits(&self) -> usize {
        self.state.lock().waits
    }
}

impl Device for MockDevice {
    fn lane_allocator(&self) -> &LaneAllocator {
        &self.lanes
    }

    fn submit(&self, serial: Serial, records: Vec<BatchRecord>) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_submits > 0 {
            state.fail_submits -= 1;
            return Err(Error::SubmissionFailed);
        }

        for record in &records {
            state.execute(record)?;
        }
        state.submissions.push((serial, records));

        if !state.held {
            let reached = state.reached.entry(serial.lane()).or_insert(0);
            *reached = (*reached).max(serial.value());
            self.progress.notify_all();
        }
        Ok(())
    }

    fn wait_for_serial(&self, serial: Serial, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        state.waits += 1;
        loop {
            if let Some(err) = state.wait_error {
                return Err(err);
            }
            if state.reached.get(&serial.lane()).copied().unwrap_or(0) >= serial.value() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            self.progress.wait_until(&mut state, deadline);
        }
    }

    fn is_serial_reached(&self, serial: Serial) -> bool {
        self.state.lock().reached.get(&serial.lane()).copied().unwrap_or(0) >= serial.value()
    }

    fn allocate_staging(&self, size: u64) -> Result<Arc<dyn StagingBuffer>> {
        let mut buffer = self.create(size as usize, AccessFlags::READ_WRITE, None);
        let mut state = self.state.lock();
        buffer.poisoned = std::mem::take(&mut state.poison_next_staging);
        Ok(Arc::new(buffer))
    }
}
