//! # Command Batch
//!
//! The open recording target of a queue and its lifecycle.
//!
//! ```text
//! Open ──flush──▶ Flushed ──mark_submitted──▶ Submitted ──mark_finished──▶ Finished
//!   │                │
//!   └────────────────┴──mark_errored──▶ Errored
//! ```

use alloc::vec::Vec;

use ember_core::{BatchRecord, Error, MemoryBarrier, Result, Serial};

/// Batch lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Accepting records
    Open,
    /// Records handed out for submission
    Flushed,
    /// Accepted by the device
    Submitted,
    /// Device reached the serial
    Finished,
    /// Discarded; nothing it recorded will run
    Errored,
}

/// Ordered records sharing one serial
#[derive(Debug)]
pub struct CommandBatch {
    serial: Serial,
    state: BatchState,
    records: Vec<BatchRecord>,
}

impl CommandBatch {
    /// Create an open batch for `serial`
    pub fn new(serial: Serial) -> Self {
        Self {
            serial,
            state: BatchState::Open,
            records: Vec::new(),
        }
    }

    /// Serial every record of the batch completes under
    #[inline]
    pub fn serial(&self) -> Serial {
        self.serial
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Check if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record count
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Records in recording order
    pub fn records(&self) -> &[BatchRecord] {
        &self.records
    }

    /// Append a record
    pub fn append(&mut self, record: BatchRecord) -> Result<()> {
        self.ensure_open()?;
        self.records.push(record);
        Ok(())
    }

    /// Append a barrier unless the previous record already is one
    pub fn append_barrier(&mut self, barrier: MemoryBarrier) -> Result<()> {
        self.ensure_open()?;
        if let Some(BatchRecord::Barrier(last)) = self.records.last_mut() {
            last.src_stage |= barrier.src_stage;
            last.dst_stage |= barrier.dst_stage;
            return Ok(());
        }
        self.records.push(BatchRecord::Barrier(barrier));
        Ok(())
    }

    /// Close the batch and take its records for submission
    pub fn flush(&mut self) -> Result<Vec<BatchRecord>> {
        self.ensure_open()?;
        self.state = BatchState::Flushed;
        log::debug!("batch {} flushed ({} records)", self.serial, self.records.len());
        Ok(core::mem::take(&mut self.records))
    }

    /// Device accepted the flushed records
    pub fn mark_submitted(&mut self) -> Result<()> {
        self.transition(BatchState::Flushed, BatchState::Submitted)
    }

    /// Device reached the serial
    pub fn mark_finished(&mut self) -> Result<()> {
        self.transition(BatchState::Submitted, BatchState::Finished)
    }

    /// Discard the batch; allowed until the device accepted it
    pub fn mark_errored(&mut self) -> Result<()> {
        match self.state {
            BatchState::Open | BatchState::Flushed => {
                log::debug!("batch {} discarded ({:?})", self.serial, self.state);
                self.records.clear();
                self.state = BatchState::Errored;
                Ok(())
            }
            _ => Err(Error::InvalidState),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == BatchState::Open {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    fn transition(&mut self, from: BatchState, to: BatchState) -> Result<()> {
        if self.state != from {
            return Err(Error::InvalidState);
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{LaneIndex, PipelineStage, ResourceId};

    fn copy(src: u64, dst: u64) -> BatchRecord {
        BatchRecord::Copy {
            src: ResourceId::new(src),
            dst: ResourceId::new(dst),
            region: ember_core::CopyRegion::Linear {
                src_offset: 0,
                dst_offset: 0,
                size: 4,
            },
        }
    }

    #[test]
    fn test_lifecycle() {
        let serial = Serial::new(LaneIndex::new(0), 1);
        let mut batch = CommandBatch::new(serial);
        batch.append(copy(1, 2)).unwrap();
        assert_eq!(batch.len(), 1);

        let records = batch.flush().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(batch.state(), BatchState::Flushed);
        assert_eq!(batch.append(copy(1, 2)), Err(Error::InvalidState));

        batch.mark_submitted().unwrap();
        assert_eq!(batch.mark_errored(), Err(Error::InvalidState));
        batch.mark_finished().unwrap();
        assert_eq!(batch.state(), BatchState::Finished);
        assert_eq!(batch.serial(), serial);
    }

    #[test]
    fn test_errored_drops_records() {
        let mut batch = CommandBatch::new(Serial::new(LaneIndex::new(0), 3));
        batch.append(copy(1, 2)).unwrap();
        batch.append(copy(2, 3)).unwrap();
        batch.mark_errored().unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.flush(), Err(Error::InvalidState));
    }

    #[test]
    fn test_adjacent_barriers_merge() {
        let mut batch = CommandBatch::new(Serial::new(LaneIndex::new(0), 1));
        batch.append_barrier(MemoryBarrier::execution()).unwrap();
        batch.append_barrier(MemoryBarrier::device_to_host()).unwrap();
        assert_eq!(batch.len(), 1);

        let BatchRecord::Barrier(merged) = batch.records()[0] else {
            panic!("expected a barrier");
        };
        assert!(merged.dst_stage.contains(PipelineStage::HOST | PipelineStage::COMPUTE_SHADER));

        batch.append(copy(1, 2)).unwrap();
        batch.append_barrier(MemoryBarrier::execution()).unwrap();
        assert_eq!(batch.records().iter().filter(|r| r.is_barrier()).count(), 2);
    }
}
