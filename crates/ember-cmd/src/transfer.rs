//! # Host Transfer Queue
//!
//! Host-side halves of transfers whose device copy has been recorded, keyed
//! by the serial that must complete before they may run.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use ember_core::{
    Error, EventId, HostMemory, LaneIndex, Result, Serial, StagingBuffer,
};

use crate::op::{HostTransfer, TransferKind, TransferRegion};

// =============================================================================
// ENTRY
// =============================================================================

/// Deferred host work of one transfer
pub struct HostTransferEntry {
    kind: TransferKind,
    region: TransferRegion,
    host: HostMemory,
    staging: Arc<dyn StagingBuffer>,
    event: Option<EventId>,
}

impl HostTransferEntry {
    /// Entry for `transfer` staged through `staging`
    pub fn new(
        transfer: &HostTransfer,
        staging: Arc<dyn StagingBuffer>,
        event: Option<EventId>,
    ) -> Self {
        Self {
            kind: transfer.kind,
            region: transfer.region,
            host: transfer.host.clone(),
            staging,
            event,
        }
    }

    /// Transfer kind
    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// Event tracking the transfer
    pub fn event(&self) -> Option<EventId> {
        self.event
    }

    /// Copy staged device data out to host memory
    ///
    /// Writes and fills were fully handled when recorded.
    pub fn resolve(&self) -> Result<()> {
        if !self.kind.is_read() {
            return Ok(());
        }

        match self.region {
            TransferRegion::Linear { size, .. } => {
                let mut bytes = vec![0u8; size as usize];
                self.staging.read(0, &mut bytes)?;
                self.host.write(0, &bytes)
            }
            TransferRegion::Rect { host, .. } => {
                let mut row = vec![0u8; host.row_size()];
                for offset in host.rows() {
                    self.staging.read(offset as u64, &mut row)?;
                    self.host.write(offset, &row)?;
                }
                Ok(())
            }
        }
    }
}

impl core::fmt::Debug for HostTransferEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostTransferEntry")
            .field("kind", &self.kind)
            .field("region", &self.region)
            .field("event", &self.event)
            .finish()
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Outcome of resolving one or more serials
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Entries resolved successfully
    pub resolved: usize,
    /// Entries that failed, with the event tracking them
    pub failed: Vec<(Option<EventId>, Error)>,
}

impl ResolveReport {
    /// Check if every entry resolved
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Deferred host transfers of one lane
#[derive(Debug)]
pub struct HostTransferQueue {
    lane: LaneIndex,
    pending: BTreeMap<u64, Vec<HostTransferEntry>>,
}

impl HostTransferQueue {
    /// Create an empty queue for `lane`
    pub fn new(lane: LaneIndex) -> Self {
        Self {
            lane,
            pending: BTreeMap::new(),
        }
    }

    /// Defer `entry` until `serial` completes
    pub fn enqueue(&mut self, serial: Serial, entry: HostTransferEntry) -> Result<()> {
        if serial.lane() != self.lane {
            return Err(Error::LaneMismatch);
        }
        self.pending.entry(serial.value()).or_default().push(entry);
        Ok(())
    }

    /// Resolve every entry deferred on serials up to and including `serial`
    ///
    /// Lower serials go first and entries of one serial run in enqueue order.
    /// A failing entry does not stop the others.
    pub fn resolve_all(&mut self, serial: Serial) -> ResolveReport {
        let mut report = ResolveReport::default();
        if serial.lane() != self.lane {
            return report;
        }

        let remaining = self.pending.split_off(&(serial.value().saturating_add(1)));
        let ready = core::mem::replace(&mut self.pending, remaining);

        for (value, entries) in ready {
            for entry in entries {
                match entry.resolve() {
                    Ok(()) => report.resolved += 1,
                    Err(err) => {
                        log::warn!(
                            "{}: {} transfer failed at serial {}: {}",
                            self.lane,
                            entry.kind.name(),
                            value,
                            err
                        );
                        report.failed.push((entry.event, err));
                    }
                }
            }
        }
        report
    }

    /// Drop the entries of `serial` without running them
    ///
    /// Returns the events of the dropped entries.
    pub fn discard(&mut self, serial: Serial) -> Vec<EventId> {
        if serial.lane() != self.lane {
            return Vec::new();
        }
        self.pending
            .remove(&serial.value())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| e.event)
            .collect()
    }

    /// Drop everything; returns the events of the dropped entries
    pub fn clear(&mut self) -> Vec<EventId> {
        core::mem::take(&mut self.pending)
            .into_values()
            .flatten()
            .filter_map(|e| e.event)
            .collect()
    }

    /// Pending entry count
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
