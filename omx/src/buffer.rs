// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Buffer records of a port and the lease handed to callers.

use std::{fmt, sync::Arc};

use tracing::debug;

use crate::{
    Error, ExternalRef, Result,
    bridge::BufferKey,
    component::{Parent, Shared},
    external::ExternalSlot,
};

/// Who currently owns a buffer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ownership {
    /// Queued in the port's pending FIFO.
    Pending,
    /// Leased out through a [`Buffer`].
    Caller,
    /// Handed to the codec core.
    Hardware,
    /// Only its external memory is still referenced, through an [`ExternalRef`].
    Detached,
}

pub(crate) struct BufferRecord {
    pub(crate) key: BufferKey,
    pub(crate) header: *mut omx_sys::BufferHeader,
    pub(crate) ownership: Ownership,
    /// Port settings version the buffer was produced for.
    pub(crate) settings_version: u64,
    pub(crate) external: Option<Arc<ExternalSlot>>,
    /// Keeps the pipeline parent alive while externally backed memory is at the hardware.
    pub(crate) parent_hold: Option<Arc<dyn Parent>>,
}

// Safety: the header is only dereferenced under the component lock or by the
// single owner of the record's lease.
unsafe impl Send for BufferRecord {}

impl BufferRecord {
    pub(crate) fn hand_off(&mut self, parent: &Arc<dyn Parent>) {
        self.ownership = Ownership::Hardware;
        if self.external.is_some() {
            self.parent_hold = Some(parent.clone());
        }
    }

    pub(crate) fn take_back(&mut self) {
        self.ownership = Ownership::Pending;
        self.parent_hold = None;
    }
}

/// The buffers of one port, allocated and freed as a unit.
#[derive(Default)]
pub(crate) struct BufferPool {
    records: Vec<BufferRecord>,
}

impl BufferPool {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, record: BufferRecord) {
        self.records.push(record);
    }

    pub(crate) fn get_mut(&mut self, key: BufferKey) -> Option<&mut BufferRecord> {
        self.records.iter_mut().find(|record| record.key == key)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn count(&self, ownership: Ownership) -> usize {
        self.records
            .iter()
            .filter(|record| record.ownership == ownership)
            .count()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut BufferRecord> {
        self.records.iter_mut()
    }

    pub(crate) fn into_records(self) -> Vec<BufferRecord> {
        self.records
    }
}

/// A buffer leased from a port.
///
/// The lease gives exclusive access to the buffer header and its memory until
/// it is handed back with [`crate::Port::release_buffer`]. Dropping a lease
/// without releasing it puts the buffer back into the port's queue.
pub struct Buffer {
    shared: Arc<Shared>,
    slot: usize,
    port: u32,
    key: Option<BufferKey>,
    header: *mut omx_sys::BufferHeader,
    settings_version: u64,
    external: Option<Arc<ExternalSlot>>,
}

// Safety: the lease is the only owner of the header while it exists.
unsafe impl Send for Buffer {}

impl Buffer {
    pub(crate) fn new(
        shared: Arc<Shared>,
        slot: usize,
        port: u32,
        record: &BufferRecord,
    ) -> Self {
        Self {
            shared,
            slot,
            port,
            key: Some(record.key),
            header: record.header,
            settings_version: record.settings_version,
            external: record.external.clone(),
        }
    }

    /// Gives up the lease so that it is not returned on drop.
    pub(crate) fn take_key(&mut self) -> Option<BufferKey> {
        self.key.take()
    }

    pub(crate) fn is_from(&self, shared: &Arc<Shared>, slot: usize) -> bool {
        Arc::ptr_eq(&self.shared, shared) && self.slot == slot
    }

    /// Index of the port the buffer belongs to.
    pub fn port(&self) -> u32 {
        self.port
    }

    /// Port settings version the buffer was produced for.
    pub fn settings_version(&self) -> u64 {
        self.settings_version
    }

    pub fn header(&self) -> &omx_sys::BufferHeader {
        // Safety: the header outlives the lease, see `Port::deallocate_buffers`.
        unsafe { &*self.header }
    }

    pub fn header_mut(&mut self) -> &mut omx_sys::BufferHeader {
        // Safety: as in `header`, and the lease is exclusive.
        unsafe { &mut *self.header }
    }

    /// Allocated size of the buffer memory.
    pub fn capacity(&self) -> usize {
        self.header().nAllocLen as usize
    }

    /// The filled part of the buffer, starting at its offset.
    pub fn data(&self) -> &[u8] {
        let header = self.header();
        if header.pBuffer.is_null() {
            return &[];
        }
        let start = (header.nOffset as usize).min(self.capacity());
        let end = (start + header.nFilledLen as usize).min(self.capacity());
        // Safety: pBuffer points to nAllocLen bytes owned by this buffer.
        let bytes = unsafe { std::slice::from_raw_parts(header.pBuffer, self.capacity()) };
        &bytes[start..end]
    }

    /// The whole buffer memory, for filling input buffers.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.capacity();
        let header = self.header_mut();
        if header.pBuffer.is_null() {
            return &mut [];
        }
        // Safety: see `data`.
        unsafe { std::slice::from_raw_parts_mut(header.pBuffer, len) }
    }

    pub fn filled_len(&self) -> u32 {
        self.header().nFilledLen
    }

    pub fn set_filled_len(&mut self, len: u32) {
        self.header_mut().nFilledLen = len;
    }

    pub fn offset(&self) -> u32 {
        self.header().nOffset
    }

    pub fn set_offset(&mut self, offset: u32) {
        self.header_mut().nOffset = offset;
    }

    pub fn flags(&self) -> u32 {
        self.header().nFlags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.header_mut().nFlags = flags;
    }

    pub fn timestamp(&self) -> i64 {
        self.header().nTimeStamp
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.header_mut().nTimeStamp = timestamp;
    }

    pub fn has_external_memory(&self) -> bool {
        self.external.is_some()
    }

    /// Turns the lease into a reference on the buffer's external memory.
    ///
    /// The buffer stays out of circulation while any clone of the returned
    /// [`ExternalRef`] is alive. Dropping the last clone hands the buffer back
    /// to the codec core, unless the port was disabled in the meantime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Other`] if the buffer has no external memory, in which
    /// case the buffer goes back to its port, and [`Error::StaleBuffer`] if its
    /// pool was deallocated.
    pub fn detach(mut self) -> Result<ExternalRef> {
        let Some(external) = self.external.clone() else {
            return Err(Error::Other(format!(
                "buffer of port {} has no external memory",
                self.port
            )));
        };
        let key = self.take_key().ok_or(Error::StaleBuffer)?;
        self.shared.detach_key(self.slot, key, &external)?;
        Ok(ExternalRef::new(external))
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("port", &self.port)
            .field("key", &self.key)
            .field("settings_version", &self.settings_version)
            .field("filled_len", &self.filled_len())
            .finish_non_exhaustive()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            debug!(port = self.port, buffer = key, "Buffer dropped without release");
            self.shared.return_key(self.slot, key);
        }
    }
}
