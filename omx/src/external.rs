// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Externally allocated buffer memory and its hand-back to the port.
//!
//! With the `android-native-buffers` hack, output buffers are backed by memory
//! that the pipeline can keep referencing after the buffer record itself was
//! given up ([`crate::Buffer::detach`]). When the last [`ExternalRef`] goes
//! away, the memory is either fed back to the codec core as a fresh output
//! buffer or freed, depending on whether the port was disabled in between.
//! The port's resurrection epoch makes that decision; it is bumped on every
//! disable and compared against the epoch recorded at detach time.

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{Result, bridge::BufferKey, component::Shared};

/// Memory provided by an [`ExternalAllocator`]; released when dropped.
pub trait NativeMemory: Send + Sync {
    /// Address handed to the codec core with `UseBuffer`.
    fn as_ptr(&self) -> *mut u8;

    /// Row stride of the allocation in bytes, if it has one.
    fn stride(&self) -> u32 {
        0
    }
}

/// Allocates buffer memory outside of the codec core.
pub trait ExternalAllocator: Send + Sync {
    /// Allocates memory for one buffer of the port described by `definition`.
    ///
    /// # Errors
    ///
    /// Any error is treated as an allocation failure of the port.
    fn allocate(&self, definition: &omx_sys::ParamPortDefinition)
    -> Result<Box<dyn NativeMemory>>;
}

/// External memory of one buffer record together with what the finalize hook
/// needs to find its way back.
pub(crate) struct ExternalSlot {
    memory: Box<dyn NativeMemory>,
    key: BufferKey,
    port_slot: usize,
    port_index: u32,
    epoch: Arc<Mutex<u64>>,
    // Port epoch at detach time; zero once the record was reclaimed or finalized.
    detached_epoch: AtomicU64,
    owner: Weak<Shared>,
}

impl ExternalSlot {
    pub(crate) fn new(
        memory: Box<dyn NativeMemory>,
        key: BufferKey,
        port_slot: usize,
        port_index: u32,
        epoch: Arc<Mutex<u64>>,
        owner: Weak<Shared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            memory,
            key,
            port_slot,
            port_index,
            epoch,
            detached_epoch: AtomicU64::new(0),
            owner,
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.memory.as_ptr()
    }

    /// Records the current port epoch. Called when the record is detached.
    pub(crate) fn mark_detached(&self) {
        let epoch = self.epoch.lock();
        self.detached_epoch.store(*epoch, Ordering::Release);
    }

    /// Clears the detach stamp, returning what it was.
    ///
    /// Must be called with the port epoch locked.
    pub(crate) fn take_detached_epoch(&self) -> u64 {
        self.detached_epoch.swap(0, Ordering::AcqRel)
    }

    fn finalize(&self) {
        let resurrect = {
            let epoch = self.epoch.lock();
            let snapshot = self.take_detached_epoch();
            snapshot != 0 && snapshot == *epoch
        };

        if resurrect && let Some(shared) = self.owner.upgrade() {
            debug!(
                port = self.port_index,
                buffer = self.key,
                "Resurrecting buffer"
            );
            if let Err(e) = shared.release_key(self.port_slot, self.key) {
                debug!(
                    port = self.port_index,
                    buffer = self.key,
                    "Resurrected buffer was not handed back: {}", e
                );
            }
            return;
        }

        debug!(
            port = self.port_index,
            buffer = self.key,
            "Destroying external memory of stale buffer"
        );
    }
}

struct Detached {
    slot: Arc<ExternalSlot>,
}

impl Drop for Detached {
    fn drop(&mut self) {
        self.slot.finalize();
    }
}

/// Shared reference to the external memory of a detached buffer.
///
/// Clones share one lease. Dropping the last clone returns the memory to its
/// port if the port kept its buffers since the detach, and frees it otherwise.
#[derive(Clone)]
pub struct ExternalRef(Arc<Detached>);

impl ExternalRef {
    pub(crate) fn new(slot: Arc<ExternalSlot>) -> Self {
        Self(Arc::new(Detached { slot }))
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.0.slot.as_ptr()
    }

    pub fn stride(&self) -> u32 {
        self.0.slot.memory.stride()
    }

    /// Index of the port the memory belongs to.
    pub fn port(&self) -> u32 {
        self.0.slot.port_index
    }

    pub fn memory(&self) -> &dyn NativeMemory {
        self.0.slot.memory.as_ref()
    }
}

impl fmt::Debug for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalRef")
            .field("port", &self.port())
            .field("ptr", &self.as_ptr())
            .finish()
    }
}
