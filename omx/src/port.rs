// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Ports of a component: buffer circulation, flushing and reconfiguration.
//!
//! Every buffer of a port is owned by exactly one side at a time. Buffers
//! owned by the pipeline sit in the port's pending queue or are leased out as
//! a [`Buffer`]; buffers owned by the codec core are marked as such and come
//! back through the [`crate::EventBridge`].

use std::{
    collections::VecDeque,
    ptr,
    sync::{Arc, atomic::Ordering},
    time::Instant,
};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::{
    Buffer, Command, Direction, Error, ErrorCode, Hacks, OmxResult, Result, State,
    bridge::BufferKey,
    buffer::{BufferPool, BufferRecord, Ownership},
    component::{Inner, Shared},
    external::ExternalSlot,
};

/// Per-port state guarded by the component lock.
pub(crate) struct PortState {
    pub(crate) index: u32,
    pub(crate) direction: Direction,
    pub(crate) definition: omx_sys::ParamPortDefinition,
    pub(crate) pool: Option<BufferPool>,
    pub(crate) pending: VecDeque<BufferKey>,
    pub(crate) flushing: bool,
    pub(crate) flushed: bool,
    pub(crate) enabled_changed: bool,
    pub(crate) settings_version: u64,
    pub(crate) applied_version: u64,
    pub(crate) reconfigured_notify: bool,
    /// Resurrection epoch, bumped on every disable. Never zero.
    pub(crate) epoch: Arc<Mutex<u64>>,
    /// Records of a deallocated pool that are still leased out.
    pub(crate) orphans: Vec<BufferRecord>,
}

// Safety: the definition only carries opaque pointers owned by the codec core.
unsafe impl Send for PortState {}

impl PortState {
    pub(crate) fn new(
        index: u32,
        direction: Direction,
        definition: omx_sys::ParamPortDefinition,
    ) -> Self {
        Self {
            index,
            direction,
            definition,
            pool: None,
            pending: VecDeque::new(),
            flushing: true,
            flushed: false,
            enabled_changed: false,
            settings_version: 0,
            applied_version: 0,
            reconfigured_notify: false,
            epoch: Arc::new(Mutex::new(1)),
            orphans: Vec::new(),
        }
    }

    fn is_stale(&self) -> bool {
        self.settings_version != self.applied_version
    }

    /// Buffers of the pool that are not back in the pending queue, whether the
    /// codec core or the pipeline holds them.
    fn outstanding(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(0, |pool| pool.len().saturating_sub(self.pending.len()))
    }

    fn take_orphan(&mut self, key: BufferKey) -> Option<BufferRecord> {
        let position = self.orphans.iter().position(|record| record.key == key)?;
        Some(self.orphans.swap_remove(position))
    }
}

/// Outcome of [`Port::acquire_buffer`].
#[derive(Debug)]
pub enum Acquired {
    Buffer(Buffer),
    /// The port is flushing; no buffer is handed out until it stops.
    Flushing,
    /// The port settings changed and [`Port::reconfigure`] must run first.
    Reconfigure,
    /// A reconfiguration finished since the last call.
    Reconfigured,
}

/// Snapshot of where the buffers of a port currently are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub total: usize,
    pub pending: usize,
    pub at_hardware: usize,
    pub leased: usize,
    pub detached: usize,
}

/// A port of a [`crate::Component`].
///
/// Ports are cheap to clone and may be used from several threads at once, for
/// example one streaming thread acquiring output buffers while another one
/// flushes the port.
#[derive(Clone)]
pub struct Port {
    shared: Arc<Shared>,
    slot: usize,
    index: u32,
    direction: Direction,
}

impl Port {
    pub(crate) fn new(shared: Arc<Shared>, slot: usize, index: u32, direction: Direction) -> Self {
        Self {
            shared,
            slot,
            index,
            direction,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Takes the next buffer owned by the pipeline.
    ///
    /// Blocks while no buffer is available. Input ports also block while any
    /// output port of the component waits for reconfiguration, since the
    /// codec core must not receive new input before the output format is
    /// settled. Output ports report [`Acquired::Reconfigure`] once their
    /// settings changed, unless the next buffer was already produced with the
    /// new settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] if the component is in error state.
    pub fn acquire_buffer(&self) -> Result<Acquired> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        loop {
            shared.drain(&mut inner);
            inner.check_error()?;

            let port = &mut inner.ports[self.slot];
            if port.flushing {
                debug!(component = %shared.name, port = self.index, "Port is flushing");
                return Ok(Acquired::Flushing);
            }

            if self.direction == Direction::Input
                && shared.reconfigure_pending.load(Ordering::Acquire)
            {
                debug!(
                    component = %shared.name,
                    port = self.index,
                    "Waiting for output ports to reconfigure"
                );
                shared.wait(&mut inner, None);
                continue;
            }

            if port.is_stale() {
                if self.direction == Direction::Input {
                    debug!(component = %shared.name, port = self.index, "Port needs reconfiguration");
                    return Ok(Acquired::Reconfigure);
                }

                let version = port.settings_version;
                let Some(key) = port.pending.pop_front() else {
                    debug!(component = %shared.name, port = self.index, "Port needs reconfiguration");
                    return Ok(Acquired::Reconfigure);
                };
                let produced = port
                    .pool
                    .as_mut()
                    .and_then(|pool| pool.get_mut(key))
                    .map(|record| {
                        let produced = record.settings_version;
                        record.settings_version = version;
                        produced
                    });
                if produced == Some(version) {
                    debug!(
                        component = %shared.name,
                        port = self.index,
                        buffer = key,
                        "Buffer already has the new settings"
                    );
                    if let Some(buffer) = self.lease(&mut inner, key) {
                        return Ok(Acquired::Buffer(buffer));
                    }
                    continue;
                }
                port.pending.push_front(key);
                debug!(component = %shared.name, port = self.index, "Port needs reconfiguration");
                return Ok(Acquired::Reconfigure);
            }

            if port.reconfigured_notify {
                port.reconfigured_notify = false;
                return Ok(Acquired::Reconfigured);
            }

            if let Some(key) = port.pending.pop_front() {
                if let Some(buffer) = self.lease(&mut inner, key) {
                    debug!(component = %shared.name, port = self.index, buffer = key, "Acquired buffer");
                    return Ok(Acquired::Buffer(buffer));
                }
                continue;
            }

            debug!(component = %shared.name, port = self.index, "Waiting for buffer");
            shared.wait(&mut inner, None);
        }
    }

    fn lease(&self, inner: &mut Inner, key: BufferKey) -> Option<Buffer> {
        let port = &mut inner.ports[self.slot];
        let Some(record) = port.pool.as_mut().and_then(|pool| pool.get_mut(key)) else {
            error!(
                component = %self.shared.name,
                port = self.index,
                buffer = key,
                "Pending buffer is not in the pool"
            );
            return None;
        };
        record.ownership = Ownership::Caller;
        Some(Buffer::new(self.shared.clone(), self.slot, self.index, record))
    }

    /// Hands a leased buffer back.
    ///
    /// Input buffers are given to the codec core to be emptied and output
    /// buffers to be filled. While the port is flushing the buffer goes back
    /// into the pending queue instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] if the component is in error state or the
    /// codec core rejects the buffer; the buffer stays with the port either
    /// way. Returns [`Error::StaleBuffer`] if the pool was deallocated since
    /// the buffer was acquired, and [`Error::Other`] if it belongs to another
    /// port.
    pub fn release_buffer(&self, mut buffer: Buffer) -> Result<()> {
        if !buffer.is_from(&self.shared, self.slot) {
            return Err(Error::Other(format!(
                "buffer of port {} released on port {}",
                buffer.port(),
                self.index
            )));
        }
        let key = buffer.take_key().ok_or(Error::StaleBuffer)?;
        self.shared.release_key(self.slot, key)
    }

    /// Starts or stops flushing the port.
    ///
    /// Starting a flush makes every [`Port::acquire_buffer`] call return
    /// [`Acquired::Flushing`] and waits until every buffer of the port is
    /// back in the pending queue: the codec core must return the buffers it
    /// holds and the pipeline must release or drop its leases. Stopping it on
    /// an output port hands all pending buffers to the codec core again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the component is `Idle` or
    /// `Executing`, and [`Error::Fatal`] if it is in error state. A flush
    /// that is not acknowledged in time puts the component into error state.
    pub fn set_flushing(&self, flushing: bool) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        shared.drain(&mut inner);

        if inner.ports[self.slot].flushing == flushing {
            debug!(
                component = %shared.name,
                port = self.index,
                "Port already {}",
                if flushing { "flushing" } else { "not flushing" }
            );
            return Ok(());
        }
        inner.check_error()?;
        if !matches!(inner.state, State::Idle | State::Executing) {
            debug!(component = %shared.name, "Component is in wrong state: {:?}", inner.state);
            return Err(Error::InvalidState(inner.state));
        }

        debug!(
            component = %shared.name,
            port = self.index,
            "Setting port to {}",
            if flushing { "flushing" } else { "not flushing" }
        );

        if !flushing {
            inner.ports[self.slot].flushing = false;
            if self.direction == Direction::Output {
                shared
                    .submit_pending_locked(&mut inner, self.slot)
                    .map_err(|code| shared.fail(&mut inner, code))?;
            }
            shared.bridge.broadcast();
            return Ok(());
        }

        let port = &mut inner.ports[self.slot];
        port.flushing = true;
        port.flushed = false;
        shared.bridge.broadcast();

        if let Err(code) = shared.omx().send_command(Command::Flush(self.index)) {
            error!(component = %shared.name, port = self.index, "Error sending flush command: {}", code);
            return Err(shared.fail(&mut inner, code));
        }

        let deadline = Instant::now() + shared.timeouts.flush();
        loop {
            shared.drain(&mut inner);
            inner.check_error()?;
            let port = &inner.ports[self.slot];
            if port.flushed && port.outstanding() == 0 {
                break;
            }
            if !shared.wait(&mut inner, Some(deadline)) {
                error!(
                    component = %shared.name,
                    port = self.index,
                    "Timeout while flushing port, {} buffers outstanding",
                    inner.ports[self.slot].outstanding()
                );
                return Err(shared.fail(&mut inner, ErrorCode::TIMEOUT));
            }
        }

        debug!(component = %shared.name, port = self.index, "Port flushed");
        Ok(())
    }

    pub fn is_flushing(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        self.shared.drain(&mut inner);
        inner.ports[self.slot].flushing
    }

    /// Enables or disables the port.
    ///
    /// Disabling waits until every buffer is back in the pending queue, from
    /// the codec core and from the pipeline's leases, and frees the pool;
    /// enabling allocates a fresh pool from the current port
    /// definition. Output buffers of a freshly enabled port are handed to the
    /// codec core right away.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the component is `Idle` or
    /// `Executing`. Any failure of the transition itself, including a missed
    /// deadline, puts the component into error state and returns
    /// [`Error::Fatal`].
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        self.shared.set_enabled_locked(&mut inner, self.slot, enabled)
    }

    /// Whether the codec core reports the port as enabled.
    pub fn is_enabled(&self) -> Result<bool> {
        let definition = self.definition()?;
        Ok(definition.bEnabled != omx_sys::OMX_FALSE)
    }

    /// Reads the current port definition from the codec core.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Omx`] if the definition cannot be read.
    pub fn definition(&self) -> Result<omx_sys::ParamPortDefinition> {
        let definition = self.shared.read_definition(self.index)?;
        self.shared.inner.lock().ports[self.slot].definition = definition;
        Ok(definition)
    }

    /// Writes `definition` to the codec core, if given, and reads back what
    /// the codec core made of it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Omx`] if the codec core rejects the definition or it
    /// cannot be read back.
    pub fn update_definition(
        &self,
        definition: Option<&omx_sys::ParamPortDefinition>,
    ) -> Result<omx_sys::ParamPortDefinition> {
        if let Some(definition) = definition {
            let mut definition = *definition;
            definition.nPortIndex = self.index;
            self.shared
                .set_parameter(omx_sys::OMX_IndexParamPortDefinition, &mut definition)?;
        }
        let definition = self.definition()?;
        debug!(
            component = %self.shared.name,
            port = self.index,
            "Updated port definition: {:?}",
            definition
        );
        Ok(definition)
    }

    /// Allocates the buffer pool from the current port definition.
    ///
    /// The buffer count is raised to the minimum the codec core demands. The
    /// new buffers start out pending on the pipeline side.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Other`] if a pool exists already. Any failure of the
    /// codec core puts the component into error state.
    pub fn allocate_buffers(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        self.shared.drain(&mut inner);
        inner.check_error()?;
        self.shared.allocate_locked(&mut inner, self.slot)
    }

    /// Frees the buffer pool.
    ///
    /// Every buffer is freed even if some of them fail, and even when the
    /// component is in error state. Leased buffers are freed once their lease
    /// is released or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Omx`] with the first failure of the codec core.
    pub fn deallocate_buffers(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        self.shared.drain(&mut inner);
        self.shared
            .deallocate_locked(&mut inner, self.slot)
            .map_err(Error::Omx)
    }

    /// Applies pending settings by disabling and re-enabling the port.
    ///
    /// Does nothing if the settings did not change. Once an output port is
    /// reconfigured, input ports blocked in [`Port::acquire_buffer`] resume
    /// when no other output port waits for reconfiguration.
    ///
    /// # Errors
    ///
    /// See [`Port::set_enabled`].
    pub fn reconfigure(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        shared.drain(&mut inner);
        inner.check_error()?;

        let port = &inner.ports[self.slot];
        if !port.is_stale() {
            debug!(component = %shared.name, port = self.index, "Port has no pending settings");
            return Ok(());
        }
        let version = port.settings_version;
        debug!(
            component = %shared.name,
            port = self.index,
            "Reconfiguring port to settings version {}",
            version
        );

        shared.set_enabled_locked(&mut inner, self.slot, false)?;
        shared.set_enabled_locked(&mut inner, self.slot, true)?;

        let port = &mut inner.ports[self.slot];
        port.applied_version = version;
        port.reconfigured_notify = true;
        if self.direction == Direction::Output {
            shared.remove_pending_outport(&mut inner, self.index);
        }
        debug!(component = %shared.name, port = self.index, "Port reconfigured");
        Ok(())
    }

    /// Starts or finishes a reconfiguration driven by the pipeline.
    ///
    /// Starting marks the settings as changed, as a settings-changed event of
    /// the codec core would. Finishing marks them applied. The caller is
    /// responsible for the port transitions in between.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] if the component is in error state.
    pub fn manual_reconfigure(&self, start: bool) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        shared.drain(&mut inner);
        inner.check_error()?;

        debug!(
            component = %shared.name,
            port = self.index,
            "Manual reconfigure {}",
            if start { "start" } else { "stop" }
        );

        let Inner {
            ports,
            pending_outports,
            ..
        } = &mut *inner;
        let port = &mut ports[self.slot];
        if start {
            port.settings_version += 1;
            if self.direction == Direction::Output && !pending_outports.contains(&self.index) {
                pending_outports.push(self.index);
                shared.reconfigure_pending.store(true, Ordering::Release);
            }
        } else {
            port.applied_version = port.settings_version;
            if self.direction == Direction::Output {
                shared.remove_pending_outport(&mut inner, self.index);
            }
        }
        shared.bridge.broadcast();
        Ok(())
    }

    /// Whether the port settings changed since they were last applied.
    pub fn needs_reconfigure(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        self.shared.drain(&mut inner);
        inner.ports[self.slot].is_stale()
    }

    pub fn stats(&self) -> PortStats {
        let mut inner = self.shared.inner.lock();
        self.shared.drain(&mut inner);
        let port = &inner.ports[self.slot];
        let Some(pool) = &port.pool else {
            return PortStats::default();
        };
        PortStats {
            total: pool.len(),
            pending: pool.count(Ownership::Pending),
            at_hardware: pool.count(Ownership::Hardware),
            leased: pool.count(Ownership::Caller),
            detached: pool.count(Ownership::Detached),
        }
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("component", &self.shared.name)
            .field("index", &self.index)
            .field("direction", &self.direction)
            .finish()
    }
}

impl Shared {
    /// Takes back a leased or detached buffer and hands it to the codec core.
    pub(crate) fn release_key(&self, slot: usize, key: BufferKey) -> Result<()> {
        let mut inner = self.inner.lock();
        self.drain(&mut inner);

        let sticky = inner.last_error;
        let port = &mut inner.ports[slot];
        let index = port.index;
        let direction = port.direction;

        if let Some(orphan) = port.take_orphan(key) {
            debug!(component = %self.name, port = index, buffer = key, "Released buffer of a deallocated pool");
            let _ = self.free_record(index, orphan);
            return Err(Error::StaleBuffer);
        }

        let Some(record) = port.pool.as_mut().and_then(|pool| pool.get_mut(key)) else {
            return Err(Error::StaleBuffer);
        };
        if !matches!(record.ownership, Ownership::Caller | Ownership::Detached) {
            error!(
                component = %self.name,
                port = index,
                buffer = key,
                "Released buffer is not owned by the pipeline ({:?})",
                record.ownership
            );
            return Err(Error::StaleBuffer);
        }

        if sticky.is_some() || port.flushing {
            record.take_back();
            port.pending.push_back(key);
            self.bridge.broadcast();
            return match sticky {
                Some(code) => {
                    error!(component = %self.name, "Component in error state: {}", code);
                    Err(Error::Fatal(code))
                }
                None => {
                    debug!(component = %self.name, port = index, buffer = key, "Port is flushing, keeping buffer");
                    Ok(())
                }
            };
        }

        record.hand_off(&self.parent);
        let header = record.header;
        debug!(
            component = %self.name,
            port = index,
            buffer = key,
            "Releasing buffer to the hardware"
        );
        // Safety: the record is live and now owned by the hardware.
        let result = unsafe {
            match direction {
                Direction::Input => self.omx().empty_this_buffer(header),
                Direction::Output => self.omx().fill_this_buffer(header),
            }
        };

        if let Err(code) = result {
            error!(component = %self.name, port = index, buffer = key, "Failed to release buffer: {}", code);
            self.take_back_pending(&mut inner, slot, key, false);
            return Err(self.fail(&mut inner, code));
        }
        Ok(())
    }

    /// Puts a lease dropped without release back into the pending queue.
    pub(crate) fn return_key(&self, slot: usize, key: BufferKey) {
        let mut inner = self.inner.lock();
        let port = &mut inner.ports[slot];
        if let Some(orphan) = port.take_orphan(key) {
            let index = port.index;
            let _ = self.free_record(index, orphan);
            return;
        }
        if let Some(record) = port.pool.as_mut().and_then(|pool| pool.get_mut(key))
            && record.ownership == Ownership::Caller
        {
            record.take_back();
            port.pending.push_back(key);
            self.bridge.broadcast();
        }
    }

    /// Marks a leased buffer as only referenced through its external memory.
    pub(crate) fn detach_key(
        &self,
        slot: usize,
        key: BufferKey,
        external: &ExternalSlot,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let port = &mut inner.ports[slot];
        if let Some(orphan) = port.take_orphan(key) {
            let index = port.index;
            let _ = self.free_record(index, orphan);
            return Err(Error::StaleBuffer);
        }
        let record = port
            .pool
            .as_mut()
            .and_then(|pool| pool.get_mut(key))
            .ok_or(Error::StaleBuffer)?;
        record.ownership = Ownership::Detached;
        external.mark_detached();
        debug!(component = %self.name, port = port.index, buffer = key, "Detached buffer");
        Ok(())
    }

    fn take_back_pending(&self, inner: &mut Inner, slot: usize, key: BufferKey, front: bool) {
        let port = &mut inner.ports[slot];
        if let Some(record) = port.pool.as_mut().and_then(|pool| pool.get_mut(key)) {
            record.take_back();
            if front {
                port.pending.push_front(key);
            } else {
                port.pending.push_back(key);
            }
        }
    }

    /// Hands every pending buffer of an output port to the codec core.
    pub(crate) fn submit_pending_locked(&self, inner: &mut Inner, slot: usize) -> OmxResult {
        while let Some(key) = inner.ports[slot].pending.pop_front() {
            let port = &mut inner.ports[slot];
            let Some(record) = port.pool.as_mut().and_then(|pool| pool.get_mut(key)) else {
                continue;
            };
            record.hand_off(&self.parent);
            // Safety: the record is live and was pending on the pipeline side.
            let result = unsafe {
                (*record.header).nFlags = 0;
                self.omx().fill_this_buffer(record.header)
            };
            if let Err(code) = result {
                error!(
                    component = %self.name,
                    port = port.index,
                    buffer = key,
                    "Failed to pass buffer to the hardware: {}",
                    code
                );
                self.take_back_pending(inner, slot, key, true);
                return Err(code);
            }
            debug!(component = %self.name, port = port.index, buffer = key, "Passed buffer to the hardware");
        }
        Ok(())
    }

    /// Allocates the pool of a port. Failures are sticky.
    pub(crate) fn allocate_locked(&self, inner: &mut Inner, slot: usize) -> Result<()> {
        let index = inner.ports[slot].index;
        if inner.ports[slot].pool.is_some() {
            return Err(Error::Other(format!("port {index} has buffers allocated already")));
        }

        let mut definition = match self.read_definition(index) {
            Ok(definition) => definition,
            Err(e) => return Err(self.fail(inner, e.code().unwrap_or(ErrorCode::UNDEFINED))),
        };
        if definition.nBufferCountActual < definition.nBufferCountMin {
            debug!(
                component = %self.name,
                port = index,
                "Raising buffer count from {} to {}",
                definition.nBufferCountActual,
                definition.nBufferCountMin
            );
            definition.nBufferCountActual = definition.nBufferCountMin;
            if let Err(e) =
                self.set_parameter(omx_sys::OMX_IndexParamPortDefinition, &mut definition)
            {
                return Err(self.fail(inner, e.code().unwrap_or(ErrorCode::UNDEFINED)));
            }
        }

        let port = &mut inner.ports[slot];
        port.definition = definition;
        let count = definition.nBufferCountActual as usize;
        let size = definition.nBufferSize;
        let external = self.hacks.contains(Hacks::ANDROID_BUFFERS) && port.direction == Direction::Output;
        debug!(
            component = %self.name,
            port = index,
            "Allocating {} buffers of size {}{}",
            count,
            size,
            if external { " with external memory" } else { "" }
        );

        let mut pool = BufferPool::with_capacity(count);
        let mut result = Ok(());
        for _ in 0..count {
            let key = self.next_key.fetch_add(1, Ordering::Relaxed);
            match self.allocate_record(port, slot, key, external, size) {
                Ok(record) => {
                    pool.push(record);
                    port.pending.push_back(key);
                }
                Err(code) => {
                    result = Err(code);
                    break;
                }
            }
        }
        debug!(component = %self.name, port = index, "Allocated {} buffers", pool.len());
        port.pool = Some(pool);

        self.drain(inner);
        result.map_err(|code| {
            error!(component = %self.name, port = index, "Failed to allocate buffers: {}", code);
            self.fail(inner, code)
        })
    }

    fn allocate_record(
        &self,
        port: &PortState,
        slot: usize,
        key: BufferKey,
        external: bool,
        size: u32,
    ) -> OmxResult<BufferRecord> {
        let app_private = key as omx_sys::Ptr;
        let (header, external) = if external {
            let allocator = self
                .allocator
                .as_ref()
                .ok_or(ErrorCode::INSUFFICIENT_RESOURCES)?;
            let memory = allocator.allocate(&port.definition).map_err(|e| {
                error!(component = %self.name, port = port.index, "External allocation failed: {}", e);
                ErrorCode::INSUFFICIENT_RESOURCES
            })?;
            let slot = ExternalSlot::new(
                memory,
                key,
                slot,
                port.index,
                port.epoch.clone(),
                self.self_ref.clone(),
            );
            // Safety: the memory lives in the slot, which the record keeps until the header is freed.
            let header =
                unsafe { self.omx().use_buffer(port.index, app_private, size, slot.as_ptr()) }?;
            (header, Some(slot))
        } else {
            (self.omx().allocate_buffer(port.index, app_private, size)?, None)
        };

        Ok(BufferRecord {
            key,
            header,
            ownership: Ownership::Pending,
            settings_version: port.settings_version,
            external,
            parent_hold: None,
        })
    }

    /// Frees the pool of a port, attempting every buffer.
    ///
    /// Leased buffers are kept as orphans until their lease ends.
    pub(crate) fn deallocate_locked(&self, inner: &mut Inner, slot: usize) -> OmxResult {
        let port = &mut inner.ports[slot];
        port.pending.clear();
        let Some(pool) = port.pool.take() else {
            return Ok(());
        };

        debug!(component = %self.name, port = port.index, "Deallocating {} buffers", pool.len());
        let mut first_error = None;
        for record in pool.into_records() {
            match record.ownership {
                Ownership::Caller => {
                    debug!(
                        component = %self.name,
                        port = port.index,
                        buffer = record.key,
                        "Deferring free of leased buffer"
                    );
                    port.orphans.push(record);
                    continue;
                }
                Ownership::Hardware => {
                    warn!(
                        component = %self.name,
                        port = port.index,
                        buffer = record.key,
                        "Freeing buffer still at the hardware"
                    );
                }
                Ownership::Detached => {
                    if let Some(external) = &record.external {
                        let _epoch = port.epoch.lock();
                        external.take_detached_epoch();
                    }
                }
                Ownership::Pending => {}
            }
            if let Err(code) = self.free_record(port.index, record) {
                first_error.get_or_insert(code);
            }
        }

        match first_error {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn free_record(&self, port: u32, record: BufferRecord) -> OmxResult {
        // Safety: the header is live; clearing the token makes late returns of it harmless.
        let result = unsafe {
            (*record.header).pAppPrivate = ptr::null_mut();
            self.omx().free_buffer(port, record.header)
        };
        if let Err(code) = result {
            error!(
                component = %self.name,
                port,
                buffer = record.key,
                "Failed to free buffer: {}",
                code
            );
        }
        result
    }

    pub(crate) fn free_orphans(&self, port: &mut PortState) {
        for record in port.orphans.drain(..) {
            // Errors are logged by free_record.
            let _ = self.free_record(port.index, record);
        }
    }

    /// Requeues detached buffers and starts a new resurrection epoch.
    fn reclaim_detached(&self, port: &mut PortState) {
        let epoch = port.epoch.clone();
        let mut epoch = epoch.lock();
        if let Some(pool) = port.pool.as_mut() {
            for record in pool
                .iter_mut()
                .filter(|record| record.ownership == Ownership::Detached)
            {
                let reclaimed = record
                    .external
                    .as_ref()
                    .is_some_and(|external| external.take_detached_epoch() != 0);
                if reclaimed {
                    debug!(component = %self.name, port = port.index, buffer = record.key, "Reclaiming detached buffer");
                    record.take_back();
                    port.pending.push_back(record.key);
                }
            }
        }
        *epoch += 1;
    }

    pub(crate) fn remove_pending_outport(&self, inner: &mut Inner, index: u32) {
        inner.pending_outports.retain(|port| *port != index);
        if inner.pending_outports.is_empty() {
            self.reconfigure_pending.store(false, Ordering::Release);
            self.bridge.broadcast();
        }
    }

    pub(crate) fn set_enabled_locked(
        &self,
        inner: &mut MutexGuard<'_, Inner>,
        slot: usize,
        enabled: bool,
    ) -> Result<()> {
        self.drain(inner);
        inner.check_error()?;
        if !matches!(inner.state, State::Idle | State::Executing) {
            debug!(component = %self.name, "Component is in wrong state: {:?}", inner.state);
            return Err(Error::InvalidState(inner.state));
        }

        let index = inner.ports[slot].index;
        let definition = self.read_definition(index)?;
        inner.ports[slot].definition = definition;
        if (definition.bEnabled != omx_sys::OMX_FALSE) == enabled {
            debug!(
                component = %self.name,
                port = index,
                "Port already {}",
                if enabled { "enabled" } else { "disabled" }
            );
            return Ok(());
        }

        debug!(
            component = %self.name,
            port = index,
            "{} port",
            if enabled { "Enabling" } else { "Disabling" }
        );

        let port = &mut inner.ports[slot];
        port.enabled_changed = false;
        if !enabled {
            port.flushing = true;
            self.bridge.broadcast();
        }

        let command = if enabled {
            Command::PortEnable(index)
        } else {
            Command::PortDisable(index)
        };
        if let Err(code) = self.omx().send_command(command) {
            error!(component = %self.name, port = index, "Failed to send {:?}: {}", command, code);
            return Err(self.fail(inner, code));
        }

        if !enabled {
            self.reclaim_detached(&mut inner.ports[slot]);
        }

        let deadline = Instant::now() + self.timeouts.port_transition();
        loop {
            self.drain(inner);
            inner.check_error()?;
            if inner.ports[slot].outstanding() == 0 {
                break;
            }
            if !self.wait(inner, Some(deadline)) {
                error!(
                    component = %self.name,
                    port = index,
                    "Timeout waiting for {} outstanding buffers",
                    inner.ports[slot].outstanding()
                );
                return Err(self.fail(inner, ErrorCode::TIMEOUT));
            }
        }

        if enabled {
            self.allocate_locked(inner, slot)?;
        } else if let Err(code) = self.deallocate_locked(inner, slot) {
            return Err(self.fail(inner, code));
        }

        let deadline = Instant::now() + self.timeouts.port_transition();
        loop {
            self.drain(inner);
            inner.check_error()?;
            if inner.ports[slot].enabled_changed {
                let definition = match self.read_definition(index) {
                    Ok(definition) => definition,
                    Err(e) => {
                        return Err(self.fail(inner, e.code().unwrap_or(ErrorCode::UNDEFINED)));
                    }
                };
                inner.ports[slot].definition = definition;
                if (definition.bEnabled != omx_sys::OMX_FALSE) == enabled {
                    break;
                }
            }
            if !self.wait(inner, Some(deadline)) {
                error!(
                    component = %self.name,
                    port = index,
                    "Timeout waiting for port to be {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                return Err(self.fail(inner, ErrorCode::TIMEOUT));
            }
        }

        let port = &mut inner.ports[slot];
        port.enabled_changed = false;
        if enabled {
            port.flushing = false;
            if port.direction == Direction::Output {
                self.submit_pending_locked(inner, slot)
                    .map_err(|code| self.fail(inner, code))?;
            }
        }

        debug!(
            component = %self.name,
            port = index,
            "Port {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }
}
