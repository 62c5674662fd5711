// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Codec component instances and their state machine.
//!
//! This module provides [`Component`], which owns one instance of a codec
//! component, its ports and its sticky error. All mutable state sits behind a
//! single component lock. Codec core callbacks never take that lock; they
//! queue messages on the [`EventBridge`], and every operation drains the queue
//! before it looks at the state.

use std::{
    ffi::c_void,
    mem::ManuallyDrop,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::{
    Command, ComponentConfig, CoreModule, CoreRegistry, Direction, Error, ErrorCode, EventBridge,
    ExternalAllocator, Hacks, OmxParam, Port, Result, State, Timeouts,
    bridge::Message,
    buffer::Ownership,
    handle::ComponentHandle,
    param,
    port::PortState,
};

/// The pipeline-side owner of a component.
///
/// A component keeps its parent alive for its whole lifetime, and every
/// externally backed buffer keeps it alive while the codec core holds it.
pub trait Parent: Send + Sync {
    fn name(&self) -> &str;
}

impl Parent for String {
    fn name(&self) -> &str {
        self
    }
}

impl Parent for &'static str {
    fn name(&self) -> &str {
        self
    }
}

/// State guarded by the component lock.
pub(crate) struct Inner {
    pub(crate) state: State,
    pub(crate) pending_state: Option<State>,
    pub(crate) last_error: Option<ErrorCode>,
    pub(crate) ports: Vec<PortState>,
    /// Output ports with a settings change that was not applied yet.
    pub(crate) pending_outports: Vec<u32>,
}

impl Inner {
    pub(crate) fn check_error(&self) -> Result<()> {
        match self.last_error {
            Some(code) => Err(Error::Fatal(code)),
            None => Ok(()),
        }
    }

    /// Stores `code` unless an error is stored already. Returns the stored error.
    fn record_error(&mut self, code: ErrorCode) -> ErrorCode {
        *self.last_error.get_or_insert(code)
    }

    pub(crate) fn port_slot(&self, index: u32) -> Option<usize> {
        self.ports.iter().position(|port| port.index == index)
    }
}

/// Frees the component instance and releases its codec core.
struct HandleLease {
    handle: ManuallyDrop<Box<dyn ComponentHandle>>,
    core: Arc<CoreModule>,
    registry: CoreRegistry,
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        // Safety: the handle is not used after this point.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        if let Err(code) = handle.free() {
            error!("Failed to free component handle: {}", code);
        }
        self.registry.release(&self.core);
    }
}

/// Internal shared context of a component.
///
/// Ports and buffer leases keep their own reference, so a component stays
/// alive as long as any of them exists.
pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) parent: Arc<dyn Parent>,
    pub(crate) hacks: Hacks,
    pub(crate) timeouts: Timeouts,
    pub(crate) bridge: Arc<EventBridge>,
    pub(crate) inner: Mutex<Inner>,
    /// Mirrors `!inner.pending_outports.is_empty()`.
    pub(crate) reconfigure_pending: AtomicBool,
    pub(crate) next_key: AtomicUsize,
    pub(crate) allocator: Option<Arc<dyn ExternalAllocator>>,
    pub(crate) self_ref: Weak<Shared>,
    handle: HandleLease,
}

impl Shared {
    pub(crate) fn omx(&self) -> &dyn ComponentHandle {
        self.handle.handle.as_ref()
    }

    /// Applies every queued message.
    pub(crate) fn drain(&self, inner: &mut Inner) {
        for message in self.bridge.take_all() {
            self.apply(inner, message);
        }
    }

    fn apply(&self, inner: &mut Inner, message: Message) {
        match message {
            Message::StateReached(state) => {
                debug!(component = %self.name, "State change to {:?} finished", state);
                inner.state = state;
                if inner.pending_state == Some(state) {
                    inner.pending_state = None;
                }
            }
            Message::PortFlushed(index) => {
                for port in inner
                    .ports
                    .iter_mut()
                    .filter(|port| index == omx_sys::OMX_ALL || port.index == index)
                {
                    if port.flushing {
                        port.flushed = true;
                    } else {
                        error!(component = %self.name, port = port.index, "Port was not flushing");
                    }
                }
            }
            Message::ErrorRaised(code) => {
                let stored = inner.record_error(code);
                if stored != code {
                    debug!(component = %self.name, "Keeping earlier error {}", stored);
                }
                self.bridge.broadcast();
            }
            Message::PortEnabledChanged { port: index, enabled } => {
                for port in inner
                    .ports
                    .iter_mut()
                    .filter(|port| index == omx_sys::OMX_ALL || port.index == index)
                {
                    debug!(
                        component = %self.name,
                        port = port.index,
                        "Port {}",
                        if enabled { "enabled" } else { "disabled" }
                    );
                    port.enabled_changed = true;
                }
            }
            Message::PortSettingsChanged(index) => {
                debug!(component = %self.name, "Settings changed (port {})", index);
                let Inner {
                    ports,
                    pending_outports,
                    ..
                } = inner;
                for port in ports
                    .iter_mut()
                    .filter(|port| index == omx_sys::OMX_ALL || port.index == index)
                {
                    port.settings_version += 1;
                    if port.direction == Direction::Output && !pending_outports.contains(&port.index)
                    {
                        pending_outports.push(port.index);
                    }
                }
                if !pending_outports.is_empty() {
                    self.reconfigure_pending.store(true, Ordering::Release);
                }
            }
            Message::BufferReturned { key, emptied } => {
                for port in inner.ports.iter_mut() {
                    let Some(record) = port.pool.as_mut().and_then(|pool| pool.get_mut(key)) else {
                        continue;
                    };
                    if record.ownership != Ownership::Hardware {
                        error!(
                            component = %self.name,
                            port = port.index,
                            buffer = key,
                            "Buffer returned that was not at the hardware ({:?})",
                            record.ownership
                        );
                        return;
                    }
                    if emptied {
                        // Safety: the header belongs to a live record of this port.
                        let header = unsafe { &mut *record.header };
                        // Some cores only reset nFilledLen.
                        if header.nFilledLen == 0 {
                            header.nOffset = 0;
                        }
                        header.nFlags = 0;
                    }
                    debug!(
                        component = %self.name,
                        port = port.index,
                        buffer = key,
                        "Port {} buffer",
                        if emptied { "emptied" } else { "filled" }
                    );
                    record.take_back();
                    port.pending.push_back(key);
                    return;
                }
                error!(component = %self.name, buffer = key, "Returned buffer is unknown");
            }
        }
    }

    /// Releases the component lock and blocks on the bridge until something
    /// happens or `deadline` passes. Returns `false` on timeout.
    pub(crate) fn wait(&self, inner: &mut MutexGuard<'_, Inner>, deadline: Option<Instant>) -> bool {
        // Taking the queue lock first makes sure no broadcast slips in between.
        let queue = self.bridge.lock_queue();
        MutexGuard::unlocked(inner, || self.bridge.wait(queue, deadline))
    }

    /// Makes `code` sticky unless an error is set already, wakes every waiter
    /// and returns the sticky error.
    pub(crate) fn fail(&self, inner: &mut Inner, code: ErrorCode) -> Error {
        error!(component = %self.name, "Setting last error: {}", code);
        let stored = inner.record_error(code);
        self.bridge.broadcast();
        Error::Fatal(stored)
    }

    pub(crate) fn read_definition(&self, index: u32) -> Result<omx_sys::ParamPortDefinition> {
        let mut definition = omx_sys::ParamPortDefinition::new_initialized();
        definition.nPortIndex = index;
        self.get_parameter(omx_sys::OMX_IndexParamPortDefinition, &mut definition)?;
        Ok(definition)
    }

    pub(crate) fn get_parameter<T: OmxParam>(
        &self,
        index: omx_sys::IndexType,
        param: &mut T,
    ) -> Result<()> {
        param.init_header();
        debug!(component = %self.name, "Getting parameter at index 0x{:08x}", index);
        // Safety: OmxParam records are repr(C) and start with the standard header.
        unsafe {
            self.omx()
                .get_parameter(index, param as *mut T as *mut c_void)
        }
        .map_err(Error::Omx)
    }

    pub(crate) fn set_parameter<T: OmxParam>(
        &self,
        index: omx_sys::IndexType,
        param: &mut T,
    ) -> Result<()> {
        param.init_header();
        debug!(component = %self.name, "Setting parameter at index 0x{:08x}", index);
        // Safety: see `get_parameter`.
        unsafe {
            self.omx()
                .set_parameter(index, param as *mut T as *mut c_void)
        }
        .map_err(Error::Omx)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        debug!(component = %self.name, "Unloading component");
        let mut inner = self.inner.lock();
        for slot in 0..inner.ports.len() {
            if let Err(code) = self.deallocate_locked(&mut inner, slot) {
                error!(
                    component = %self.name,
                    port = inner.ports[slot].index,
                    "Failed to deallocate buffers: {}",
                    code
                );
            }
            self.free_orphans(&mut inner.ports[slot]);
        }
        drop(inner);
        self.bridge.clear();
    }
}

/// A codec component instance.
///
/// Components are cheap to clone; clones share the same instance. The
/// instance is freed, and its codec core released, once the last clone and
/// every [`Port`] and [`crate::Buffer`] obtained from it are gone.
///
/// # Examples
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
///
/// use omx::{Component, ComponentConfig, CoreRegistry, State};
///
/// # fn main() -> Result<(), omx::Error> {
/// let config = ComponentConfig::new("/usr/lib/libOmxCore.so", "OMX.vendor.video.decoder.avc")
///     .with_role("video_decoder.avc");
/// let component = Component::new(&CoreRegistry::global(), Arc::new("decoder"), &config)?;
/// let input = component.add_port(0)?;
/// let output = component.add_port(1)?;
///
/// component.request_state(State::Idle)?;
/// input.allocate_buffers()?;
/// output.allocate_buffers()?;
/// assert_eq!(component.await_state(Some(Duration::from_secs(5)))?, State::Idle);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Component {
    shared: Arc<Shared>,
}

impl Component {
    /// Creates a component from its configuration.
    ///
    /// The codec core is acquired from `registry`, the component instance is
    /// created and, unless suppressed by the `no-component-role` hack, its
    /// standard role is set.
    ///
    /// # Errors
    ///
    /// Returns the registry's error if the core cannot be acquired,
    /// [`Error::Omx`] if the component cannot be created or its role cannot be
    /// set, and [`Error::Config`] if the `android-native-buffers` hack is set.
    /// That hack needs [`Component::with_allocator`].
    pub fn new(
        registry: &CoreRegistry,
        parent: Arc<dyn Parent>,
        config: &ComponentConfig,
    ) -> Result<Self> {
        Self::with_allocator(registry, parent, config, None)
    }

    /// Like [`Component::new`], with an allocator for externally backed
    /// output buffers.
    pub fn with_allocator(
        registry: &CoreRegistry,
        parent: Arc<dyn Parent>,
        config: &ComponentConfig,
        allocator: Option<Arc<dyn ExternalAllocator>>,
    ) -> Result<Self> {
        let hacks = config.parsed_hacks();
        if hacks.contains(Hacks::HYBRIS) {
            error!(
                "hybris hack enabled for {} but hybris support is not compiled in",
                parent.name()
            );
            return Err(Error::Load {
                path: config.core_name.clone(),
                reason: "hybris support is not compiled in".to_string(),
            });
        }
        if hacks.contains(Hacks::ANDROID_BUFFERS) && allocator.is_none() {
            return Err(Error::Config(
                "android-native-buffers needs an external allocator".to_string(),
            ));
        }

        let core = registry.acquire(&config.core_name)?;
        let bridge = Arc::new(EventBridge::new(hacks));
        let handle = match core
            .api()
            .get_handle(&config.component_name, bridge.clone())
        {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    "Failed to get component handle '{}' from core '{}': {}",
                    config.component_name,
                    config.core_name.display(),
                    e
                );
                registry.release(&core);
                return Err(e);
            }
        };
        debug!(
            "Got component handle {} from core '{}'",
            config.component_name,
            config.core_name.display()
        );

        let shared = Arc::new_cyclic(|self_ref| Shared {
            name: config.component_name.clone(),
            parent,
            hacks,
            timeouts: config.timeouts,
            bridge,
            inner: Mutex::new(Inner {
                state: State::Loaded,
                pending_state: None,
                last_error: None,
                ports: Vec::new(),
                pending_outports: Vec::new(),
            }),
            reconfigure_pending: AtomicBool::new(false),
            next_key: AtomicUsize::new(1),
            allocator,
            self_ref: self_ref.clone(),
            handle: HandleLease {
                handle: ManuallyDrop::new(handle),
                core,
                registry: registry.clone(),
            },
        });
        let component = Self { shared };

        if let Some(role) = &config.component_role
            && !hacks.contains(Hacks::NO_COMPONENT_ROLE)
        {
            let mut param = param::component_role(role);
            let result =
                component.set_parameter(omx_sys::OMX_IndexParamStandardComponentRole, &mut param);
            debug!("Setting component role to '{}': {:?}", role, result);
            result?;
        }

        let initial = component.shared.omx().get_state();
        let mut inner = component.shared.inner.lock();
        match initial {
            Ok(state) => inner.state = state,
            Err(code) => warn!("Failed to read initial component state: {}", code),
        }
        component.shared.drain(&mut inner);
        drop(inner);

        Ok(component)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn parent(&self) -> &Arc<dyn Parent> {
        &self.shared.parent
    }

    pub fn hacks(&self) -> Hacks {
        self.shared.hacks
    }

    pub fn timeouts(&self) -> Timeouts {
        self.shared.timeouts
    }

    /// Adds the port with `index`, reading its definition from the component.
    ///
    /// The port starts out flushing: no buffer is handed to the codec core
    /// before [`Port::set_flushing`] turns that off.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicatePort`] if the port exists already and
    /// [`Error::Omx`] if its definition cannot be read.
    pub fn add_port(&self, index: u32) -> Result<Port> {
        if self.shared.inner.lock().port_slot(index).is_some() {
            return Err(Error::DuplicatePort(index));
        }

        debug!(component = %self.shared.name, port = index, "Adding port");
        let definition = self.shared.read_definition(index).inspect_err(|e| {
            error!(component = %self.shared.name, port = index, "Failed to add port: {}", e);
        })?;
        let direction =
            Direction::from_raw(definition.eDir).ok_or(Error::Omx(ErrorCode::BAD_PARAMETER))?;

        let mut inner = self.shared.inner.lock();
        if inner.port_slot(index).is_some() {
            return Err(Error::DuplicatePort(index));
        }
        inner
            .ports
            .push(PortState::new(index, direction, definition));
        let slot = inner.ports.len() - 1;
        Ok(Port::new(self.shared.clone(), slot, index, direction))
    }

    /// Returns a previously added port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPort`] if no port with `index` was added.
    pub fn port(&self, index: u32) -> Result<Port> {
        let inner = self.shared.inner.lock();
        let slot = inner.port_slot(index).ok_or(Error::UnknownPort(index))?;
        let direction = inner.ports[slot].direction;
        Ok(Port::new(self.shared.clone(), slot, index, direction))
    }

    /// Asks the component to move to `state`.
    ///
    /// Returns once the command is issued; use [`Component::await_state`] to
    /// wait for its completion. Requesting the current or already pending
    /// state does nothing. Leaving `Executing` downwards cancels every pending
    /// output reconfiguration and wakes the input ports waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] if the component is in error state and `state`
    /// is above the current state, or if the command cannot be sent.
    pub fn request_state(&self, state: State) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        shared.drain(&mut inner);

        let old_state = inner.state;
        debug!(component = %shared.name, "Setting state from {:?} to {:?}", old_state, state);

        if let Some(code) = inner.last_error
            && state > old_state
        {
            error!(component = %shared.name, "Component in error state: {}", code);
            return Err(Error::Fatal(code));
        }

        if old_state == state || inner.pending_state == Some(state) {
            debug!(component = %shared.name, "Component already in state {:?}", state);
            return Ok(());
        }

        inner.pending_state = Some(state);

        if old_state == State::Executing && state < old_state {
            inner.pending_outports.clear();
            shared.reconfigure_pending.store(false, Ordering::Release);
            shared.bridge.broadcast();
        }

        let result = shared.omx().send_command(Command::StateSet(state));
        shared.drain(&mut inner);
        result.map_err(|code| {
            error!(
                component = %shared.name,
                "Error setting state from {:?} to {:?}: {}",
                old_state,
                state,
                code
            );
            shared.fail(&mut inner, code)
        })
    }

    /// Waits for a pending state change to finish.
    ///
    /// Without a pending change the current state is returned right away, as
    /// it is for a zero `timeout`. `None` waits without a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] if the component is in error state. Missing the
    /// deadline makes [`ErrorCode::TIMEOUT`] the sticky error, since a
    /// component that misses a state change cannot be trusted any more.
    pub fn await_state(&self, timeout: Option<Duration>) -> Result<State> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        shared.drain(&mut inner);

        if inner.pending_state.is_none() {
            return Ok(inner.state);
        }
        if let Some(code) = inner.last_error {
            error!(component = %shared.name, "Component in error state: {}", code);
            return Err(Error::Fatal(code));
        }
        if timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Ok(inner.state);
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            shared.drain(&mut inner);
            if let Some(code) = inner.last_error {
                error!(
                    component = %shared.name,
                    "Got error while waiting for state change: {}",
                    code
                );
                return Err(Error::Fatal(code));
            }
            if inner.pending_state.is_none() {
                debug!(component = %shared.name, "Returning state {:?}", inner.state);
                return Ok(inner.state);
            }
            if !shared.wait(&mut inner, deadline) {
                warn!(component = %shared.name, "Timeout while waiting for state change");
                return Err(shared.fail(&mut inner, ErrorCode::TIMEOUT));
            }
        }
    }

    /// The current state, after applying every queued message.
    pub fn state(&self) -> State {
        let mut inner = self.shared.inner.lock();
        self.shared.drain(&mut inner);
        inner.state
    }

    /// The sticky error, if any.
    pub fn last_error(&self) -> Option<ErrorCode> {
        let mut inner = self.shared.inner.lock();
        self.shared.drain(&mut inner);
        inner.last_error
    }

    /// Human readable description of [`Component::last_error`].
    pub fn last_error_string(&self) -> &'static str {
        self.last_error().unwrap_or(ErrorCode::NONE).description()
    }

    /// Makes `code` the sticky error unless one is set already.
    ///
    /// Every thread blocked on the component wakes up and sees the error.
    /// [`ErrorCode::NONE`] is ignored.
    pub fn set_last_error(&self, code: ErrorCode) {
        if code.is_none() {
            return;
        }
        let mut inner = self.shared.inner.lock();
        self.shared.fail(&mut inner, code);
    }

    /// Injects a settings-changed event for `port`, as if the codec core had
    /// sent it.
    pub fn trigger_settings_changed(&self, port: u32) {
        let hacks = self.shared.hacks;
        let mut port = port;
        if port == 1 && hacks.contains(Hacks::EVENT_PORT_SETTINGS_CHANGED_PORT_0_TO_1) {
            port = 0;
        }
        if hacks.contains(Hacks::EVENT_PORT_SETTINGS_CHANGED_NDATA_PARAMETER_SWAP) {
            self.shared
                .bridge
                .on_event(omx_sys::OMX_EventPortSettingsChanged, 0, port);
        } else {
            self.shared
                .bridge
                .on_event(omx_sys::OMX_EventPortSettingsChanged, port, 0);
        }
    }

    /// Reads the parameter record at `index` into `param`.
    ///
    /// The record header is filled in; any other field the codec core expects
    /// as input (such as a port index) must be set by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Omx`] with the codec core's status on failure. The
    /// component is not put into error state.
    pub fn get_parameter<T: OmxParam>(&self, index: omx_sys::IndexType, param: &mut T) -> Result<()> {
        self.shared.get_parameter(index, param)
    }

    pub fn set_parameter<T: OmxParam>(&self, index: omx_sys::IndexType, param: &mut T) -> Result<()> {
        self.shared.set_parameter(index, param)
    }

    pub fn get_config<T: OmxParam>(&self, index: omx_sys::IndexType, config: &mut T) -> Result<()> {
        config.init_header();
        debug!(component = %self.shared.name, "Getting configuration at index 0x{:08x}", index);
        // Safety: see `Shared::get_parameter`.
        unsafe {
            self.shared
                .omx()
                .get_config(index, config as *mut T as *mut c_void)
        }
        .map_err(Error::Omx)
    }

    pub fn set_config<T: OmxParam>(&self, index: omx_sys::IndexType, config: &mut T) -> Result<()> {
        config.init_header();
        debug!(component = %self.shared.name, "Setting configuration at index 0x{:08x}", index);
        // Safety: see `Shared::get_parameter`.
        unsafe {
            self.shared
                .omx()
                .set_config(index, config as *mut T as *mut c_void)
        }
        .map_err(Error::Omx)
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.shared.name)
            .field("hacks", &self.shared.hacks)
            .finish_non_exhaustive()
    }
}
