// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! The command interface of one codec component instance.
//!
//! [`ComponentHandle`] is the seam between the lifecycle logic and the codec
//! core: the dynamic library implementation below forwards every call through
//! the component's function table, while tests substitute an in-process fake.

use std::{ffi::c_void, ptr, sync::Arc};

use libloading::Library;
use tracing::error;

use crate::{Command, ErrorCode, EventBridge, OmxResult, State};

/// Command interface of a codec component instance.
///
/// Completion of asynchronous commands and returned buffers are reported
/// through the [`EventBridge`] the handle was created with, possibly on a
/// different thread and possibly before the issuing call returns.
pub trait ComponentHandle: Send + Sync {
    fn send_command(&self, command: Command) -> OmxResult;

    /// Reads the record at `index` into `param`.
    ///
    /// # Safety
    ///
    /// `param` must point to a valid, header-initialized record of the type
    /// the codec core associates with `index`.
    unsafe fn get_parameter(&self, index: omx_sys::IndexType, param: *mut c_void) -> OmxResult;

    /// # Safety
    ///
    /// Same contract as [`ComponentHandle::get_parameter`].
    unsafe fn set_parameter(&self, index: omx_sys::IndexType, param: *mut c_void) -> OmxResult;

    /// # Safety
    ///
    /// Same contract as [`ComponentHandle::get_parameter`].
    unsafe fn get_config(&self, index: omx_sys::IndexType, config: *mut c_void) -> OmxResult;

    /// # Safety
    ///
    /// Same contract as [`ComponentHandle::get_parameter`].
    unsafe fn set_config(&self, index: omx_sys::IndexType, config: *mut c_void) -> OmxResult;

    fn get_state(&self) -> OmxResult<State>;

    /// Lets the codec core allocate a buffer of `size` bytes on `port`.
    ///
    /// `app_private` ends up in the header's `pAppPrivate` field.
    fn allocate_buffer(
        &self,
        port: u32,
        app_private: omx_sys::Ptr,
        size: u32,
    ) -> OmxResult<*mut omx_sys::BufferHeader>;

    /// Registers caller-provided memory as a buffer of `port`.
    ///
    /// # Safety
    ///
    /// `memory` must stay valid until the returned header is freed.
    unsafe fn use_buffer(
        &self,
        port: u32,
        app_private: omx_sys::Ptr,
        size: u32,
        memory: *mut u8,
    ) -> OmxResult<*mut omx_sys::BufferHeader>;

    /// # Safety
    ///
    /// `header` must have been returned by this handle for `port` and must not
    /// be used afterwards.
    unsafe fn free_buffer(&self, port: u32, header: *mut omx_sys::BufferHeader) -> OmxResult;

    /// Hands an input buffer to the codec core.
    ///
    /// # Safety
    ///
    /// `header` must be a live header of this handle that the caller owns.
    unsafe fn empty_this_buffer(&self, header: *mut omx_sys::BufferHeader) -> OmxResult;

    /// Hands an output buffer to the codec core.
    ///
    /// # Safety
    ///
    /// `header` must be a live header of this handle that the caller owns.
    unsafe fn fill_this_buffer(&self, header: *mut omx_sys::BufferHeader) -> OmxResult;

    /// Releases the component instance.
    fn free(self: Box<Self>) -> OmxResult;
}

static CALLBACKS: omx_sys::CallbackType = omx_sys::CallbackType {
    EventHandler: Some(event_handler),
    EmptyBufferDone: Some(empty_buffer_done),
    FillBufferDone: Some(fill_buffer_done),
};

/// Returns the callback table to hand to `OMX_GetHandle`.
pub(crate) fn callbacks() -> *mut omx_sys::CallbackType {
    // Cores copy the table; they never write through this pointer.
    ptr::addr_of!(CALLBACKS) as *mut omx_sys::CallbackType
}

/// Application data to hand to `OMX_GetHandle` for `bridge`.
pub(crate) fn app_data(bridge: &Arc<EventBridge>) -> omx_sys::Ptr {
    Arc::as_ptr(bridge) as omx_sys::Ptr
}

unsafe extern "C" fn event_handler(
    _component: omx_sys::Handle,
    app_data: omx_sys::Ptr,
    event: omx_sys::EventType,
    data1: u32,
    data2: u32,
    _event_data: omx_sys::Ptr,
) -> omx_sys::ErrorType {
    // Safety: app_data is the bridge kept alive by the RawHandle owning this instance.
    if let Some(bridge) = unsafe { (app_data as *const EventBridge).as_ref() } {
        bridge.on_event(event, data1, data2);
    }
    omx_sys::OMX_ErrorNone
}

unsafe extern "C" fn empty_buffer_done(
    _component: omx_sys::Handle,
    app_data: omx_sys::Ptr,
    header: *mut omx_sys::BufferHeader,
) -> omx_sys::ErrorType {
    // Safety: see event_handler; the header is owned by the core and valid for this call.
    let (bridge, header) = unsafe { ((app_data as *const EventBridge).as_ref(), header.as_ref()) };
    match (bridge, header) {
        (Some(bridge), Some(header)) => bridge.on_empty_buffer_done(header.pAppPrivate),
        _ => error!("EmptyBufferDone without bridge or header"),
    }
    omx_sys::OMX_ErrorNone
}

unsafe extern "C" fn fill_buffer_done(
    _component: omx_sys::Handle,
    app_data: omx_sys::Ptr,
    header: *mut omx_sys::BufferHeader,
) -> omx_sys::ErrorType {
    // Safety: see empty_buffer_done.
    let (bridge, header) = unsafe { ((app_data as *const EventBridge).as_ref(), header.as_ref()) };
    match (bridge, header) {
        (Some(bridge), Some(header)) => bridge.on_fill_buffer_done(header.pAppPrivate),
        _ => error!("FillBufferDone without bridge or header"),
    }
    omx_sys::OMX_ErrorNone
}

/// A component instance obtained from a dynamically loaded codec core.
pub(crate) struct RawHandle {
    handle: omx_sys::Handle,
    free_handle: omx_sys::FreeHandleFn,
    // The core reports events against this bridge's address.
    _bridge: Arc<EventBridge>,
    _library: Arc<Library>,
}

// Safety: OpenMAX IL component handles may be called from any thread; the
// lifecycle code serializes all calls that touch the same port.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    pub(crate) fn new(
        handle: omx_sys::Handle,
        free_handle: omx_sys::FreeHandleFn,
        bridge: Arc<EventBridge>,
        library: Arc<Library>,
    ) -> Self {
        Self {
            handle,
            free_handle,
            _bridge: bridge,
            _library: library,
        }
    }

    fn table(&self) -> &omx_sys::ComponentType {
        // Safety: the handle stays valid until `free` consumes self.
        unsafe { &*self.handle }
    }
}

macro_rules! vtable {
    ($self:ident . $name:ident) => {
        $self.table().$name.ok_or(ErrorCode::NOT_IMPLEMENTED)?
    };
}

impl ComponentHandle for RawHandle {
    fn send_command(&self, command: Command) -> OmxResult {
        let send = vtable!(self.SendCommand);
        let (command, param) = command.as_raw();
        ErrorCode::check(unsafe { send(self.handle, command, param, ptr::null_mut()) })
    }

    unsafe fn get_parameter(&self, index: omx_sys::IndexType, param: *mut c_void) -> OmxResult {
        let get = vtable!(self.GetParameter);
        ErrorCode::check(unsafe { get(self.handle, index, param) })
    }

    unsafe fn set_parameter(&self, index: omx_sys::IndexType, param: *mut c_void) -> OmxResult {
        let set = vtable!(self.SetParameter);
        ErrorCode::check(unsafe { set(self.handle, index, param) })
    }

    unsafe fn get_config(&self, index: omx_sys::IndexType, config: *mut c_void) -> OmxResult {
        let get = vtable!(self.GetConfig);
        ErrorCode::check(unsafe { get(self.handle, index, config) })
    }

    unsafe fn set_config(&self, index: omx_sys::IndexType, config: *mut c_void) -> OmxResult {
        let set = vtable!(self.SetConfig);
        ErrorCode::check(unsafe { set(self.handle, index, config) })
    }

    fn get_state(&self) -> OmxResult<State> {
        let get = vtable!(self.GetState);
        let mut state = omx_sys::OMX_StateInvalid;
        ErrorCode::check(unsafe { get(self.handle, &mut state) })?;
        Ok(State::from_raw(state))
    }

    fn allocate_buffer(
        &self,
        port: u32,
        app_private: omx_sys::Ptr,
        size: u32,
    ) -> OmxResult<*mut omx_sys::BufferHeader> {
        let allocate = vtable!(self.AllocateBuffer);
        let mut header = ptr::null_mut();
        ErrorCode::check(unsafe { allocate(self.handle, &mut header, port, app_private, size) })?;
        if header.is_null() {
            return Err(ErrorCode::INSUFFICIENT_RESOURCES);
        }
        Ok(header)
    }

    unsafe fn use_buffer(
        &self,
        port: u32,
        app_private: omx_sys::Ptr,
        size: u32,
        memory: *mut u8,
    ) -> OmxResult<*mut omx_sys::BufferHeader> {
        let use_buffer = vtable!(self.UseBuffer);
        let mut header = ptr::null_mut();
        ErrorCode::check(unsafe {
            use_buffer(self.handle, &mut header, port, app_private, size, memory)
        })?;
        if header.is_null() {
            return Err(ErrorCode::INSUFFICIENT_RESOURCES);
        }
        Ok(header)
    }

    unsafe fn free_buffer(&self, port: u32, header: *mut omx_sys::BufferHeader) -> OmxResult {
        let free = vtable!(self.FreeBuffer);
        ErrorCode::check(unsafe { free(self.handle, port, header) })
    }

    unsafe fn empty_this_buffer(&self, header: *mut omx_sys::BufferHeader) -> OmxResult {
        let empty = vtable!(self.EmptyThisBuffer);
        ErrorCode::check(unsafe { empty(self.handle, header) })
    }

    unsafe fn fill_this_buffer(&self, header: *mut omx_sys::BufferHeader) -> OmxResult {
        let fill = vtable!(self.FillThisBuffer);
        ErrorCode::check(unsafe { fill(self.handle, header) })
    }

    fn free(mut self: Box<Self>) -> OmxResult {
        let mut handle = ptr::null_mut();
        std::mem::swap(&mut self.handle, &mut handle);
        ErrorCode::check(unsafe { (self.free_handle)(handle) })
    }
}
