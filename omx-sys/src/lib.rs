// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! # omx-sys: Raw FFI declarations for OpenMAX IL codec cores
//!
//! This crate declares the subset of the OpenMAX IL 1.1.2 C ABI that is needed
//! to drive a vendor codec core: status codes, the state/command/event
//! enumerations, the buffer header and port definition records, the component
//! function table and the callback table.
//!
//! ## Overview
//!
//! `omx-sys` exposes:
//! - Raw C types (`BufferHeader`, `ParamPortDefinition`, `ComponentType`, etc.)
//! - Raw C entry point signatures of a codec core module (`OMX_Init`,
//!   `OMX_GetHandle`, ...)
//! - Constants for error codes, states, commands, events, indices and buffer flags
//!
//! Vendors do not ship a common set of headers, so the declarations are kept by
//! hand and follow the layout of the Khronos reference headers with 32-bit
//! enumerations and natural alignment.
//!
//! ## Usage
//!
//! **Most users should NOT use this crate directly.** Use the safe [`omx`] wrapper
//! crate instead, which provides:
//! - Component, port and buffer lifecycle management
//! - Rust-idiomatic error handling with `Result`
//! - Synchronous waits on the asynchronous callback interface
//!
//! ## Safety
//!
//! Every pointer in these records is owned by the codec core unless stated
//! otherwise. The caller is responsible for:
//! - Setting `nSize`/`nVersion` on every structure passed to the core
//! - Never touching a buffer header after it was freed with `FreeBuffer`
//! - Null checks
//!
//! [`omx`]: https://docs.rs/omx

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(missing_docs)]
#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_char, c_void};

pub type Bool = u32;
pub type Ptr = *mut c_void;
pub type Handle = *mut ComponentType;
pub type ErrorType = u32;
pub type StateType = u32;
pub type CommandType = u32;
pub type EventType = u32;
pub type DirType = u32;
pub type IndexType = u32;
pub type PortDomainType = u32;

pub const OMX_FALSE: Bool = 0;
pub const OMX_TRUE: Bool = 1;

/// Wildcard port index accepted by commands and events.
pub const OMX_ALL: u32 = 0xFFFF_FFFF;

pub const OMX_MAX_STRINGNAME_SIZE: usize = 128;

pub const OMX_VERSION_MAJOR: u8 = 1;
pub const OMX_VERSION_MINOR: u8 = 1;
pub const OMX_VERSION_REVISION: u8 = 2;
pub const OMX_VERSION_STEP: u8 = 0;

pub const OMX_ErrorNone: ErrorType = 0;
pub const OMX_ErrorInsufficientResources: ErrorType = 0x8000_1000;
pub const OMX_ErrorUndefined: ErrorType = 0x8000_1001;
pub const OMX_ErrorInvalidComponentName: ErrorType = 0x8000_1002;
pub const OMX_ErrorComponentNotFound: ErrorType = 0x8000_1003;
pub const OMX_ErrorInvalidComponent: ErrorType = 0x8000_1004;
pub const OMX_ErrorBadParameter: ErrorType = 0x8000_1005;
pub const OMX_ErrorNotImplemented: ErrorType = 0x8000_1006;
pub const OMX_ErrorUnderflow: ErrorType = 0x8000_1007;
pub const OMX_ErrorOverflow: ErrorType = 0x8000_1008;
pub const OMX_ErrorHardware: ErrorType = 0x8000_1009;
pub const OMX_ErrorInvalidState: ErrorType = 0x8000_100A;
pub const OMX_ErrorStreamCorrupt: ErrorType = 0x8000_100B;
pub const OMX_ErrorPortsNotCompatible: ErrorType = 0x8000_100C;
pub const OMX_ErrorResourcesLost: ErrorType = 0x8000_100D;
pub const OMX_ErrorNoMore: ErrorType = 0x8000_100E;
pub const OMX_ErrorVersionMismatch: ErrorType = 0x8000_100F;
pub const OMX_ErrorNotReady: ErrorType = 0x8000_1010;
pub const OMX_ErrorTimeout: ErrorType = 0x8000_1011;
pub const OMX_ErrorSameState: ErrorType = 0x8000_1012;
pub const OMX_ErrorResourcesPreempted: ErrorType = 0x8000_1013;
pub const OMX_ErrorPortUnresponsiveDuringAllocation: ErrorType = 0x8000_1014;
pub const OMX_ErrorPortUnresponsiveDuringDeallocation: ErrorType = 0x8000_1015;
pub const OMX_ErrorPortUnresponsiveDuringStop: ErrorType = 0x8000_1016;
pub const OMX_ErrorIncorrectStateTransition: ErrorType = 0x8000_1017;
pub const OMX_ErrorIncorrectStateOperation: ErrorType = 0x8000_1018;
pub const OMX_ErrorUnsupportedSetting: ErrorType = 0x8000_1019;
pub const OMX_ErrorUnsupportedIndex: ErrorType = 0x8000_101A;
pub const OMX_ErrorBadPortIndex: ErrorType = 0x8000_101B;
pub const OMX_ErrorPortUnpopulated: ErrorType = 0x8000_101C;
pub const OMX_ErrorComponentSuspended: ErrorType = 0x8000_101D;
pub const OMX_ErrorDynamicResourcesUnavailable: ErrorType = 0x8000_101E;
pub const OMX_ErrorMbErrorsInFrame: ErrorType = 0x8000_101F;
pub const OMX_ErrorFormatNotDetected: ErrorType = 0x8000_1020;
pub const OMX_ErrorContentPipeOpenFailed: ErrorType = 0x8000_1021;
pub const OMX_ErrorContentPipeCreationFailed: ErrorType = 0x8000_1022;
pub const OMX_ErrorSeperateTablesUsed: ErrorType = 0x8000_1023;
pub const OMX_ErrorTunnelingUnsupported: ErrorType = 0x8000_1024;
pub const OMX_ErrorKhronosExtensions: ErrorType = 0x8F00_0000;
pub const OMX_ErrorVendorStartUnused: ErrorType = 0x9000_0000;
pub const OMX_ErrorMax: ErrorType = 0x7FFF_FFFF;

pub const OMX_StateInvalid: StateType = 0;
pub const OMX_StateLoaded: StateType = 1;
pub const OMX_StateIdle: StateType = 2;
pub const OMX_StateExecuting: StateType = 3;
pub const OMX_StatePause: StateType = 4;
pub const OMX_StateWaitForResources: StateType = 5;

pub const OMX_CommandStateSet: CommandType = 0;
pub const OMX_CommandFlush: CommandType = 1;
pub const OMX_CommandPortDisable: CommandType = 2;
pub const OMX_CommandPortEnable: CommandType = 3;
pub const OMX_CommandMarkBuffer: CommandType = 4;

pub const OMX_EventCmdComplete: EventType = 0;
pub const OMX_EventError: EventType = 1;
pub const OMX_EventMark: EventType = 2;
pub const OMX_EventPortSettingsChanged: EventType = 3;
pub const OMX_EventBufferFlag: EventType = 4;
pub const OMX_EventResourcesAcquired: EventType = 5;
pub const OMX_EventComponentResumed: EventType = 6;
pub const OMX_EventDynamicResourcesAvailable: EventType = 7;
pub const OMX_EventPortFormatDetected: EventType = 8;

pub const OMX_DirInput: DirType = 0;
pub const OMX_DirOutput: DirType = 1;

pub const OMX_PortDomainAudio: PortDomainType = 0;
pub const OMX_PortDomainVideo: PortDomainType = 1;
pub const OMX_PortDomainImage: PortDomainType = 2;
pub const OMX_PortDomainOther: PortDomainType = 3;

pub const OMX_IndexParamPriorityMgmt: IndexType = 0x0100_0001;
pub const OMX_IndexParamStandardComponentRole: IndexType = 0x0100_0017;
pub const OMX_IndexParamPortDefinition: IndexType = 0x0200_0001;
pub const OMX_IndexParamVideoPortFormat: IndexType = 0x0600_0001;

pub const OMX_BUFFERFLAG_EOS: u32 = 0x0000_0001;
pub const OMX_BUFFERFLAG_STARTTIME: u32 = 0x0000_0002;
pub const OMX_BUFFERFLAG_DECODEONLY: u32 = 0x0000_0004;
pub const OMX_BUFFERFLAG_DATACORRUPT: u32 = 0x0000_0008;
pub const OMX_BUFFERFLAG_ENDOFFRAME: u32 = 0x0000_0010;
pub const OMX_BUFFERFLAG_SYNCFRAME: u32 = 0x0000_0020;
pub const OMX_BUFFERFLAG_EXTRADATA: u32 = 0x0000_0040;
pub const OMX_BUFFERFLAG_CODECCONFIG: u32 = 0x0000_0080;

/// Structure version stamp carried by every parameter record.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct VersionType {
    pub nVersionMajor: u8,
    pub nVersionMinor: u8,
    pub nRevision: u8,
    pub nStep: u8,
}

impl VersionType {
    pub const fn current() -> Self {
        Self {
            nVersionMajor: OMX_VERSION_MAJOR,
            nVersionMinor: OMX_VERSION_MINOR,
            nRevision: OMX_VERSION_REVISION,
            nStep: OMX_VERSION_STEP,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct BufferHeader {
    pub nSize: u32,
    pub nVersion: VersionType,
    pub pBuffer: *mut u8,
    pub nAllocLen: u32,
    pub nFilledLen: u32,
    pub nOffset: u32,
    pub pAppPrivate: Ptr,
    pub pPlatformPrivate: Ptr,
    pub pInputPortPrivate: Ptr,
    pub pOutputPortPrivate: Ptr,
    pub hMarkTargetComponent: Handle,
    pub pMarkData: Ptr,
    pub nTickCount: u32,
    pub nTimeStamp: i64,
    pub nFlags: u32,
    pub nOutputPortIndex: u32,
    pub nInputPortIndex: u32,
}

impl Default for BufferHeader {
    fn default() -> Self {
        // Safety: all fields are integers or raw pointers, for which all-zero is valid.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct AudioPortDefinition {
    pub cMIMEType: *mut c_char,
    pub pNativeRender: Ptr,
    pub bFlagErrorConcealment: Bool,
    pub eEncoding: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct VideoPortDefinition {
    pub cMIMEType: *mut c_char,
    pub pNativeRender: Ptr,
    pub nFrameWidth: u32,
    pub nFrameHeight: u32,
    pub nStride: i32,
    pub nSliceHeight: u32,
    pub nBitrate: u32,
    pub xFramerate: u32,
    pub bFlagErrorConcealment: Bool,
    pub eCompressionFormat: u32,
    pub eColorFormat: u32,
    pub pNativeWindow: Ptr,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct ImagePortDefinition {
    pub cMIMEType: *mut c_char,
    pub pNativeRender: Ptr,
    pub nFrameWidth: u32,
    pub nFrameHeight: u32,
    pub nStride: i32,
    pub nSliceHeight: u32,
    pub bFlagErrorConcealment: Bool,
    pub eCompressionFormat: u32,
    pub eColorFormat: u32,
    pub pNativeWindow: Ptr,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct OtherPortDefinition {
    pub eFormat: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union PortDefinitionFormat {
    pub audio: AudioPortDefinition,
    pub video: VideoPortDefinition,
    pub image: ImagePortDefinition,
    pub other: OtherPortDefinition,
}

/// `OMX_PARAM_PORTDEFINITIONTYPE`, read and written through
/// [`OMX_IndexParamPortDefinition`].
#[repr(C)]
#[derive(Copy, Clone)]
pub struct ParamPortDefinition {
    pub nSize: u32,
    pub nVersion: VersionType,
    pub nPortIndex: u32,
    pub eDir: DirType,
    pub nBufferCountActual: u32,
    pub nBufferCountMin: u32,
    pub nBufferSize: u32,
    pub bEnabled: Bool,
    pub bPopulated: Bool,
    pub eDomain: PortDomainType,
    pub format: PortDefinitionFormat,
    pub bBuffersContiguous: Bool,
    pub nBufferAlignment: u32,
}

impl Default for ParamPortDefinition {
    fn default() -> Self {
        // Safety: every variant of the format union is plain old data.
        unsafe { std::mem::zeroed() }
    }
}

impl std::fmt::Debug for ParamPortDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamPortDefinition")
            .field("nPortIndex", &self.nPortIndex)
            .field("eDir", &self.eDir)
            .field("nBufferCountActual", &self.nBufferCountActual)
            .field("nBufferCountMin", &self.nBufferCountMin)
            .field("nBufferSize", &self.nBufferSize)
            .field("bEnabled", &self.bEnabled)
            .field("bPopulated", &self.bPopulated)
            .field("eDomain", &self.eDomain)
            .finish_non_exhaustive()
    }
}

/// `OMX_PARAM_COMPONENTROLETYPE`.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct ParamComponentRole {
    pub nSize: u32,
    pub nVersion: VersionType,
    pub cRole: [u8; OMX_MAX_STRINGNAME_SIZE],
}

impl Default for ParamComponentRole {
    fn default() -> Self {
        Self {
            nSize: 0,
            nVersion: VersionType::default(),
            cRole: [0; OMX_MAX_STRINGNAME_SIZE],
        }
    }
}

pub type EventHandlerFn = unsafe extern "C" fn(
    hComponent: Handle,
    pAppData: Ptr,
    eEvent: EventType,
    nData1: u32,
    nData2: u32,
    pEventData: Ptr,
) -> ErrorType;

pub type BufferDoneFn =
    unsafe extern "C" fn(hComponent: Handle, pAppData: Ptr, pBuffer: *mut BufferHeader) -> ErrorType;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct CallbackType {
    pub EventHandler: Option<EventHandlerFn>,
    pub EmptyBufferDone: Option<BufferDoneFn>,
    pub FillBufferDone: Option<BufferDoneFn>,
}

/// `OMX_COMPONENTTYPE`, the per-instance function table handed out by
/// `OMX_GetHandle`.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct ComponentType {
    pub nSize: u32,
    pub nVersion: VersionType,
    pub pComponentPrivate: Ptr,
    pub pApplicationPrivate: Ptr,
    pub GetComponentVersion: Option<
        unsafe extern "C" fn(
            hComponent: Handle,
            pComponentName: *mut c_char,
            pComponentVersion: *mut VersionType,
            pSpecVersion: *mut VersionType,
            pComponentUUID: *mut [u8; 128],
        ) -> ErrorType,
    >,
    pub SendCommand: Option<
        unsafe extern "C" fn(
            hComponent: Handle,
            Cmd: CommandType,
            nParam1: u32,
            pCmdData: Ptr,
        ) -> ErrorType,
    >,
    pub GetParameter: Option<
        unsafe extern "C" fn(hComponent: Handle, nParamIndex: IndexType, pParam: Ptr) -> ErrorType,
    >,
    pub SetParameter: Option<
        unsafe extern "C" fn(hComponent: Handle, nIndex: IndexType, pParam: Ptr) -> ErrorType,
    >,
    pub GetConfig: Option<
        unsafe extern "C" fn(hComponent: Handle, nIndex: IndexType, pConfig: Ptr) -> ErrorType,
    >,
    pub SetConfig: Option<
        unsafe extern "C" fn(hComponent: Handle, nIndex: IndexType, pConfig: Ptr) -> ErrorType,
    >,
    pub GetExtensionIndex: Option<
        unsafe extern "C" fn(
            hComponent: Handle,
            cParameterName: *mut c_char,
            pIndexType: *mut IndexType,
        ) -> ErrorType,
    >,
    pub GetState:
        Option<unsafe extern "C" fn(hComponent: Handle, pState: *mut StateType) -> ErrorType>,
    pub ComponentTunnelRequest: Option<
        unsafe extern "C" fn(
            hComp: Handle,
            nPort: u32,
            hTunneledComp: Handle,
            nTunneledPort: u32,
            pTunnelSetup: Ptr,
        ) -> ErrorType,
    >,
    pub UseBuffer: Option<
        unsafe extern "C" fn(
            hComponent: Handle,
            ppBufferHdr: *mut *mut BufferHeader,
            nPortIndex: u32,
            pAppPrivate: Ptr,
            nSizeBytes: u32,
            pBuffer: *mut u8,
        ) -> ErrorType,
    >,
    pub AllocateBuffer: Option<
        unsafe extern "C" fn(
            hComponent: Handle,
            ppBuffer: *mut *mut BufferHeader,
            nPortIndex: u32,
            pAppPrivate: Ptr,
            nSizeBytes: u32,
        ) -> ErrorType,
    >,
    pub FreeBuffer: Option<
        unsafe extern "C" fn(
            hComponent: Handle,
            nPortIndex: u32,
            pBuffer: *mut BufferHeader,
        ) -> ErrorType,
    >,
    pub EmptyThisBuffer:
        Option<unsafe extern "C" fn(hComponent: Handle, pBuffer: *mut BufferHeader) -> ErrorType>,
    pub FillThisBuffer:
        Option<unsafe extern "C" fn(hComponent: Handle, pBuffer: *mut BufferHeader) -> ErrorType>,
    pub SetCallbacks: Option<
        unsafe extern "C" fn(
            hComponent: Handle,
            pCallbacks: *mut CallbackType,
            pAppData: Ptr,
        ) -> ErrorType,
    >,
    pub ComponentDeInit: Option<unsafe extern "C" fn(hComponent: Handle) -> ErrorType>,
    pub UseEGLImage: Option<
        unsafe extern "C" fn(
            hComponent: Handle,
            ppBufferHdr: *mut *mut BufferHeader,
            nPortIndex: u32,
            pAppPrivate: Ptr,
            eglImage: Ptr,
        ) -> ErrorType,
    >,
    pub ComponentRoleEnum: Option<
        unsafe extern "C" fn(hComponent: Handle, cRole: *mut u8, nIndex: u32) -> ErrorType,
    >,
}

// Entry points exported by a codec core module.
pub type InitFn = unsafe extern "C" fn() -> ErrorType;
pub type DeinitFn = unsafe extern "C" fn() -> ErrorType;
pub type GetHandleFn = unsafe extern "C" fn(
    pHandle: *mut Handle,
    cComponentName: *mut c_char,
    pAppData: Ptr,
    pCallBacks: *mut CallbackType,
) -> ErrorType;
pub type FreeHandleFn = unsafe extern "C" fn(hComponent: Handle) -> ErrorType;

pub const OMX_INIT_SYMBOL: &[u8] = b"OMX_Init\0";
pub const OMX_DEINIT_SYMBOL: &[u8] = b"OMX_Deinit\0";
pub const OMX_GET_HANDLE_SYMBOL: &[u8] = b"OMX_GetHandle\0";
pub const OMX_FREE_HANDLE_SYMBOL: &[u8] = b"OMX_FreeHandle\0";
