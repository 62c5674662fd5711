// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for codec core operations.
//!
//! Two layers are distinguished here: [`ErrorCode`] is the raw 32-bit status
//! reported by the codec core itself, while [`Error`] is what the safe API
//! returns and additionally covers module loading, sticky component failures
//! and Rust-level failures.

use std::{fmt, path::PathBuf};

use crate::State;

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Result of a single call into the codec core.
pub type OmxResult<T = ()> = core::result::Result<T, ErrorCode>;

/// Raw status code reported by a codec core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub omx_sys::ErrorType);

impl ErrorCode {
    pub const NONE: Self = Self(omx_sys::OMX_ErrorNone);
    pub const INSUFFICIENT_RESOURCES: Self = Self(omx_sys::OMX_ErrorInsufficientResources);
    pub const UNDEFINED: Self = Self(omx_sys::OMX_ErrorUndefined);
    pub const BAD_PARAMETER: Self = Self(omx_sys::OMX_ErrorBadParameter);
    pub const NOT_IMPLEMENTED: Self = Self(omx_sys::OMX_ErrorNotImplemented);
    pub const HARDWARE: Self = Self(omx_sys::OMX_ErrorHardware);
    pub const INVALID_STATE: Self = Self(omx_sys::OMX_ErrorInvalidState);
    pub const TIMEOUT: Self = Self(omx_sys::OMX_ErrorTimeout);
    pub const UNSUPPORTED_INDEX: Self = Self(omx_sys::OMX_ErrorUnsupportedIndex);
    pub const BAD_PORT_INDEX: Self = Self(omx_sys::OMX_ErrorBadPortIndex);

    /// Converts a raw status into a [`OmxResult`].
    ///
    /// # Examples
    ///
    /// ```
    /// use omx::ErrorCode;
    ///
    /// assert!(ErrorCode::check(omx_sys::OMX_ErrorNone).is_ok());
    /// assert_eq!(
    ///     ErrorCode::check(omx_sys::OMX_ErrorTimeout),
    ///     Err(ErrorCode::TIMEOUT)
    /// );
    /// ```
    pub fn check(status: omx_sys::ErrorType) -> OmxResult {
        if status == omx_sys::OMX_ErrorNone {
            Ok(())
        } else {
            Err(Self(status))
        }
    }

    pub fn raw(self) -> omx_sys::ErrorType {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == omx_sys::OMX_ErrorNone
    }

    /// Returns a human readable name of the status code.
    ///
    /// Codes in the Khronos extension range and the vendor range have no
    /// individual names and are reported by range.
    #[allow(non_upper_case_globals)]
    pub fn description(self) -> &'static str {
        use omx_sys::*;

        match self.0 {
            OMX_ErrorNone => "None",
            OMX_ErrorInsufficientResources => "Insufficient resources",
            OMX_ErrorUndefined => "Undefined",
            OMX_ErrorInvalidComponentName => "Invalid component name",
            OMX_ErrorComponentNotFound => "Component not found",
            OMX_ErrorInvalidComponent => "Invalid component",
            OMX_ErrorBadParameter => "Bad parameter",
            OMX_ErrorNotImplemented => "Not implemented",
            OMX_ErrorUnderflow => "Underflow",
            OMX_ErrorOverflow => "Overflow",
            OMX_ErrorHardware => "Hardware",
            OMX_ErrorInvalidState => "Invalid state",
            OMX_ErrorStreamCorrupt => "Stream corrupt",
            OMX_ErrorPortsNotCompatible => "Ports not compatible",
            OMX_ErrorResourcesLost => "Resources lost",
            OMX_ErrorNoMore => "No more",
            OMX_ErrorVersionMismatch => "Version mismatch",
            OMX_ErrorNotReady => "Not ready",
            OMX_ErrorTimeout => "Timeout",
            OMX_ErrorSameState => "Same state",
            OMX_ErrorResourcesPreempted => "Resources preempted",
            OMX_ErrorPortUnresponsiveDuringAllocation => "Port unresponsive during allocation",
            OMX_ErrorPortUnresponsiveDuringDeallocation => "Port unresponsive during deallocation",
            OMX_ErrorPortUnresponsiveDuringStop => "Port unresponsive during stop",
            OMX_ErrorIncorrectStateTransition => "Incorrect state transition",
            OMX_ErrorIncorrectStateOperation => "Incorrect state operation",
            OMX_ErrorUnsupportedSetting => "Unsupported setting",
            OMX_ErrorUnsupportedIndex => "Unsupported index",
            OMX_ErrorBadPortIndex => "Bad port index",
            OMX_ErrorPortUnpopulated => "Port unpopulated",
            OMX_ErrorComponentSuspended => "Component suspended",
            OMX_ErrorDynamicResourcesUnavailable => "Dynamic resources unavailable",
            OMX_ErrorMbErrorsInFrame => "Macroblock errors in frame",
            OMX_ErrorFormatNotDetected => "Format not detected",
            OMX_ErrorContentPipeOpenFailed => "Content pipe open failed",
            OMX_ErrorContentPipeCreationFailed => "Content pipe creation failed",
            OMX_ErrorSeperateTablesUsed => "Separate tables used",
            OMX_ErrorTunnelingUnsupported => "Tunneling unsupported",
            code if (OMX_ErrorKhronosExtensions..OMX_ErrorVendorStartUnused).contains(&code) => {
                "Khronos extension error"
            }
            code if code >= OMX_ErrorVendorStartUnused => "Vendor specific error",
            _ => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08x})", self.description(), self.0)
    }
}

/// Errors that can occur when driving a codec component.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The codec core module could not be opened or lacks a required entry point.
    #[error("Failed to load codec core \"{}\": {reason}", .path.display())]
    Load { path: PathBuf, reason: String },

    /// The codec core module refused to initialize.
    #[error("Failed to initialize codec core \"{}\": {code}", .path.display())]
    Init { path: PathBuf, code: ErrorCode },

    /// The operation is not allowed in the component's current state.
    #[error("Invalid state: {0:?}")]
    InvalidState(State),

    /// The component hit an unrecoverable error.
    ///
    /// The first such error is kept for the lifetime of the component and every
    /// later operation fails with it.
    #[error("Component in error state: {0}")]
    Fatal(ErrorCode),

    /// A single call into the codec core failed without affecting the component.
    #[error("Codec core call failed: {0}")]
    Omx(ErrorCode),

    #[error("Unknown port {0}")]
    UnknownPort(u32),

    #[error("Port {0} was added already")]
    DuplicatePort(u32),

    /// The buffer belongs to a pool that was deallocated in the meantime.
    #[error("Stale buffer")]
    StaleBuffer,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A generic error for Rust-level failures not directly mapped to status codes.
    #[error("Other error: {0}")]
    Other(String),

    /// Failed to convert a Rust string to a C-compatible null-terminated string.
    #[error("Null string: {0}")]
    NulString(#[from] std::ffi::NulError),
}

impl Error {
    /// Returns `true` if this is the sticky failure caused by an unresponsive component.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Fatal(ErrorCode::TIMEOUT))
    }

    /// Returns the status code behind this error, if there is one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Init { code, .. } | Error::Fatal(code) | Error::Omx(code) => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_codes_have_names() {
        assert_eq!(ErrorCode::NONE.description(), "None");
        assert_eq!(ErrorCode::TIMEOUT.description(), "Timeout");
        assert_eq!(
            ErrorCode(omx_sys::OMX_ErrorSeperateTablesUsed).description(),
            "Separate tables used"
        );
    }

    #[test]
    fn extension_ranges_are_reported_by_range() {
        assert_eq!(
            ErrorCode(omx_sys::OMX_ErrorKhronosExtensions + 5).description(),
            "Khronos extension error"
        );
        assert_eq!(
            ErrorCode(omx_sys::OMX_ErrorVendorStartUnused + 0x42).description(),
            "Vendor specific error"
        );
        assert_eq!(ErrorCode(0x1234).description(), "Unknown error");
    }

    #[test]
    fn display_includes_hex_code() {
        assert_eq!(ErrorCode::TIMEOUT.to_string(), "Timeout (0x80001011)");
        assert!(Error::Fatal(ErrorCode::TIMEOUT).is_timeout());
        assert!(!Error::Omx(ErrorCode::TIMEOUT).is_timeout());
    }
}
