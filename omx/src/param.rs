// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Parameter and configuration records passed through `get/setParameter` and
//! `get/setConfig`.

use omx_sys::VersionType;

/// A versioned record that may be handed to the codec core by pointer.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` and start with the `nSize: u32` and
/// `nVersion: VersionType` header fields, since the codec core reads and writes
/// through the raw pointer using that layout.
pub unsafe trait OmxParam: Default {
    /// Fills in `nSize` and `nVersion`.
    fn init_header(&mut self);

    /// Returns a zeroed record with its header filled in.
    fn new_initialized() -> Self {
        let mut param = Self::default();
        param.init_header();
        param
    }
}

macro_rules! omx_param {
    ($($ty:ty),* $(,)?) => {
        $(
            // Safety: declared `#[repr(C)]` in omx-sys with the standard header first.
            unsafe impl OmxParam for $ty {
                fn init_header(&mut self) {
                    self.nSize = std::mem::size_of::<Self>() as u32;
                    self.nVersion = VersionType::current();
                }
            }
        )*
    };
}

omx_param!(omx_sys::ParamPortDefinition, omx_sys::ParamComponentRole);

/// Builds a component role record, truncating the role to fit.
pub(crate) fn component_role(role: &str) -> omx_sys::ParamComponentRole {
    let mut param = omx_sys::ParamComponentRole::new_initialized();
    let bytes = role.as_bytes();
    let len = bytes.len().min(param.cRole.len() - 1);
    param.cRole[..len].copy_from_slice(&bytes[..len]);
    param
}
