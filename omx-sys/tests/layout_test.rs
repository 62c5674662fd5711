// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Layout smoke tests for the hand-kept declarations.

use std::mem::size_of;

#[test]
fn version_stamp_is_four_bytes() {
    let version = omx_sys::VersionType::current();
    assert_eq!(size_of::<omx_sys::VersionType>(), 4);
    assert_eq!(version.nVersionMajor, 1);
    assert_eq!(version.nVersionMinor, 1);
    assert_eq!(version.nRevision, 2);
}

#[test]
fn zeroed_records_are_usable_defaults() {
    let header = omx_sys::BufferHeader::default();
    assert!(header.pBuffer.is_null());
    assert!(header.pAppPrivate.is_null());
    assert_eq!(header.nFlags, 0);

    let def = omx_sys::ParamPortDefinition {
        nPortIndex: 1,
        eDir: omx_sys::OMX_DirOutput,
        ..Default::default()
    };
    assert_eq!(def.bEnabled, omx_sys::OMX_FALSE);
    println!("port definition: {:?}", def);
}

#[test]
fn error_ranges_are_ordered() {
    assert!(omx_sys::OMX_ErrorTunnelingUnsupported < omx_sys::OMX_ErrorKhronosExtensions);
    assert!(omx_sys::OMX_ErrorKhronosExtensions < omx_sys::OMX_ErrorVendorStartUnused);
}
