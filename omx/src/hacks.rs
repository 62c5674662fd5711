// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Compatibility flags for codec cores that deviate from the standard.

use bitflags::bitflags;
use tracing::warn;

bitflags! {
    /// Behavioral workarounds, fixed when a component is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Hacks: u64 {
        /// The port of a settings-changed event arrives in the second event datum.
        const EVENT_PORT_SETTINGS_CHANGED_NDATA_PARAMETER_SWAP = 1 << 0;
        /// Settings-changed events for port 0 actually concern port 1.
        const EVENT_PORT_SETTINGS_CHANGED_PORT_0_TO_1 = 1 << 1;
        /// The frame rate must be an integer.
        const VIDEO_FRAMERATE_INTEGER = 1 << 2;
        /// The sync frame flag is never set on output buffers.
        const SYNCFRAME_FLAG_NOT_USED = 1 << 3;
        /// The component cannot be reconfigured and must be recreated instead.
        const NO_COMPONENT_RECONFIGURE = 1 << 4;
        /// End of stream must not be signalled with an empty buffer.
        const NO_EMPTY_EOS_BUFFER = 1 << 5;
        /// Draining may never complete.
        const DRAIN_MAY_NOT_RETURN = 1 << 6;
        /// The standard component role must not be set.
        const NO_COMPONENT_ROLE = 1 << 7;
        /// The core has to be loaded through the hybris loader.
        const HYBRIS = 1 << 8;
        /// Output ports use externally allocated native graphics memory.
        const ANDROID_BUFFERS = 1 << 9;
        /// Format changes happen without a settings-changed event.
        const IMPLICIT_FORMAT_CHANGE = 1 << 10;
    }
}

const NAMES: &[(&str, Hacks)] = &[
    (
        "event-port-settings-changed-ndata-parameter-swap",
        Hacks::EVENT_PORT_SETTINGS_CHANGED_NDATA_PARAMETER_SWAP,
    ),
    (
        "event-port-settings-changed-port-0-to-1",
        Hacks::EVENT_PORT_SETTINGS_CHANGED_PORT_0_TO_1,
    ),
    ("video-framerate-integer", Hacks::VIDEO_FRAMERATE_INTEGER),
    ("syncframe-flag-not-used", Hacks::SYNCFRAME_FLAG_NOT_USED),
    ("no-component-reconfigure", Hacks::NO_COMPONENT_RECONFIGURE),
    ("no-empty-eos-buffer", Hacks::NO_EMPTY_EOS_BUFFER),
    ("drain-may-not-return", Hacks::DRAIN_MAY_NOT_RETURN),
    ("no-component-role", Hacks::NO_COMPONENT_ROLE),
    ("hybris", Hacks::HYBRIS),
    ("android-native-buffers", Hacks::ANDROID_BUFFERS),
    ("implicit-format-change", Hacks::IMPLICIT_FORMAT_CHANGE),
];

impl Hacks {
    /// Parses hack names as they appear in the configuration.
    ///
    /// Unknown names are logged and ignored.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Self {
        names.iter().fold(Hacks::empty(), |hacks, name| {
            let name = name.as_ref();
            match Self::from_config_name(name) {
                Some(flag) => hacks | flag,
                None => {
                    warn!("Unknown hack: {}", name);
                    hacks
                }
            }
        })
    }

    /// Looks up a single hack by its configuration name.
    pub fn from_config_name(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, flag)| *flag)
    }

    /// Returns the configuration names of all set flags.
    pub fn names(self) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}
