// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Component configuration.
//!
//! A configuration file maps element names to the codec core module, the
//! component inside it, its role, the compatibility hacks it needs and the
//! deadlines applied while waiting on it. The file is JSON:
//!
//! ```json
//! {
//!   "omxh264dec": {
//!     "core-name": "/usr/lib/libOmxCore.so",
//!     "component-name": "OMX.qcom.video.decoder.avc",
//!     "component-role": "video_decoder.avc",
//!     "rank": 256,
//!     "hacks": ["no-component-reconfigure"]
//!   }
//! }
//! ```

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Hacks, Result};

/// Environment variable naming a directory that holds [`CONFIG_FILE_NAME`].
pub const CONFIG_DIR_ENV: &str = "OMX_CONFIG_DIR";

/// File name looked up in each configuration directory.
pub const CONFIG_FILE_NAME: &str = "omx.json";

/// Deadlines for the bounded waits of a component, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Timeouts {
    pub state_change_ms: u64,
    pub flush_ms: u64,
    pub port_transition_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            state_change_ms: 5_000,
            flush_ms: 5_000,
            port_transition_ms: 5_000,
        }
    }
}

impl Timeouts {
    /// Uses the same deadline for every wait.
    pub fn uniform(timeout: Duration) -> Self {
        let ms = timeout.as_millis() as u64;
        Self {
            state_change_ms: ms,
            flush_ms: ms,
            port_transition_ms: ms,
        }
    }

    pub fn state_change(&self) -> Duration {
        Duration::from_millis(self.state_change_ms)
    }

    pub fn flush(&self) -> Duration {
        Duration::from_millis(self.flush_ms)
    }

    pub fn port_transition(&self) -> Duration {
        Duration::from_millis(self.port_transition_ms)
    }
}

/// Everything needed to instantiate one codec component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ComponentConfig {
    /// Path of the codec core module.
    pub core_name: PathBuf,
    pub component_name: String,
    #[serde(default)]
    pub component_role: Option<String>,
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub hacks: Vec<String>,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl ComponentConfig {
    pub fn new(core_name: impl Into<PathBuf>, component_name: impl Into<String>) -> Self {
        Self {
            core_name: core_name.into(),
            component_name: component_name.into(),
            component_role: None,
            rank: 0,
            hacks: Vec::new(),
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.component_role = Some(role.into());
        self
    }

    pub fn with_hacks<S: AsRef<str>>(mut self, hacks: &[S]) -> Self {
        self.hacks = hacks.iter().map(|hack| hack.as_ref().to_string()).collect();
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Parses the configured hack names.
    pub fn parsed_hacks(&self) -> Hacks {
        Hacks::parse(&self.hacks)
    }
}

/// A set of named component configurations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    elements: BTreeMap<String, ComponentConfig>,
}

impl Configuration {
    /// Parses a configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the document is malformed, and
    /// [`Error::Config`] if an entry has an empty core or component name.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        for (name, element) in &config.elements {
            if element.core_name.as_os_str().is_empty() || element.component_name.is_empty() {
                return Err(Error::Config(format!(
                    "element \"{name}\" needs a core name and a component name"
                )));
            }
        }
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Reading configuration from {}", path.display());
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Loads the first configuration file found in [`Configuration::search_paths`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if none of the search paths holds a file.
    pub fn load_default() -> Result<Self> {
        let paths = Self::search_paths();
        match paths.iter().find(|path| path.is_file()) {
            Some(path) => Self::from_file(path),
            None => Err(Error::Config(format!(
                "no {CONFIG_FILE_NAME} found in {:?}",
                paths
            ))),
        }
    }

    /// Returns the candidate configuration files, most specific first.
    ///
    /// `$OMX_CONFIG_DIR` wins over the user configuration directory
    /// (`$XDG_CONFIG_HOME/omx` or `$HOME/.config/omx`).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            dirs.push(PathBuf::from(dir));
        }
        if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
            dirs.push(PathBuf::from(dir).join("omx"));
        } else if let Some(home) = std::env::var_os("HOME") {
            dirs.push(PathBuf::from(home).join(".config").join("omx"));
        }
        dirs.into_iter().map(|dir| dir.join(CONFIG_FILE_NAME)).collect()
    }

    pub fn element(&self, name: &str) -> Option<&ComponentConfig> {
        self.elements.get(name)
    }

    pub fn elements(&self) -> impl Iterator<Item = (&str, &ComponentConfig)> {
        self.elements
            .iter()
            .map(|(name, element)| (name.as_str(), element))
    }

    pub fn insert(&mut self, name: impl Into<String>, element: ComponentConfig) {
        self.elements.insert(name.into(), element);
    }
}
