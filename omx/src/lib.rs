// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! # OMX - codec component lifecycle
//!
//! Safe, idiomatic Rust driver for OpenMAX IL style hardware codec components,
//! turning their asynchronous command/callback interface into blocking calls
//! usable from pipeline threads.
//!
//! ## Overview
//!
//! A codec component is driven through synchronous commands, but it reports
//! completions and returned buffers later, from threads of its own. This crate
//! wraps the raw interface ([`omx_sys`]) so that:
//!
//! - callbacks only queue messages on an [`EventBridge`], and every operation
//!   applies them under the component lock before it looks at any state;
//! - each buffer is owned by exactly one side at a time, the pipeline or the
//!   codec core;
//! - format changes announced by the codec core are carried through without
//!   losing buffers or deadlocking the input side.
//!
//! ### Key Concepts
//!
//! - **Core**: a shared library hosting components, reference counted by the
//!   [`CoreRegistry`]
//! - **Component**: one codec instance and its state machine ([`Component`])
//! - **Port**: an input or output of a component with its buffer pool ([`Port`])
//! - **Buffer**: a lease on one buffer of a port ([`Buffer`])
//! - **Sticky error**: the first fatal error of a component; once set, every
//!   later operation fails with it
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ CoreRegistry │  (one entry per core library)
//! └──────┬───────┘
//!        │
//!        └─► Component ──► Port ──► Buffer ──► ExternalRef
//!                 ▲
//!                 └── EventBridge ◄── codec core callbacks
//! ```
//!
//! ## Examples
//!
//! ### Running a decoder
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use omx::{Acquired, Component, ComponentConfig, CoreRegistry, State};
//!
//! # fn main() -> Result<(), omx::Error> {
//! let config = ComponentConfig::new("/usr/lib/libOmxCore.so", "OMX.vendor.video.decoder.avc")
//!     .with_role("video_decoder.avc");
//! let component = Component::new(&CoreRegistry::global(), Arc::new("decoder"), &config)?;
//! let input = component.add_port(0)?;
//! let output = component.add_port(1)?;
//!
//! component.request_state(State::Idle)?;
//! input.allocate_buffers()?;
//! output.allocate_buffers()?;
//! component.await_state(Some(Duration::from_secs(5)))?;
//! component.request_state(State::Executing)?;
//! component.await_state(Some(Duration::from_secs(5)))?;
//! input.set_flushing(false)?;
//! output.set_flushing(false)?;
//!
//! // Feed one access unit
//! if let Acquired::Buffer(mut buffer) = input.acquire_buffer()? {
//!     let payload = [0u8; 16];
//!     buffer.data_mut()[..payload.len()].copy_from_slice(&payload);
//!     buffer.set_filled_len(payload.len() as u32);
//!     input.release_buffer(buffer)?;
//! }
//!
//! // Collect decoded output, following format changes
//! loop {
//!     match output.acquire_buffer()? {
//!         Acquired::Buffer(buffer) => {
//!             println!("Got {} bytes", buffer.filled_len());
//!             output.release_buffer(buffer)?;
//!         }
//!         Acquired::Reconfigure => output.reconfigure()?,
//!         Acquired::Reconfigured => continue,
//!         Acquired::Flushing => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - [`Component`] and [`Port`] are `Send + Sync` and cheap to clone
//! - [`Buffer`] is `Send`; a lease is used by one thread at a time
//! - All blocking calls release the component lock while they wait
//! - Bounded waits that miss their deadline make [`ErrorCode::TIMEOUT`] the
//!   sticky error; an unresponsive codec core is not trusted again

mod bridge;
mod buffer;
mod component;
mod error;
mod external;
mod hacks;
mod handle;
mod param;
mod port;
mod registry;
mod state;

pub mod config;

pub use bridge::EventBridge;
pub use buffer::Buffer;
pub use component::{Component, Parent};
pub use config::{ComponentConfig, Configuration, Timeouts};
pub use error::{Error, ErrorCode, OmxResult, Result};
pub use external::{ExternalAllocator, ExternalRef, NativeMemory};
pub use hacks::Hacks;
pub use handle::ComponentHandle;
pub use param::OmxParam;
pub use port::{Acquired, Port, PortStats};
pub use registry::{CoreApi, CoreLoader, CoreModule, CoreRegistry, DynamicCore, LibraryLoader};
pub use state::{Command, Direction, State};
