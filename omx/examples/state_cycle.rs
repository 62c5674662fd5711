// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Loads a codec component from a real core, allocates its buffers and walks
//! it through Loaded → Idle → Loaded.
//!
//! ```bash
//! cargo run --example state_cycle -- \
//!     --core /usr/lib/libOmxCore.so \
//!     --component OMX.vendor.video.decoder.avc \
//!     --role video_decoder.avc
//!
//! # Or take the component from a configuration file
//! cargo run --example state_cycle -- --config omx.json --element avcdec
//! ```

mod common;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use omx::{Component, ComponentConfig, Configuration, CoreRegistry, Direction, State};
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Cycles a codec component through its basic states")]
struct Args {
    /// Path of the codec core library.
    #[arg(long, required_unless_present = "config")]
    core: Option<String>,

    /// Name of the component inside the core.
    #[arg(long, required_unless_present = "config")]
    component: Option<String>,

    /// Role to set on the component.
    #[arg(long)]
    role: Option<String>,

    /// Hack names, may be repeated.
    #[arg(long = "hack")]
    hacks: Vec<String>,

    /// JSON configuration file to read the component from.
    #[arg(long, requires = "element")]
    config: Option<String>,

    /// Element name inside the configuration file.
    #[arg(long)]
    element: Option<String>,

    /// Input and output port indices.
    #[arg(long, num_args = 2, default_values_t = [0, 1])]
    ports: Vec<u32>,
}

fn component_config(args: &Args) -> omx::Result<ComponentConfig> {
    if let (Some(path), Some(element)) = (&args.config, &args.element) {
        let configuration = Configuration::from_file(path)?;
        return configuration
            .element(element)
            .cloned()
            .ok_or_else(|| omx::Error::Config(format!("no element {element} in {path}")));
    }

    let (Some(core), Some(component)) = (&args.core, &args.component) else {
        return Err(omx::Error::Config("core and component are required".into()));
    };
    let mut config = ComponentConfig::new(core, component).with_hacks(args.hacks.as_slice());
    if let Some(role) = &args.role {
        config = config.with_role(role);
    }
    Ok(config)
}

fn main() -> omx::Result<()> {
    common::setup_logging();
    let args = Args::parse();
    let config = component_config(&args)?;
    let timeout = Some(config.timeouts.state_change());

    let registry = CoreRegistry::global();
    let component = Component::new(&registry, Arc::new("state-cycle"), &config)?;
    info!("Loaded {} in state {:?}", component.name(), component.state());

    let ports = args
        .ports
        .iter()
        .map(|index| component.add_port(*index))
        .collect::<omx::Result<Vec<_>>>()?;
    for port in &ports {
        let definition = port.definition()?;
        info!(
            "Port {} ({}): {} buffers of {} bytes",
            port.index(),
            match port.direction() {
                Direction::Input => "input",
                Direction::Output => "output",
            },
            definition.nBufferCountActual,
            definition.nBufferSize
        );
    }

    component.request_state(State::Idle)?;
    for port in &ports {
        port.allocate_buffers()?;
    }
    info!("Reached {:?}", component.await_state(timeout)?);

    for port in &ports {
        info!("Port {}: {:?}", port.index(), port.stats());
    }
    std::thread::sleep(Duration::from_millis(100));

    component.request_state(State::Loaded)?;
    for port in &ports {
        port.deallocate_buffers()?;
    }
    info!("Reached {:?}", component.await_state(timeout)?);

    if let Some(code) = component.last_error() {
        return Err(omx::Error::Fatal(code));
    }
    Ok(())
}
