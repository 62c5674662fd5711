// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Common utilities shared across examples.

/// Initializes tracing subscriber for examples.
///
/// Logs at INFO level unless `RUST_LOG` asks for something else. Component
/// traces are emitted at DEBUG level, so use `RUST_LOG=omx=debug` to follow
/// commands and buffer movements.
pub fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}
