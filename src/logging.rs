// ABOUTME: Logging configuration and structured logging setup for observability
// ABOUTME: Configures tracing subscriber with env-filter driven log levels
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

//! Tracing subscriber setup with environment-driven filtering

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging from the `RUST_LOG` environment variable.
///
/// Falls back to `info` for this crate when `RUST_LOG` is unset. Safe to call
/// once per process; subsequent calls are ignored.
pub fn init() {
    init_with_default("decoychat=info,warn");
}

/// Initialize logging with an explicit default filter directive.
pub fn init_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    // try_init so tests and embedders that install their own subscriber win
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
