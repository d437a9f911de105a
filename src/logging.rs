// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Subscriber setup for binaries and profiling runs
//!
//! The library only emits `tracing` events; these helpers install a
//! subscriber. Both honour `RUST_LOG` and fall back to `info`.

use crate::error::{LoaderError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Human readable output on stdout
pub fn init_stdout() -> Result<()> {
    let subscriber = Registry::default()
        .with(fmt::layer().with_target(false))
        .with(env_filter());
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoaderError::Config(format!("tracing subscriber already set: {e}")))
}

/// JSON lines written to `<dir>/loader.json` on a background writer.
///
/// Keep the returned guard alive; dropping it flushes pending lines.
pub fn init_file(dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::never(dir, "loader.json");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = Registry::default()
        .with(fmt::layer().json().with_writer(writer).with_ansi(false))
        .with(env_filter());
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoaderError::Config(format!("tracing subscriber already set: {e}")))?;
    Ok(guard)
}
