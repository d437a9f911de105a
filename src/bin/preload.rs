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

//! Load every asset under a directory and print a summary.
//!
//! ```text
//! preload <asset-dir> [--config loader.json] [--cache on|off] [--log-dir logs]
//! ```

use archetype_loader::assets::{
    DecodeContext, Decoded, DecoderTable, DerivedImage, JsonDecoder, MemoryRegistry,
    RawBytesDecoder, SharedRegistry, TextDecoder,
};
use archetype_loader::cache::FixedChoice;
use archetype_loader::config::LoaderConfig;
use archetype_loader::error::{LoaderError, Result};
use archetype_loader::loader::{LoadSession, LoadStatus};
use archetype_loader::task::AssetKind;
use archetype_loader::{logging, AssetDecoder, ImageFlags};
use clap::{Parser, ValueEnum};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

/// Stand-in for a real image codec: keeps the bytes as a single-mip image
struct PassthroughImageDecoder;

impl AssetDecoder for PassthroughImageDecoder {
    fn decode(&self, context: DecodeContext<'_>) -> Result<Decoded> {
        if context.bytes.is_empty() {
            return Err(context.error("empty image"));
        }
        Ok(Decoded::Derived(DerivedImage {
            width: context.bytes.len() as u32,
            height: 1,
            mip_count: 1,
            flags: ImageFlags::READABLE,
            data: context.bytes.to_vec(),
        }))
    }

    fn cacheable(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CacheMode {
    On,
    Off,
}

#[derive(Parser)]
#[command(name = "preload", version, about = "Load every asset under a directory")]
struct Args {
    /// Directory holding the assets
    #[arg(value_name = "ASSET_DIR")]
    asset_dir: PathBuf,

    /// Loader configuration (JSON)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Answer to the derived asset cache prompt
    #[arg(long, value_enum, default_value = "on")]
    cache: CacheMode,

    /// Write JSON logs here instead of stdout
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn run() -> Result<()> {
    let args = Args::parse();
    let _guard = match &args.log_dir {
        Some(dir) => Some(logging::init_file(dir)?),
        None => {
            logging::init_stdout()?;
            None
        }
    };

    let config = match &args.config {
        Some(path) => LoaderConfig::from_json_file(path)?,
        None => LoaderConfig::default(),
    };

    let registry: SharedRegistry = Rc::new(RefCell::new(MemoryRegistry::scan_dir(&args.asset_dir)?));
    let decoders = DecoderTable::new()
        .with(AssetKind::Texture, PassthroughImageDecoder)
        .with(AssetKind::Model, RawBytesDecoder)
        .with(AssetKind::Audio, RawBytesDecoder)
        .with(AssetKind::Config, JsonDecoder)
        .with(AssetKind::Data, TextDecoder);

    let started = Instant::now();
    let mut session = LoadSession::new(
        registry,
        decoders,
        config,
        Box::new(FixedChoice::new(matches!(args.cache, CacheMode::On))),
    )?;

    let mut frames = 0u64;
    let report = loop {
        frames += 1;
        match session.update() {
            LoadStatus::InProgress(progress) => {
                if frames % 30 == 0 {
                    tracing::info!(
                        phase = %progress.label,
                        percent = (progress.fraction * 100.0) as u32,
                        buffered_bytes = progress.buffered_bytes,
                        "loading"
                    );
                }
            }
            LoadStatus::Complete(report) => break report,
            LoadStatus::Failed(fatal) => return Err(LoaderError::Fatal(fatal)),
        }
    };

    println!(
        "loaded {} ({} warnings, {} failed) in {:?} over {} frames",
        report.loaded_count(),
        report.warning_count(),
        report.failed_count(),
        started.elapsed(),
        frames
    );
    println!(
        "cache: {} hits, {} stores; {} bytes read",
        report.cache_hits, report.cache_stores, report.bytes_read
    );
    for failure in report.failures() {
        println!(
            "  failed {}: {}",
            failure.key,
            failure.message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("preload: {e}");
        std::process::exit(1);
    }
}
