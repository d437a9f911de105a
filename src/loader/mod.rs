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

//! Load sessions
//!
//! A [`LoadSession`] owns everything one loading run needs: the scheduler
//! with its root unit, the buffer pool, the opened cache and the report.
//! The host calls [`LoadSession::update`] once per frame until it reports
//! completion or failure.
//!
//! ```no_run
//! use archetype_loader::assets::{DecoderTable, JsonDecoder, MemoryRegistry, SharedRegistry};
//! use archetype_loader::cache::FixedChoice;
//! use archetype_loader::config::LoaderConfig;
//! use archetype_loader::loader::{LoadSession, LoadStatus};
//! use archetype_loader::task::AssetKind;
//! use std::cell::RefCell;
//! use std::path::Path;
//! use std::rc::Rc;
//!
//! let registry: SharedRegistry =
//!     Rc::new(RefCell::new(MemoryRegistry::scan_dir(Path::new("GameData")).unwrap()));
//! let decoders = DecoderTable::new().with(AssetKind::Config, JsonDecoder);
//! let mut session = LoadSession::new(
//!     registry,
//!     decoders,
//!     LoaderConfig::default(),
//!     Box::new(FixedChoice::new(true)),
//! )
//! .unwrap();
//!
//! loop {
//!     match session.update() {
//!         LoadStatus::InProgress(progress) => println!("{:.0}%", progress.fraction * 100.0),
//!         LoadStatus::Complete(report) => break println!("{} loaded", report.loaded_count()),
//!         LoadStatus::Failed(fatal) => break eprintln!("{fatal}"),
//!     }
//! }
//! ```

mod apply;
mod audio;
mod root;

pub use audio::ThreadedDecodeOperation;

use crate::assets::{DecoderTable, SharedRegistry};
use crate::cache::{CacheStats, DerivedAssetCache, OptInPrompt};
use crate::config::LoaderConfig;
use crate::error::{FatalError, LoaderError, Result};
use crate::pool::{BufferPool, PoolStats};
use crate::scheduler::{FrameBudgetScheduler, SchedulerStats, Tick};
use crate::task::{LoadReport, TaskOutcome};
use crate::time::FrameBudget;
use ahash::AHashSet;
use parking_lot::Mutex;
use root::RootUnit;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Progress published at most once per budget quantum
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadProgress {
    /// processed / total, 1.0 when there is nothing to load
    pub fraction: f32,
    /// Current phase
    pub label: String,
    pub buffered_bytes: usize,
    pub processed: usize,
    pub total: usize,
}

/// Result of one `update` call
#[derive(Clone, Debug)]
pub enum LoadStatus {
    InProgress(LoadProgress),
    Complete(LoadReport),
    Failed(FatalError),
}

/// Foreground state shared by the root and the units it nests
pub(crate) struct SessionShared {
    pub registry: SharedRegistry,
    pub decoders: Arc<DecoderTable>,
    pub report: LoadReport,
    /// Keys successfully loaded this session
    pub seen: AHashSet<String>,
    pub progress: LoadProgress,
    pub cache: Option<Arc<Mutex<DerivedAssetCache>>>,
    pub caching_enabled: bool,
}

impl SessionShared {
    pub fn record(&mut self, outcome: TaskOutcome) {
        self.report.record(outcome);
    }
}

pub(crate) type Shared = Rc<RefCell<SessionShared>>;

/// One asset loading run
pub struct LoadSession {
    scheduler: FrameBudgetScheduler,
    shared: Shared,
    pool: BufferPool,
}

impl LoadSession {
    pub fn new(
        registry: SharedRegistry,
        decoders: DecoderTable,
        config: LoaderConfig,
        prompt: Box<dyn OptInPrompt>,
    ) -> Result<Self> {
        let budget = config.frame_budget();
        Self::with_budget(registry, decoders, config, prompt, budget)
    }

    /// Same as `new` with an explicit budget, e.g. one driven by a manual clock
    pub fn with_budget(
        registry: SharedRegistry,
        decoders: DecoderTable,
        config: LoaderConfig,
        prompt: Box<dyn OptInPrompt>,
        budget: FrameBudget,
    ) -> Result<Self> {
        config.validate()?;

        let shared = Rc::new(RefCell::new(SessionShared {
            registry,
            decoders: Arc::new(decoders),
            report: LoadReport::new(),
            seen: AHashSet::new(),
            progress: LoadProgress {
                label: "starting".to_string(),
                ..LoadProgress::default()
            },
            cache: None,
            caching_enabled: false,
        }));
        let pool = BufferPool::new(config.max_buffers_per_class);
        let root = RootUnit::new(config, prompt, shared.clone(), pool.clone(), &budget);

        Ok(Self {
            scheduler: FrameBudgetScheduler::new(Box::new(root), budget),
            shared,
            pool,
        })
    }

    /// Run until the budget is spent, then report where loading stands
    pub fn update(&mut self) -> LoadStatus {
        match self.scheduler.run() {
            Tick::Yielded => LoadStatus::InProgress(self.shared.borrow().progress.clone()),
            Tick::Completed => LoadStatus::Complete(self.shared.borrow().report.clone()),
            Tick::Halted(fatal) => LoadStatus::Failed(fatal),
        }
    }

    /// Drive `update` until the session ends
    pub fn run_to_completion(&mut self) -> Result<LoadReport> {
        loop {
            match self.update() {
                LoadStatus::InProgress(_) => continue,
                LoadStatus::Complete(report) => return Ok(report),
                LoadStatus::Failed(fatal) => return Err(LoaderError::Fatal(fatal)),
            }
        }
    }

    pub fn progress(&self) -> LoadProgress {
        self.shared.borrow().progress.clone()
    }

    pub fn report(&self) -> LoadReport {
        self.shared.borrow().report.clone()
    }

    pub fn caching_enabled(&self) -> bool {
        self.shared.borrow().caching_enabled
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        let shared = self.shared.borrow();
        shared.cache.as_ref().map(|cache| cache.lock().stats().clone())
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn scheduler_stats(&self) -> &SchedulerStats {
        self.scheduler.stats()
    }
}
