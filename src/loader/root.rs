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

use crate::cache::{CacheSettings, DerivedAssetCache, OptInPrompt};
use crate::config::LoaderConfig;
use crate::launcher::{AsyncOperation, BoundedConcurrentLauncher, OperationOutcome};
use crate::loader::apply::ApplyTaskUnit;
use crate::loader::audio::ThreadedDecodeOperation;
use crate::loader::{LoadProgress, Shared};
use crate::pool::BufferPool;
use crate::prefetch::{PrefetchOptions, PrefetchPipeline};
use crate::scheduler::{ResumeContext, Step, WorkUnit};
use crate::task::{AssetItem, AssetKind, RawAssetTask, TaskOutcome, TaskState};
use crate::time::{FrameBudget, Throttle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::task::Poll;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    OptIn,
    OpenCache,
    Scan,
    Prefetch,
    Audio,
    Flush,
    Done,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::OptIn => "opt-in",
            Phase::OpenCache => "open-cache",
            Phase::Scan => "scan",
            Phase::Prefetch => "prefetch",
            Phase::Audio => "audio",
            Phase::Flush => "flush",
            Phase::Done => "done",
        }
    }
}

/// Top-level unit of a load session.
///
/// Per-item units are nested directly under it, so a failing item unwinds
/// straight back here and the next item is picked up.
pub(crate) struct RootUnit {
    phase: Phase,
    config: LoaderConfig,
    prompt: Box<dyn OptInPrompt>,
    settings: Option<CacheSettings>,
    shared: Shared,
    pool: BufferPool,
    streamed: Vec<RawAssetTask>,
    audio: Vec<AssetItem>,
    pipeline: Option<PrefetchPipeline>,
    total: usize,
    current: Option<String>,
    /// An item unit just finished; pause once so the budget is checked
    item_finished: bool,
    throttle: Throttle,
}

impl RootUnit {
    pub fn new(
        config: LoaderConfig,
        prompt: Box<dyn OptInPrompt>,
        shared: Shared,
        pool: BufferPool,
        budget: &FrameBudget,
    ) -> Self {
        Self {
            phase: Phase::OptIn,
            config,
            prompt,
            settings: None,
            shared,
            pool,
            streamed: Vec::new(),
            audio: Vec::new(),
            pipeline: None,
            total: 0,
            current: None,
            item_finished: false,
            throttle: Throttle::new(budget.quantum(), budget.clock()),
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = self.phase.name(), to = phase.name(), "load phase");
        self.phase = phase;
        self.publish(true);
    }

    fn publish(&mut self, force: bool) {
        if !self.throttle.ready() && !force {
            return;
        }
        let buffered_bytes = self
            .pipeline
            .as_ref()
            .map_or(0, |p| p.buffer().snapshot().bytes);
        let mut shared = self.shared.borrow_mut();
        let processed = shared.report.outcomes.len();
        let fraction = if self.total == 0 {
            if self.phase == Phase::Done {
                1.0
            } else {
                0.0
            }
        } else {
            processed as f32 / self.total as f32
        };
        shared.progress = LoadProgress {
            fraction,
            label: self.phase.name().to_string(),
            buffered_bytes,
            processed,
            total: self.total,
        };
    }

    fn opt_in(&mut self, cx: &mut ResumeContext) -> Step {
        let path = &self.config.settings_path;
        let settings = *self.settings.get_or_insert_with(|| {
            CacheSettings::load(path).unwrap_or_else(|e| {
                warn!(error = %e, "ignoring unreadable loader settings");
                CacheSettings::default()
            })
        });

        if !settings.choice_made {
            let Some(enabled) = self.prompt.poll_choice() else {
                cx.request_frame_skip();
                return Step::Continue;
            };
            let chosen = CacheSettings::chosen(enabled);
            if let Err(e) = chosen.save(path) {
                warn!(error = %e, "failed to save loader settings");
            }
            info!(caching_enabled = enabled, "cache choice recorded");
            self.settings = Some(chosen);
        }

        self.enter(Phase::OpenCache);
        Step::Continue
    }

    fn open_cache(&mut self) -> Step {
        let enabled = self.settings.is_some_and(|s| s.caching_enabled);
        let cache = match DerivedAssetCache::open(&self.config.cache_dir, enabled) {
            Ok(cache) => Some(Arc::new(Mutex::new(cache))),
            Err(e) => {
                warn!(error = %e, dir = %self.config.cache_dir.display(), "continuing without derived asset cache");
                None
            }
        };

        {
            let mut shared = self.shared.borrow_mut();
            shared.caching_enabled = enabled && cache.is_some();
            shared.cache = cache;
        }
        self.enter(Phase::Scan);
        Step::Continue
    }

    fn scan(&mut self) -> Step {
        let registry = self.shared.borrow().registry.clone();
        let items = registry.borrow().items();
        self.total = items.len();

        let decoders = self.shared.borrow().decoders.clone();
        let mut missing = Vec::new();
        for item in items {
            if !decoders.contains(item.kind) {
                missing.push(item);
            } else if item.kind.is_streamed() {
                self.streamed.push(RawAssetTask::new(item));
            } else {
                self.audio.push(item);
            }
        }

        {
            let mut shared = self.shared.borrow_mut();
            for item in missing {
                warn!(key = %item.key, kind = item.kind.name(), "no decoder registered");
                let mut task = RawAssetTask::new(item);
                task.fail(&format!("No decoder registered for {}", task.kind.name()));
                shared.record(task.outcome(false));
            }
        }

        info!(
            total = self.total,
            streamed = self.streamed.len(),
            audio = self.audio.len(),
            "scanned registry"
        );

        let (cache, cacheable) = {
            let shared = self.shared.borrow();
            let cacheable = if shared.caching_enabled {
                decoders.cacheable_kinds()
            } else {
                Vec::new()
            };
            (shared.cache.clone(), cacheable)
        };
        let options = PrefetchOptions::from_config(&self.config, cacheable);
        let tasks = std::mem::take(&mut self.streamed);
        match PrefetchPipeline::start(tasks, options, self.pool.clone(), cache) {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(e) => return Step::Failed(e),
        }

        self.enter(Phase::Prefetch);
        Step::Continue
    }

    fn prefetch(&mut self) -> Step {
        // cache hits and duplicates finish without pausing
        if std::mem::take(&mut self.item_finished) {
            return Step::Continue;
        }

        let Some(pipeline) = self.pipeline.as_mut() else {
            self.enter(Phase::Audio);
            return Step::Continue;
        };

        let polled = pipeline.next_task();
        let step = match polled {
            Poll::Pending => Step::Continue,
            Poll::Ready(Ok(Some(task))) => {
                self.current = Some(task.key.clone());
                self.item_finished = true;
                Step::Nested(Box::new(ApplyTaskUnit::new(
                    task,
                    self.shared.clone(),
                    self.pool.clone(),
                )))
            }
            Poll::Ready(Ok(None)) => {
                let bytes_read = pipeline.progress().bytes_read;
                self.shared.borrow_mut().report.bytes_read += bytes_read;
                self.pipeline = None;
                self.current = None;
                self.enter(Phase::Audio);
                Step::Continue
            }
            Poll::Ready(Err(e)) => Step::Failed(e),
        };
        self.publish(false);
        step
    }

    fn audio(&mut self) -> Step {
        self.enter(Phase::Flush);
        if self.audio.is_empty() {
            return Step::Continue;
        }

        let decoder = {
            let shared = self.shared.borrow();
            match shared.decoders.get(AssetKind::Audio) {
                Some(registered) => registered.decoder.clone(),
                None => return Step::Continue,
            }
        };

        let operations: Vec<Box<dyn AsyncOperation>> = std::mem::take(&mut self.audio)
            .into_iter()
            .map(|item| {
                Box::new(ThreadedDecodeOperation::new(
                    item,
                    decoder.clone(),
                    self.shared.clone(),
                )) as Box<dyn AsyncOperation>
            })
            .collect();

        let shared = self.shared.clone();
        let launcher = BoundedConcurrentLauncher::new(operations, self.config.max_concurrent_audio)
            .with_label("audio")
            .on_complete(move |key, outcome| {
                let (state, message) = match outcome {
                    OperationOutcome::Completed => (TaskState::Loaded, None),
                    OperationOutcome::Duplicate => (
                        TaskState::Warning,
                        Some(format!("Duplicate key '{key}' ignored")),
                    ),
                    OperationOutcome::Failed(e) => (TaskState::Failed, Some(e.to_string())),
                };
                shared.borrow_mut().record(TaskOutcome {
                    key: key.to_string(),
                    kind: AssetKind::Audio,
                    state,
                    message,
                    from_cache: false,
                });
            });

        Step::Nested(Box::new(launcher))
    }

    fn flush(&mut self) -> Step {
        let cache = self.shared.borrow().cache.clone();
        if let Some(cache) = cache {
            if let Err(e) = cache.lock().flush() {
                warn!(error = %e, "failed to flush derived asset cache");
            }
        }

        {
            let shared = self.shared.borrow();
            let report = &shared.report;
            info!(
                loaded = report.loaded_count(),
                warnings = report.warning_count(),
                failed = report.failed_count(),
                cache_hits = report.cache_hits,
                cache_stores = report.cache_stores,
                bytes_read = report.bytes_read,
                "loading finished"
            );
        }

        self.enter(Phase::Done);
        Step::Done
    }
}

impl WorkUnit for RootUnit {
    fn label(&self) -> &str {
        self.phase.name()
    }

    fn resume(&mut self, cx: &mut ResumeContext) -> Step {
        match self.phase {
            Phase::OptIn => self.opt_in(cx),
            Phase::OpenCache => self.open_cache(),
            Phase::Scan => self.scan(),
            Phase::Prefetch => self.prefetch(),
            Phase::Audio => self.audio(),
            Phase::Flush => self.flush(),
            Phase::Done => Step::Done,
        }
    }

    fn current_item(&self) -> Option<&str> {
        self.current.as_deref()
    }
}
