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

use crate::assets::{DecodeContext, Decoded};
use crate::error::LoaderError;
use crate::loader::Shared;
use crate::pool::BufferPool;
use crate::prefetch::read_into;
use crate::scheduler::{ResumeContext, Step, WorkUnit};
use crate::task::{RawAssetTask, TaskState};
use tracing::{debug, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Check,
    Decode,
    Commit,
}

/// Turns one prefetched task into an applied resource
pub(crate) struct ApplyTaskUnit {
    task: RawAssetTask,
    shared: Shared,
    pool: BufferPool,
    stage: Stage,
    decoded: Option<Decoded>,
    recorded: bool,
}

impl ApplyTaskUnit {
    pub fn new(task: RawAssetTask, shared: Shared, pool: BufferPool) -> Self {
        Self {
            task,
            shared,
            pool,
            stage: Stage::Check,
            decoded: None,
            recorded: false,
        }
    }

    fn finish(&mut self, from_cache: bool) -> Step {
        self.task.release_payload();
        if !self.recorded {
            self.recorded = true;
            self.shared.borrow_mut().record(self.task.outcome(from_cache));
        }
        Step::Done
    }

    fn apply(&mut self, decoded: Decoded) {
        let registry = self.shared.borrow().registry.clone();
        registry
            .borrow_mut()
            .apply(&self.task.key, self.task.kind, decoded.into_asset());
        self.shared.borrow_mut().seen.insert(self.task.key.clone());
        self.task.mark_loaded();
    }

    fn check(&mut self) -> Option<Step> {
        if self.shared.borrow().seen.contains(&self.task.key) {
            debug!(key = %self.task.key, "duplicate key dropped");
            let text = format!("Duplicate key '{}' ignored; first loaded copy kept", self.task.key);
            self.task.warn(&text);
            return Some(self.finish(false));
        }

        if self.task.state() == TaskState::Failed {
            return Some(self.finish(false));
        }

        let entry = self.task.cached.take()?;
        let cache = self.shared.borrow().cache.clone();
        let image = match cache {
            Some(cache) => {
                let mut cache = cache.lock();
                cache.try_load(&entry, self.task.bytes())
            }
            None => None,
        };
        match image {
            Some(image) => {
                trace!(key = %self.task.key, id = entry.id, "derived asset served from cache");
                self.apply(Decoded::Derived(image));
                Some(self.finish(true))
            }
            None => {
                // payload holds cached bytes; decoding needs the source.
                // Only reached when a cached file is corrupt, so the read
                // stays on the foreground.
                self.task.release_payload();
                match read_into(&self.pool, self.task.kind, &self.task.source_path) {
                    Ok(payload) => {
                        self.shared.borrow_mut().report.bytes_read += payload.len() as u64;
                        self.task.set_payload(payload);
                        None
                    }
                    Err(e) => {
                        let text = format!("Failed to read '{}': {e}", self.task.source_path.display());
                        self.task.fail(&text);
                        Some(self.finish(false))
                    }
                }
            }
        }
    }

    fn decode(&mut self) -> Result<(), LoaderError> {
        let registered = self.shared.borrow().decoders.require(self.task.kind)?.clone();
        let decoded = registered.decoder.decode(DecodeContext {
            key: &self.task.key,
            path: &self.task.source_path,
            bytes: self.task.bytes(),
        })?;
        self.task.release_payload();
        self.decoded = Some(decoded);
        Ok(())
    }

    fn commit(&mut self) -> Step {
        let Some(decoded) = self.decoded.take() else {
            return Step::Failed(LoaderError::UnitFailed(format!(
                "'{}' reached commit without a decoded resource",
                self.task.key
            )));
        };

        let cacheable = {
            let shared = self.shared.borrow();
            shared.caching_enabled
                && shared
                    .decoders
                    .get(self.task.kind)
                    .is_some_and(|d| d.capabilities.cacheable)
        };
        if let (true, Some(image), Some(identity)) =
            (cacheable, decoded.as_derived(), self.task.identity())
        {
            let cache = self.shared.borrow().cache.clone();
            if let Some(cache) = cache {
                let stored = cache
                    .lock()
                    .store(&self.task.key, image, identity.size, identity.timestamp);
                match stored {
                    Ok(Some(_)) => self.shared.borrow_mut().report.cache_stores += 1,
                    Ok(None) => {}
                    Err(e) => warn!(key = %self.task.key, error = %e, "failed to store derived asset"),
                }
            }
        }

        self.apply(decoded);
        self.finish(false)
    }
}

impl WorkUnit for ApplyTaskUnit {
    fn label(&self) -> &str {
        "apply"
    }

    fn resume(&mut self, _cx: &mut ResumeContext) -> Step {
        match self.stage {
            Stage::Check => {
                if let Some(step) = self.check() {
                    return step;
                }
                self.stage = Stage::Decode;
                Step::Continue
            }
            Stage::Decode => match self.decode() {
                Ok(()) => {
                    self.stage = Stage::Commit;
                    Step::Continue
                }
                Err(e) => Step::Failed(e),
            },
            Stage::Commit => self.commit(),
        }
    }

    fn current_item(&self) -> Option<&str> {
        Some(&self.task.key)
    }

    fn abandoned(&mut self, error: &LoaderError) {
        self.task.fail(&error.to_string());
        self.finish(false);
    }
}
