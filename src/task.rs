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

//! Load items, per-item tasks and the final load report

use crate::cache::CacheEntry;
use crate::pool::PooledBuffer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Kind tag selecting which decoder handles an item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssetKind {
    Texture,
    Model,
    Audio,
    Config,
    Data,
}

impl AssetKind {
    pub const ALL: [AssetKind; 5] = [
        AssetKind::Texture,
        AssetKind::Model,
        AssetKind::Audio,
        AssetKind::Config,
        AssetKind::Data,
    ];

    /// Raw bytes are reparsed into another layout right away, so the
    /// buffer lifetime is short and predictable.
    pub fn pool_eligible(self) -> bool {
        matches!(self, AssetKind::Texture | AssetKind::Model)
    }

    /// Streamed through the prefetch pipeline rather than the launcher
    pub fn is_streamed(self) -> bool {
        !matches!(self, AssetKind::Audio)
    }

    /// Classify by file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "dds" | "tga" | "jpg" | "jpeg" | "mbm" | "truecolor" => Some(AssetKind::Texture),
            "mu" | "obj" | "gltf" | "glb" => Some(AssetKind::Model),
            "wav" | "ogg" | "mp3" | "flac" => Some(AssetKind::Audio),
            "cfg" | "json" | "toml" => Some(AssetKind::Config),
            "bin" | "dat" | "txt" => Some(AssetKind::Data),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AssetKind::Texture => "texture",
            AssetKind::Model => "model",
            AssetKind::Audio => "audio",
            AssetKind::Config => "config",
            AssetKind::Data => "data",
        }
    }
}

/// One logical item enumerated by the registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetItem {
    pub key: String,
    pub source_path: PathBuf,
    pub kind: AssetKind,
}

impl AssetItem {
    pub fn new(key: impl Into<String>, source_path: impl Into<PathBuf>, kind: AssetKind) -> Self {
        Self {
            key: key.into(),
            source_path: source_path.into(),
            kind,
        }
    }
}

/// Source file identity used to invalidate stale cache entries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceIdentity {
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl SourceIdentity {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let timestamp = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(Self {
            size: metadata.len(),
            timestamp,
        })
    }
}

/// Per-item load state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Pending,
    Loaded,
    Warning,
    Failed,
}

/// One item travelling through the pipeline
#[derive(Debug)]
pub struct RawAssetTask {
    pub key: String,
    pub source_path: PathBuf,
    pub kind: AssetKind,
    pub(crate) payload: Option<PooledBuffer>,
    pub(crate) identity: Option<SourceIdentity>,
    pub(crate) cached: Option<CacheEntry>,
    state: TaskState,
    message: Option<String>,
}

impl RawAssetTask {
    pub fn new(item: AssetItem) -> Self {
        Self {
            key: item.key,
            source_path: item.source_path,
            kind: item.kind,
            payload: None,
            identity: None,
            cached: None,
            state: TaskState::Pending,
            message: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Payload bytes, empty when nothing was read
    pub fn bytes(&self) -> &[u8] {
        self.payload.as_ref().map(|p| p.as_slice()).unwrap_or(&[])
    }

    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, |p| p.len())
    }

    pub fn identity(&self) -> Option<SourceIdentity> {
        self.identity
    }

    pub fn cached_entry(&self) -> Option<&CacheEntry> {
        self.cached.as_ref()
    }

    pub fn set_payload(&mut self, payload: PooledBuffer) {
        self.payload = Some(payload);
    }

    /// Drop the payload, returning a rented buffer to its pool
    pub fn release_payload(&mut self) {
        self.payload = None;
    }

    fn append_message(&mut self, text: &str) {
        match &mut self.message {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(text);
            }
            None => self.message = Some(text.to_string()),
        }
    }

    /// Record a warning; warnings accumulate
    pub fn warn(&mut self, text: &str) {
        self.append_message(text);
        if self.state != TaskState::Failed {
            self.state = TaskState::Warning;
        }
    }

    pub fn fail(&mut self, text: &str) {
        self.append_message(text);
        self.state = TaskState::Failed;
    }

    /// Loaded, unless a warning was already recorded
    pub fn mark_loaded(&mut self) {
        if self.state == TaskState::Pending {
            self.state = TaskState::Loaded;
        }
    }

    pub fn outcome(&self, from_cache: bool) -> TaskOutcome {
        TaskOutcome {
            key: self.key.clone(),
            kind: self.kind,
            state: self.state,
            message: self.message.clone(),
            from_cache,
        }
    }
}

/// Final state of one item
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskOutcome {
    pub key: String,
    pub kind: AssetKind,
    pub state: TaskState,
    pub message: Option<String>,
    pub from_cache: bool,
}

/// Summary of a whole load run
#[derive(Clone, Debug, Default)]
pub struct LoadReport {
    pub outcomes: Vec<TaskOutcome>,
    pub cache_hits: usize,
    pub cache_stores: usize,
    pub bytes_read: u64,
}

impl LoadReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: TaskOutcome) {
        if outcome.from_cache {
            self.cache_hits += 1;
        }
        self.outcomes.push(outcome);
    }

    fn count(&self, state: TaskState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn loaded_count(&self) -> usize {
        self.count(TaskState::Loaded)
    }

    pub fn warning_count(&self) -> usize {
        self.count(TaskState::Warning)
    }

    pub fn failed_count(&self) -> usize {
        self.count(TaskState::Failed)
    }

    /// All outcomes recorded for a key, in processing order
    pub fn outcomes_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a TaskOutcome> + 'a {
        self.outcomes.iter().filter(move |o| o.key == key)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.state == TaskState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> RawAssetTask {
        RawAssetTask::new(AssetItem::new("a.png", "a.png", AssetKind::Texture))
    }

    #[test]
    fn test_messages_accumulate() {
        let mut t = task();
        t.warn("first");
        t.warn("second");
        assert_eq!(t.state(), TaskState::Warning);
        assert_eq!(t.message(), Some("first\nsecond"));
    }

    #[test]
    fn test_warning_survives_load() {
        let mut t = task();
        t.warn("odd header");
        t.mark_loaded();
        assert_eq!(t.state(), TaskState::Warning);

        let mut clean = task();
        clean.mark_loaded();
        assert_eq!(clean.state(), TaskState::Loaded);
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut t = task();
        t.fail("unreadable");
        t.warn("later note");
        assert_eq!(t.state(), TaskState::Failed);
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(AssetKind::from_extension("PNG"), Some(AssetKind::Texture));
        assert_eq!(AssetKind::from_extension("ogg"), Some(AssetKind::Audio));
        assert_eq!(AssetKind::from_extension("exe"), None);
        assert!(AssetKind::Texture.pool_eligible());
        assert!(!AssetKind::Audio.pool_eligible());
        assert!(!AssetKind::Audio.is_streamed());
    }
}
