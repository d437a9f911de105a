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

//! Durable cache of derived assets
//!
//! Layout of the cache directory:
//! - `index.txt`: version line followed by one entry per line
//! - one backing file per entry, named by the entry's decimal id
//! - `inprogress`: zero-byte marker present while a session is running
//!
//! A marker found at startup means the previous session never flushed, so
//! the whole directory is discarded.

pub mod entry;
pub mod index;
pub mod settings;

pub use entry::CacheEntry;
pub use index::{CacheIndex, INDEX_VERSION};
pub use settings::{CacheSettings, FixedChoice, OptInPrompt};

use crate::assets::DerivedImage;
use crate::error::Result;
use crate::task::SourceIdentity;
use ahash::{AHashSet, RandomState};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const INDEX_FILE_NAME: &str = "index.txt";
pub const PROGRESS_MARKER: &str = "inprogress";

/// Cache statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries invalidated because the source changed
    pub stale: u64,
    pub stored: u64,
    /// Entries dropped at flush because nothing used them
    pub pruned: u64,
    /// Backing files that failed validation
    pub corrupt: u64,
}

/// On-disk derived asset cache
pub struct DerivedAssetCache {
    dir: PathBuf,
    enabled: bool,
    index: CacheIndex,
    ids: AHashSet<u32>,
    random: RandomState,
    draws: u64,
    stats: CacheStats,
}

impl DerivedAssetCache {
    /// Open the cache at startup.
    ///
    /// When `enabled` is false nothing is read or written until `flush`,
    /// which then removes the directory.
    pub fn open(dir: impl Into<PathBuf>, enabled: bool) -> Result<Self> {
        let mut cache = Self::empty(dir.into(), enabled);
        if !enabled {
            return Ok(cache);
        }

        fs::create_dir_all(&cache.dir)?;

        if cache.marker_path().exists() {
            warn!(dir = %cache.dir.display(), "previous session did not finish, discarding cache");
            cache.wipe()?;
        } else {
            match CacheIndex::read(&cache.index_path()) {
                Ok(Some(index)) => cache.index = index,
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "cache index unusable, discarding cache");
                    cache.wipe()?;
                }
            }
        }

        cache.reconcile_files()?;
        fs::write(cache.marker_path(), b"")?;

        info!(
            dir = %cache.dir.display(),
            entries = cache.index.len(),
            "derived asset cache opened"
        );
        Ok(cache)
    }

    /// Cache that never reads or writes anything
    pub fn disabled(dir: impl Into<PathBuf>) -> Self {
        Self::empty(dir.into(), false)
    }

    fn empty(dir: PathBuf, enabled: bool) -> Self {
        Self {
            dir,
            enabled,
            index: CacheIndex::new(),
            ids: AHashSet::new(),
            random: RandomState::new(),
            draws: 0,
            stats: CacheStats::default(),
        }
    }

    fn wipe(&mut self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.dir)?;
        self.index = CacheIndex::new();
        self.ids.clear();
        Ok(())
    }

    /// Delete files no entry refers to and entries whose file is gone
    fn reconcile_files(&mut self) -> Result<()> {
        let mut present = AHashSet::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            if name == INDEX_FILE_NAME {
                continue;
            }

            let referenced = name
                .parse::<u32>()
                .ok()
                .filter(|id| self.index.iter().any(|e| e.id == *id));
            match referenced {
                Some(id) => {
                    present.insert(id);
                }
                None => {
                    debug!(file = %name, "removing orphan cache file");
                    let path = dir_entry.path();
                    if path.is_dir() {
                        fs::remove_dir_all(&path)?;
                    } else {
                        fs::remove_file(&path)?;
                    }
                }
            }
        }

        let missing = self.index.retain(|e| present.contains(&e.id));
        for entry in missing {
            debug!(key = %entry.key, id = entry.id, "cache entry lost its backing file");
        }
        self.ids = self.index.iter().map(|e| e.id).collect();
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE_NAME)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(PROGRESS_MARKER)
    }

    pub fn backing_path(&self, id: u32) -> PathBuf {
        self.dir.join(id.to_string())
    }

    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.index.get(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Find a usable entry for the key.
    ///
    /// An entry whose source identity differs is deleted together with its
    /// backing file.
    pub fn lookup(&mut self, key: &str, source_size: u64, source_timestamp: u64) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }

        let identity = SourceIdentity {
            size: source_size,
            timestamp: source_timestamp,
        };
        let Some(entry) = self.index.get(key) else {
            self.stats.misses += 1;
            return None;
        };

        if entry.matches(identity) {
            return Some(entry.clone());
        }

        debug!(
            key,
            id = entry.id,
            cached_timestamp = entry.source_timestamp,
            source_timestamp,
            "cache entry is stale"
        );
        self.remove_entry(key);
        self.stats.stale += 1;
        self.stats.misses += 1;
        None
    }

    /// Read the backing bytes of an entry
    pub fn read_backing(&self, entry: &CacheEntry) -> Result<Vec<u8>> {
        Ok(fs::read(self.backing_path(entry.id))?)
    }

    /// Rebuild the derived image from backing bytes.
    ///
    /// Returns `None` when the bytes do not fit the entry's metadata; the
    /// caller falls back to decoding the source.
    pub fn try_load(&mut self, entry: &CacheEntry, bytes: &[u8]) -> Option<DerivedImage> {
        if bytes.len() as u64 != entry.byte_len {
            warn!(
                key = %entry.key,
                id = entry.id,
                expected = entry.byte_len,
                actual = bytes.len(),
                "cached file has the wrong length"
            );
            self.stats.corrupt += 1;
            return None;
        }

        let image = DerivedImage {
            width: entry.width,
            height: entry.height,
            mip_count: entry.mip_count,
            flags: entry.flags,
            data: bytes.to_vec(),
        };
        if !image.is_consistent() {
            warn!(key = %entry.key, id = entry.id, "cached image metadata is invalid");
            self.stats.corrupt += 1;
            return None;
        }

        match self.index.get_mut(&entry.key) {
            Some(live) if live.id == entry.id => live.loaded = true,
            _ => {
                debug!(key = %entry.key, "cache entry changed since lookup");
                return None;
            }
        }
        self.stats.hits += 1;
        Some(image)
    }

    /// Persist a derived image, replacing any previous entry for the key
    pub fn store(
        &mut self,
        key: &str,
        image: &DerivedImage,
        source_size: u64,
        source_timestamp: u64,
    ) -> Result<Option<CacheEntry>> {
        if !self.enabled {
            return Ok(None);
        }
        if !CacheEntry::is_storable_key(key) {
            debug!(key, "key cannot be stored in the cache index");
            return Ok(None);
        }
        if !image.is_consistent() {
            debug!(key, width = image.width, height = image.height, "derived image is not reloadable, not caching");
            return Ok(None);
        }

        self.remove_entry(key);

        let id = self.fresh_id();
        fs::write(self.backing_path(id), &image.data)?;

        let entry = CacheEntry {
            key: key.to_string(),
            id,
            source_size,
            source_timestamp,
            width: image.width,
            height: image.height,
            mip_count: image.mip_count,
            flags: image.flags,
            byte_len: image.data.len() as u64,
            loaded: true,
        };
        self.ids.insert(id);
        self.index.insert(entry.clone());
        self.stats.stored += 1;
        debug!(key, id, bytes = entry.byte_len, "stored derived asset");
        Ok(Some(entry))
    }

    /// Finish the session.
    ///
    /// Unused entries are pruned, the index is rewritten and the progress
    /// marker removed last. A disabled cache deletes its directory.
    pub fn flush(&mut self) -> Result<()> {
        if !self.enabled {
            return match fs::remove_dir_all(&self.dir) {
                Ok(()) => {
                    info!(dir = %self.dir.display(), "caching disabled, removed cache directory");
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        let unused = self.index.retain(|e| e.loaded);
        for entry in &unused {
            self.ids.remove(&entry.id);
            remove_if_present(&self.backing_path(entry.id))?;
        }
        self.stats.pruned += unused.len() as u64;

        self.index.write_atomic(&self.index_path())?;
        remove_if_present(&self.marker_path())?;

        info!(
            entries = self.index.len(),
            pruned = unused.len(),
            hits = self.stats.hits,
            stored = self.stats.stored,
            "derived asset cache flushed"
        );
        Ok(())
    }

    fn remove_entry(&mut self, key: &str) {
        if let Some(old) = self.index.remove(key) {
            self.ids.remove(&old.id);
            if let Err(e) = remove_if_present(&self.backing_path(old.id)) {
                warn!(key, id = old.id, error = %e, "failed to delete cache file");
            }
        }
    }

    fn fresh_id(&mut self) -> u32 {
        loop {
            self.draws += 1;
            let id = self.random.hash_one(self.draws) as u32;
            if !self.ids.contains(&id) {
                return id;
            }
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
