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

//! Background reader feeding the prefetch buffer

use crate::cache::DerivedAssetCache;
use crate::pool::{BufferPool, PooledBuffer};
use crate::prefetch::buffer::PrefetchBuffer;
use crate::task::{AssetKind, RawAssetTask, SourceIdentity};
use ahash::AHashSet;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Everything the reader thread owns
pub(crate) struct ReaderJob {
    pub tasks: Vec<RawAssetTask>,
    pub buffer: Arc<PrefetchBuffer>,
    pub pool: BufferPool,
    pub cache: Option<Arc<Mutex<DerivedAssetCache>>>,
    pub cacheable: Vec<AssetKind>,
    pub cancel: Arc<AtomicBool>,
    pub bytes_read: Arc<AtomicU64>,
}

impl ReaderJob {
    pub fn run(self) {
        let total = self.tasks.len();
        debug!(total, "prefetch reader started");

        let mut looked_up = AHashSet::new();
        for mut task in self.tasks.into_iter() {
            if self.cancel.load(Ordering::Acquire) {
                debug!("prefetch reader cancelled");
                return;
            }

            fill_task(
                &mut task,
                &self.pool,
                self.cache.as_deref(),
                &self.cacheable,
                &mut looked_up,
                &self.bytes_read,
            );

            if !self.buffer.push_blocking(task, &self.cancel) {
                debug!("prefetch reader cancelled while waiting for space");
                return;
            }
        }

        debug!(total, "prefetch reader finished");
    }
}

/// Capture identity, resolve the cache and read the payload.
///
/// Failures are recorded on the task; it is still delivered. Only the first
/// copy of a key consults the cache, so a later duplicate with another source
/// never invalidates the entry the first copy owns.
fn fill_task(
    task: &mut RawAssetTask,
    pool: &BufferPool,
    cache: Option<&Mutex<DerivedAssetCache>>,
    cacheable: &[AssetKind],
    looked_up: &mut AHashSet<String>,
    bytes_read: &AtomicU64,
) {
    let identity = match SourceIdentity::of(&task.source_path) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(key = %task.key, error = %e, "source file unavailable");
            task.fail(&format!(
                "Failed to read '{}': {e}",
                task.source_path.display()
            ));
            return;
        }
    };
    task.identity = Some(identity);

    let first_copy = cacheable.contains(&task.kind) && looked_up.insert(task.key.clone());
    if let Some(cache) = cache.filter(|_| first_copy) {
        let (entry, backing) = {
            let mut cache = cache.lock();
            match cache.lookup(&task.key, identity.size, identity.timestamp) {
                Some(entry) => {
                    let path = cache.backing_path(entry.id);
                    (Some(entry), Some(path))
                }
                None => (None, None),
            }
        };

        if let (Some(entry), Some(path)) = (entry, backing) {
            match read_into(pool, task.kind, &path) {
                Ok(payload) => {
                    trace!(key = %task.key, id = entry.id, "read cached derived asset");
                    bytes_read.fetch_add(payload.len() as u64, Ordering::Relaxed);
                    task.cached = Some(entry);
                    task.set_payload(payload);
                    return;
                }
                Err(e) => {
                    debug!(key = %task.key, id = entry.id, error = %e, "cached file unreadable, reading source");
                }
            }
        }
    }

    match read_into(pool, task.kind, &task.source_path) {
        Ok(payload) => {
            trace!(key = %task.key, bytes = payload.len(), "read source");
            bytes_read.fetch_add(payload.len() as u64, Ordering::Relaxed);
            task.set_payload(payload);
        }
        Err(e) => {
            warn!(key = %task.key, error = %e, "source read failed");
            task.fail(&format!(
                "Failed to read '{}': {e}",
                task.source_path.display()
            ));
        }
    }
}

/// Read a whole file into a buffer rented for the kind
pub(crate) fn read_into(pool: &BufferPool, kind: AssetKind, path: &Path) -> io::Result<PooledBuffer> {
    let mut file = File::open(path)?;
    let expected = file.metadata()?.len() as usize;
    let mut buffer = pool.rent_for(kind, expected);

    let mut filled = 0;
    {
        let target = buffer.as_mut_slice();
        while filled < target.len() {
            match file.read(&mut target[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
    buffer.truncate(filled);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{AssetItem, TaskState};

    #[test]
    fn test_read_into_pools_eligible_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        std::fs::write(&path, vec![7u8; 4096]).unwrap();

        let pool = BufferPool::default();
        let texture = read_into(&pool, AssetKind::Texture, &path).unwrap();
        assert!(texture.is_pooled());
        assert_eq!(texture.as_slice(), &[7u8; 4096][..]);

        let data = read_into(&pool, AssetKind::Data, &path).unwrap();
        assert!(!data.is_pooled());
        assert_eq!(data.len(), 4096);
    }

    #[test]
    fn test_missing_source_fails_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = RawAssetTask::new(AssetItem::new(
            "gone.png",
            dir.path().join("gone.png"),
            AssetKind::Texture,
        ));
        let counter = AtomicU64::new(0);
        fill_task(
            &mut task,
            &BufferPool::default(),
            None,
            &[],
            &mut AHashSet::new(),
            &counter,
        );
        assert_eq!(task.state(), TaskState::Failed);
        assert!(task.message().unwrap().contains("gone.png"));
        assert_eq!(task.payload_len(), 0);
    }

    #[test]
    fn test_cache_hit_reads_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rock.png");
        std::fs::write(&source, b"source bytes").unwrap();
        let identity = SourceIdentity::of(&source).unwrap();

        let mut cache = DerivedAssetCache::open(dir.path().join("cache"), true).unwrap();
        let image = crate::assets::DerivedImage {
            width: 2,
            height: 2,
            mip_count: 1,
            flags: 0,
            data: vec![1, 2, 3, 4],
        };
        cache
            .store("rock.png", &image, identity.size, identity.timestamp)
            .unwrap();
        let cache = Mutex::new(cache);

        let mut task = RawAssetTask::new(AssetItem::new("rock.png", &source, AssetKind::Texture));
        let counter = AtomicU64::new(0);
        fill_task(
            &mut task,
            &BufferPool::default(),
            Some(&cache),
            &[AssetKind::Texture],
            &mut AHashSet::new(),
            &counter,
        );

        assert_eq!(task.bytes(), &[1, 2, 3, 4]);
        assert!(task.cached_entry().is_some());
        assert_eq!(counter.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_duplicate_key_leaves_first_entry_alone() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.png");
        let second = dir.path().join("second.png");
        std::fs::write(&first, b"first").unwrap();
        std::fs::write(&second, b"second copy").unwrap();
        let identity = SourceIdentity::of(&first).unwrap();

        let mut cache = DerivedAssetCache::open(dir.path().join("cache"), true).unwrap();
        let image = crate::assets::DerivedImage {
            width: 2,
            height: 2,
            mip_count: 1,
            flags: 0,
            data: vec![1, 2, 3, 4],
        };
        let stored = cache
            .store("tex.png", &image, identity.size, identity.timestamp)
            .unwrap()
            .unwrap();
        let cache = Mutex::new(cache);

        let pool = BufferPool::default();
        let counter = AtomicU64::new(0);
        let mut looked_up = AHashSet::new();
        let mut copies = [
            RawAssetTask::new(AssetItem::new("tex.png", &first, AssetKind::Texture)),
            RawAssetTask::new(AssetItem::new("tex.png", &second, AssetKind::Texture)),
        ];
        for task in copies.iter_mut() {
            fill_task(
                task,
                &pool,
                Some(&cache),
                &[AssetKind::Texture],
                &mut looked_up,
                &counter,
            );
        }

        assert!(copies[0].cached_entry().is_some());
        assert!(copies[1].cached_entry().is_none());
        assert_eq!(copies[1].bytes(), b"second copy");

        let cache = cache.lock();
        assert_eq!(cache.entry("tex.png").map(|e| e.id), Some(stored.id));
        assert!(cache.backing_path(stored.id).exists());
        assert_eq!(cache.stats().stale, 0);
    }
}
