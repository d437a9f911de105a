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

//! Pooled byte buffers for medium sized payloads.
//!
//! Renting only pays off between [`MIN_POOLED_SIZE`] and [`MAX_POOLED_SIZE`];
//! anything outside that range is a plain heap allocation that is freed when
//! dropped. A pool lives for one pipeline run.

use crate::task::AssetKind;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Smallest payload served from the pool
pub const MIN_POOLED_SIZE: usize = 1024;

/// Largest payload served from the pool
pub const MAX_POOLED_SIZE: usize = 20 * 1024 * 1024;

/// Idle buffers kept per size class by default
pub const DEFAULT_BUFFERS_PER_CLASS: usize = 4;

/// Size classes: powers of two from 1 KiB to 16 MiB, then 20 MiB
fn size_classes() -> Vec<usize> {
    let mut classes = Vec::new();
    let mut size = MIN_POOLED_SIZE;
    while size < MAX_POOLED_SIZE {
        classes.push(size);
        size *= 2;
    }
    classes.push(MAX_POOLED_SIZE);
    classes
}

#[derive(Default)]
struct PoolCounters {
    rents: AtomicU64,
    returns: AtomicU64,
    fresh: AtomicU64,
    direct: AtomicU64,
}

struct PoolShared {
    classes: Vec<usize>,
    buckets: Vec<Mutex<Vec<Vec<u8>>>>,
    max_per_class: usize,
    counters: PoolCounters,
}

impl PoolShared {
    fn class_index(&self, size: usize) -> usize {
        self.classes.partition_point(|&class| class < size)
    }

    fn give_back(&self, class: usize, data: Vec<u8>) {
        self.counters.returns.fetch_add(1, Ordering::Relaxed);
        let mut bucket = self.buckets[class].lock();
        if bucket.len() < self.max_per_class {
            bucket.push(data);
        }
    }
}

/// Pool usage statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub rents: u64,
    pub returns: u64,
    /// Pool misses that had to allocate a new class-sized buffer
    pub fresh_allocations: u64,
    /// Requests outside the pooled size range or for ineligible kinds
    pub direct_allocations: u64,
    /// Bytes currently held by idle buffers
    pub retained_bytes: usize,
}

/// Size-classed buffer pool, cheap to clone and share across threads
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new(max_per_class: usize) -> Self {
        let classes = size_classes();
        let buckets = classes.iter().map(|_| Mutex::new(Vec::new())).collect();
        Self {
            shared: Arc::new(PoolShared {
                classes,
                buckets,
                max_per_class,
                counters: PoolCounters::default(),
            }),
        }
    }

    /// Whether a request of this size is served from the pool
    pub fn is_poolable(size: usize) -> bool {
        (MIN_POOLED_SIZE..=MAX_POOLED_SIZE).contains(&size)
    }

    /// Rent a buffer of exactly `size` visible bytes
    pub fn rent(&self, size: usize) -> PooledBuffer {
        if !Self::is_poolable(size) {
            return self.direct(size);
        }

        let shared = &self.shared;
        let class = shared.class_index(size);
        shared.counters.rents.fetch_add(1, Ordering::Relaxed);

        let data = match shared.buckets[class].lock().pop() {
            Some(data) => data,
            None => {
                shared.counters.fresh.fetch_add(1, Ordering::Relaxed);
                vec![0u8; shared.classes[class]]
            }
        };

        PooledBuffer {
            data,
            len: size,
            home: Some(PoolHome {
                pool: Arc::downgrade(&self.shared),
                class,
            }),
        }
    }

    /// Rent when the kind is pool eligible, allocate directly otherwise
    pub fn rent_for(&self, kind: AssetKind, size: usize) -> PooledBuffer {
        if kind.pool_eligible() {
            self.rent(size)
        } else {
            self.direct(size)
        }
    }

    fn direct(&self, size: usize) -> PooledBuffer {
        self.shared.counters.direct.fetch_add(1, Ordering::Relaxed);
        PooledBuffer::from_vec(vec![0u8; size])
    }

    /// Return a buffer; equivalent to dropping it
    pub fn give_back(&self, buffer: PooledBuffer) {
        drop(buffer);
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        let retained_bytes = self
            .shared
            .buckets
            .iter()
            .map(|bucket| bucket.lock().iter().map(Vec::len).sum::<usize>())
            .sum();
        PoolStats {
            rents: counters.rents.load(Ordering::Relaxed),
            returns: counters.returns.load(Ordering::Relaxed),
            fresh_allocations: counters.fresh.load(Ordering::Relaxed),
            direct_allocations: counters.direct.load(Ordering::Relaxed),
            retained_bytes,
        }
    }

    /// Drop every idle buffer
    pub fn clear(&self) {
        for bucket in &self.shared.buckets {
            bucket.lock().clear();
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFERS_PER_CLASS)
    }
}

#[derive(Debug)]
struct PoolHome {
    pool: Weak<PoolShared>,
    class: usize,
}

/// Byte buffer that goes back to its pool when dropped
#[derive(Debug)]
pub struct PooledBuffer {
    data: Vec<u8>,
    len: usize,
    home: Option<PoolHome>,
}

impl PooledBuffer {
    /// Wrap a heap buffer that never returns to a pool
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data,
            len,
            home: None,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }

    /// Shrink the visible length, e.g. after a short read
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Detach from the pool and keep the bytes
    pub fn into_vec(mut self) -> Vec<u8> {
        self.home = None;
        let mut data = std::mem::take(&mut self.data);
        data.truncate(self.len);
        data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            if let Some(pool) = home.pool.upgrade() {
                pool.give_back(home.class, std::mem::take(&mut self.data));
            }
        }
    }
}
