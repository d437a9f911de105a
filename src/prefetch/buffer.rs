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

use crate::task::RawAssetTask;
use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Sleep used once spinning stops paying off
const PUSH_SLEEP: Duration = Duration::from_millis(1);

/// Consistent view of the buffer taken under its lock
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub count: usize,
    pub bytes: usize,
}

#[derive(Default)]
struct BufferState {
    queue: VecDeque<RawAssetTask>,
    bytes: usize,
    peak_bytes: usize,
}

/// Bounded queue between the reader and the foreground.
///
/// After every push either the buffered payload bytes stay within
/// `max_bytes` or fewer than `min_count` tasks are buffered. An empty buffer
/// always accepts one task so an oversized payload cannot stall the reader.
pub struct PrefetchBuffer {
    state: Mutex<BufferState>,
    max_bytes: usize,
    min_count: usize,
}

impl PrefetchBuffer {
    pub fn new(max_bytes: usize, min_count: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            max_bytes,
            min_count,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn min_count(&self) -> usize {
        self.min_count
    }

    /// Push at the back if admission allows, otherwise hand the task back
    pub fn try_push(&self, task: RawAssetTask) -> Result<(), RawAssetTask> {
        let len = task.payload_len();
        let mut state = self.state.lock();

        let count = state.queue.len() + 1;
        let bytes = state.bytes + len;
        let admitted = state.queue.is_empty() || bytes <= self.max_bytes || count < self.min_count;
        if !admitted {
            return Err(task);
        }

        state.queue.push_back(task);
        state.bytes = bytes;
        state.peak_bytes = state.peak_bytes.max(bytes);
        Ok(())
    }

    /// Push, spinning with back-off until admitted.
    ///
    /// Returns false without pushing once `cancel` is set.
    pub fn push_blocking(&self, mut task: RawAssetTask, cancel: &AtomicBool) -> bool {
        let backoff = Backoff::new();
        loop {
            match self.try_push(task) {
                Ok(()) => return true,
                Err(rejected) => task = rejected,
            }
            if cancel.load(Ordering::Acquire) {
                return false;
            }
            if backoff.is_completed() {
                std::thread::sleep(PUSH_SLEEP);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Pop from the front
    pub fn pop(&self) -> Option<RawAssetTask> {
        let mut state = self.state.lock();
        let task = state.queue.pop_front()?;
        state.bytes -= task.payload_len();
        Some(task)
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        let state = self.state.lock();
        BufferSnapshot {
            count: state.queue.len(),
            bytes: state.bytes,
        }
    }

    /// Highest byte total ever buffered
    pub fn peak_bytes(&self) -> usize {
        self.state.lock().peak_bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Whether a snapshot respects the admission bound
    pub fn within_bounds(&self, snapshot: BufferSnapshot) -> bool {
        snapshot.count <= 1 || snapshot.bytes <= self.max_bytes || snapshot.count < self.min_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PooledBuffer;
    use crate::task::{AssetItem, AssetKind};
    use std::sync::Arc;

    fn task(key: &str, len: usize) -> RawAssetTask {
        let mut task = RawAssetTask::new(AssetItem::new(key, key, AssetKind::Data));
        task.set_payload(PooledBuffer::from_vec(vec![0; len]));
        task
    }

    #[test]
    fn test_byte_bound() {
        let buffer = PrefetchBuffer::new(100, 1);
        assert!(buffer.try_push(task("a", 60)).is_ok());
        assert!(buffer.try_push(task("b", 60)).is_err());
        assert!(buffer.try_push(task("c", 40)).is_ok());
        assert_eq!(buffer.snapshot(), BufferSnapshot { count: 2, bytes: 100 });
    }

    #[test]
    fn test_min_count_overrides_bytes() {
        let buffer = PrefetchBuffer::new(10, 3);
        assert!(buffer.try_push(task("a", 50)).is_ok());
        assert!(buffer.try_push(task("b", 50)).is_ok());
        assert!(buffer.try_push(task("c", 50)).is_err());
    }

    #[test]
    fn test_empty_buffer_admits_oversized() {
        let buffer = PrefetchBuffer::new(10, 0);
        assert!(buffer.try_push(task("big", 1000)).is_ok());
        assert!(buffer.try_push(task("small", 1)).is_err());
        assert_eq!(buffer.pop().map(|t| t.key), Some("big".to_string()));
        assert!(buffer.try_push(task("small", 1)).is_ok());
    }

    #[test]
    fn test_fifo_and_byte_accounting() {
        let buffer = PrefetchBuffer::new(1000, 1);
        buffer.try_push(task("a", 10)).unwrap();
        buffer.try_push(task("b", 20)).unwrap();
        assert_eq!(buffer.pop().map(|t| t.key), Some("a".to_string()));
        assert_eq!(buffer.snapshot().bytes, 20);
        assert_eq!(buffer.pop().map(|t| t.key), Some("b".to_string()));
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.peak_bytes(), 30);
    }

    #[test]
    fn test_push_blocking_respects_cancel() {
        let buffer = PrefetchBuffer::new(1, 0);
        buffer.try_push(task("a", 5)).unwrap();
        let cancel = AtomicBool::new(true);
        assert!(!buffer.push_blocking(task("b", 5), &cancel));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_bound_holds_across_threads() {
        let buffer = Arc::new(PrefetchBuffer::new(4096, 2));
        let cancel = Arc::new(AtomicBool::new(false));
        let producer = {
            let buffer = buffer.clone();
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                for i in 0..500usize {
                    let len = (i * 7919) % 3000;
                    assert!(buffer.push_blocking(task(&i.to_string(), len), &cancel));
                }
            })
        };

        let mut received = 0;
        while received < 500 {
            let snapshot = buffer.snapshot();
            assert!(buffer.within_bounds(snapshot), "{snapshot:?}");
            if buffer.pop().is_some() {
                received += 1;
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
        assert!(buffer.is_empty());
        assert!(buffer.peak_bytes() <= 4096 + 3000);
    }
}
