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

//! Background prefetch pipeline
//!
//! One reader thread streams raw bytes into a bounded [`PrefetchBuffer`]
//! while the foreground pops tasks one at a time. Tasks come out in the
//! order they were read, but callers should not rely on that.

pub mod buffer;
mod reader;

pub use buffer::{BufferSnapshot, PrefetchBuffer};
pub(crate) use reader::read_into;

use crate::cache::DerivedAssetCache;
use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result};
use crate::pool::BufferPool;
use crate::task::{AssetKind, RawAssetTask};
use parking_lot::Mutex;
use reader::ReaderJob;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Buffer limits and cache policy for one pipeline run
#[derive(Clone, Debug)]
pub struct PrefetchOptions {
    pub max_bytes: usize,
    pub min_count: usize,
    /// Kinds whose derived output may be served from the cache
    pub cacheable: Vec<AssetKind>,
}

impl PrefetchOptions {
    pub fn from_config(config: &LoaderConfig, cacheable: Vec<AssetKind>) -> Self {
        Self {
            max_bytes: config.max_buffered_bytes,
            min_count: config.min_buffered_tasks,
            cacheable,
        }
    }
}

impl Default for PrefetchOptions {
    fn default() -> Self {
        Self::from_config(&LoaderConfig::default(), Vec::new())
    }
}

/// Point-in-time pipeline progress
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PrefetchProgress {
    pub processed: usize,
    pub total: usize,
    pub buffered: BufferSnapshot,
    pub bytes_read: u64,
}

impl PrefetchProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f32 / self.total as f32
        }
    }
}

/// Reader thread plus the buffer it fills
pub struct PrefetchPipeline {
    buffer: Arc<PrefetchBuffer>,
    reader: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    bytes_read: Arc<AtomicU64>,
    processed: usize,
    total: usize,
}

impl PrefetchPipeline {
    /// Spawn the reader over `tasks`
    pub fn start(
        tasks: Vec<RawAssetTask>,
        options: PrefetchOptions,
        pool: BufferPool,
        cache: Option<Arc<Mutex<DerivedAssetCache>>>,
    ) -> Result<Self> {
        let total = tasks.len();
        let buffer = Arc::new(PrefetchBuffer::new(options.max_bytes, options.min_count));
        let cancel = Arc::new(AtomicBool::new(false));
        let bytes_read = Arc::new(AtomicU64::new(0));

        let job = ReaderJob {
            tasks,
            buffer: buffer.clone(),
            pool,
            cache,
            cacheable: options.cacheable,
            cancel: cancel.clone(),
            bytes_read: bytes_read.clone(),
        };

        let reader = std::thread::Builder::new()
            .name("asset-prefetch".to_string())
            .spawn(move || job.run())
            .map_err(|e| LoaderError::IoError(format!("failed to spawn prefetch reader: {e}")))?;

        debug!(total, max_bytes = options.max_bytes, "prefetch pipeline started");
        Ok(Self {
            buffer,
            reader: Some(reader),
            cancel,
            bytes_read,
            processed: 0,
            total,
        })
    }

    /// Take the next buffered task.
    ///
    /// `Pending` means the buffer is momentarily empty. `Ready(Ok(None))`
    /// once every task has been handed out. An error means the reader
    /// exited with tasks still outstanding.
    pub fn next_task(&mut self) -> Poll<Result<Option<RawAssetTask>>> {
        if self.processed == self.total {
            self.join();
            return Poll::Ready(Ok(None));
        }

        if let Some(task) = self.buffer.pop() {
            self.processed += 1;
            return Poll::Ready(Ok(Some(task)));
        }

        let reader_gone = self.reader.as_ref().map_or(true, |r| r.is_finished());
        if !reader_gone {
            return Poll::Pending;
        }

        // the reader may have pushed its last task just before exiting
        if let Some(task) = self.buffer.pop() {
            self.processed += 1;
            return Poll::Ready(Ok(Some(task)));
        }

        self.join();
        error!(
            processed = self.processed,
            total = self.total,
            "prefetch reader exited early"
        );
        Poll::Ready(Err(LoaderError::ReaderTerminated {
            processed: self.processed,
            total: self.total,
        }))
    }

    pub fn is_finished(&self) -> bool {
        self.processed == self.total
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn buffer(&self) -> &PrefetchBuffer {
        &self.buffer
    }

    pub fn progress(&self) -> PrefetchProgress {
        PrefetchProgress {
            processed: self.processed,
            total: self.total,
            buffered: self.buffer.snapshot(),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }

    fn join(&mut self) {
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                error!("prefetch reader panicked");
            }
        }
    }
}

impl Drop for PrefetchPipeline {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{AssetItem, TaskState};
    use std::fs;

    fn drain(pipeline: &mut PrefetchPipeline) -> Vec<RawAssetTask> {
        let mut out = Vec::new();
        loop {
            match pipeline.next_task() {
                Poll::Ready(Ok(Some(task))) => out.push(task),
                Poll::Ready(Ok(None)) => return out,
                Poll::Ready(Err(e)) => panic!("{e}"),
                Poll::Pending => std::thread::yield_now(),
            }
        }
    }

    #[test]
    fn test_streams_every_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = Vec::new();
        for i in 0..20 {
            let path = dir.path().join(format!("{i}.bin"));
            fs::write(&path, vec![i as u8; 100 + i]).unwrap();
            tasks.push(RawAssetTask::new(AssetItem::new(
                format!("{i}.bin"),
                path,
                AssetKind::Data,
            )));
        }
        tasks.push(RawAssetTask::new(AssetItem::new(
            "missing.bin",
            dir.path().join("missing.bin"),
            AssetKind::Data,
        )));

        let options = PrefetchOptions {
            max_bytes: 300,
            min_count: 1,
            cacheable: Vec::new(),
        };
        let mut pipeline =
            PrefetchPipeline::start(tasks, options, BufferPool::default(), None).unwrap();
        let out = drain(&mut pipeline);

        assert_eq!(out.len(), 21);
        assert!(pipeline.is_finished());
        assert_eq!(pipeline.progress().fraction(), 1.0);
        assert!(pipeline.buffer().peak_bytes() <= 300);

        let failed: Vec<_> = out.iter().filter(|t| t.state() == TaskState::Failed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key, "missing.bin");
        let five = out.iter().find(|t| t.key == "5.bin").unwrap();
        assert_eq!(five.bytes(), &vec![5u8; 105][..]);
    }

    #[test]
    fn test_empty_input_finishes_immediately() {
        let mut pipeline = PrefetchPipeline::start(
            Vec::new(),
            PrefetchOptions::default(),
            BufferPool::default(),
            None,
        )
        .unwrap();
        assert!(matches!(pipeline.next_task(), Poll::Ready(Ok(None))));
        assert_eq!(pipeline.progress().fraction(), 1.0);
    }

    #[test]
    fn test_drop_with_blocked_reader() {
        let dir = tempfile::tempdir().unwrap();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let path = dir.path().join(format!("{i}.bin"));
            fs::write(&path, vec![0u8; 64]).unwrap();
            tasks.push(RawAssetTask::new(AssetItem::new(
                format!("{i}.bin"),
                path,
                AssetKind::Data,
            )));
        }
        let options = PrefetchOptions {
            max_bytes: 64,
            min_count: 0,
            cacheable: Vec::new(),
        };
        let pipeline = PrefetchPipeline::start(tasks, options, BufferPool::default(), None).unwrap();
        drop(pipeline);
    }
}
