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

//! Archetype Loader - Frame-budgeted asset loading pipeline
//!
//! Loads every item a host registry enumerates while handing control back
//! to the host loop at least once per budget quantum. Storage reads run on a
//! background reader feeding a bounded buffer, medium sized payloads come
//! from a buffer pool and decoded images are kept in a crash-safe on-disk
//! cache between sessions.

pub mod assets;
pub mod cache;
pub mod config;
pub mod error;
pub mod launcher;
pub mod loader;
#[cfg(feature = "profiling")]
pub mod logging;
pub mod pool;
pub mod prefetch;
pub mod prelude;
pub mod scheduler;
pub mod task;
pub mod time;

pub use assets::{
    Asset, AssetDecoder, AssetRegistry, DecodeContext, Decoded, DecoderTable, DerivedImage,
    ImageFlags, MemoryRegistry, SharedRegistry,
};
pub use cache::{CacheEntry, CacheSettings, CacheStats, DerivedAssetCache, FixedChoice, OptInPrompt};
pub use config::LoaderConfig;
pub use error::{FatalError, LoaderError, Result};
pub use launcher::{AsyncOperation, BoundedConcurrentLauncher, OperationOutcome};
pub use loader::{LoadProgress, LoadSession, LoadStatus, ThreadedDecodeOperation};
pub use pool::{BufferPool, PoolStats, PooledBuffer};
pub use prefetch::{PrefetchBuffer, PrefetchOptions, PrefetchPipeline, PrefetchProgress};
pub use scheduler::{
    unit_fn, FrameBudgetScheduler, ResumeContext, SchedulerState, SchedulerStats, Step, Tick,
    WorkUnit,
};
pub use task::{AssetItem, AssetKind, LoadReport, RawAssetTask, SourceIdentity, TaskOutcome, TaskState};
pub use time::{Clock, FrameBudget, ManualClock, SystemClock};
