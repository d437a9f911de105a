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

//! Time budgeting for cooperative loading.
//!
//! This module provides:
//! - [`Clock`] - Monotonic time source, swappable for tests
//! - [`FrameBudget`] - Per-quantum time budget (e.g. 30 Hz)
//!
//! # Examples
//!
//! ```
//! use archetype_loader::time::FrameBudget;
//!
//! let mut budget = FrameBudget::from_hz(30);
//! budget.mark_return();
//!
//! // In the loading loop:
//! if budget.exhausted() {
//!     // hand control back to the host
//! }
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created
    fn elapsed(&self) -> Duration;
}

/// Wall clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same time line.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Jump to an absolute time
    pub fn set(&self, to: Duration) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        *self.now.lock()
    }
}

/// Fixed time quantum the foreground may spend before returning control
#[derive(Clone)]
pub struct FrameBudget {
    /// Quantum duration
    quantum: Duration,
    /// Clock reading at the last return of control
    last_return: Duration,
    clock: Arc<dyn Clock>,
}

impl FrameBudget {
    /// Create a budget from an update frequency (Hz)
    pub fn from_hz(hz: u32) -> Self {
        let hz = hz.max(1);
        Self::from_duration(Duration::from_secs_f64(1.0 / hz as f64))
    }

    /// Create with an explicit quantum
    pub fn from_duration(quantum: Duration) -> Self {
        Self {
            quantum,
            last_return: Duration::ZERO,
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.last_return = clock.elapsed();
        self.clock = clock;
        self
    }

    /// Record that control was handed back to the host
    pub fn mark_return(&mut self) {
        self.last_return = self.clock.elapsed();
    }

    /// Time spent since the last return of control
    pub fn since_return(&self) -> Duration {
        self.clock.elapsed().saturating_sub(self.last_return)
    }

    /// Whether the quantum has been exceeded
    pub fn exhausted(&self) -> bool {
        self.since_return() > self.quantum
    }

    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    /// Current clock reading
    pub fn now(&self) -> Duration {
        self.clock.elapsed()
    }

    /// Shared handle to the underlying clock
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
}

impl Default for FrameBudget {
    fn default() -> Self {
        Self::from_hz(30) // 30 Hz default
    }
}

impl std::fmt::Debug for FrameBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBudget")
            .field("quantum", &self.quantum)
            .field("since_return", &self.since_return())
            .finish()
    }
}

/// Rate limiter sharing a budget's clock, used for progress publication
#[derive(Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl Throttle {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            last: None,
            clock,
        }
    }

    /// Returns true at most once per interval (always on first call)
    pub fn ready(&mut self) -> bool {
        let now = self.clock.elapsed();
        match self.last {
            Some(last) if now.saturating_sub(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
