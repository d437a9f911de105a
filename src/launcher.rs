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

//! Bounded launcher for asynchronous operations

use crate::error::{LoaderError, Result};
use crate::scheduler::{ResumeContext, Step, WorkUnit};
use ahash::AHashSet;
use std::collections::VecDeque;
use std::task::Poll;
use tracing::{debug, trace, warn};

/// Operation that runs outside the foreground and is polled for completion
pub trait AsyncOperation {
    fn key(&self) -> &str;

    fn start(&mut self) -> Result<()>;

    fn poll(&mut self) -> Poll<Result<()>>;
}

/// How one operation ended
#[derive(Clone, Debug)]
pub enum OperationOutcome {
    Completed,
    /// Key already launched; never started
    Duplicate,
    Failed(LoaderError),
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Completed)
    }
}

pub type CompletionCallback = Box<dyn FnMut(&str, &OperationOutcome)>;

/// Runs operations with at most `max_concurrent` in flight.
///
/// Itself a work unit: it finishes once every operation has completed,
/// failed or been dropped as a duplicate.
pub struct BoundedConcurrentLauncher {
    label: String,
    pending: VecDeque<Box<dyn AsyncOperation>>,
    in_flight: Vec<Box<dyn AsyncOperation>>,
    launched: AHashSet<String>,
    max_concurrent: usize,
    total: usize,
    completed: usize,
    peak_in_flight: usize,
    on_complete: Option<CompletionCallback>,
}

impl BoundedConcurrentLauncher {
    pub fn new(operations: Vec<Box<dyn AsyncOperation>>, max_concurrent: usize) -> Self {
        let total = operations.len();
        Self {
            label: "launcher".to_string(),
            pending: operations.into(),
            in_flight: Vec::new(),
            launched: AHashSet::new(),
            max_concurrent: max_concurrent.max(1),
            total,
            completed: 0,
            peak_in_flight: 0,
            on_complete: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn on_complete(mut self, callback: impl FnMut(&str, &OperationOutcome) + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    pub fn is_finished(&self) -> bool {
        self.completed == self.total
    }

    fn finish(&mut self, key: &str, outcome: OperationOutcome) {
        self.completed += 1;
        match &outcome {
            OperationOutcome::Completed => trace!(key, "operation completed"),
            OperationOutcome::Duplicate => debug!(key, "duplicate operation skipped"),
            OperationOutcome::Failed(e) => warn!(key, error = %e, "operation failed"),
        }
        if let Some(callback) = self.on_complete.as_mut() {
            callback(key, &outcome);
        }
    }

    /// Poll every in-flight operation once; returns how many finished
    fn poll_in_flight(&mut self) -> usize {
        let mut finished = 0;
        let mut index = 0;
        while index < self.in_flight.len() {
            match self.in_flight[index].poll() {
                Poll::Pending => index += 1,
                Poll::Ready(result) => {
                    let op = self.in_flight.swap_remove(index);
                    let outcome = match result {
                        Ok(()) => OperationOutcome::Completed,
                        Err(e) => OperationOutcome::Failed(e),
                    };
                    self.finish(op.key(), outcome);
                    finished += 1;
                }
            }
        }
        finished
    }

    /// Start operations until saturated; returns how many were settled
    /// without launching
    fn launch(&mut self) -> usize {
        let mut settled = 0;
        while self.in_flight.len() < self.max_concurrent {
            let Some(mut op) = self.pending.pop_front() else {
                break;
            };

            if !self.launched.insert(op.key().to_string()) {
                self.finish(op.key(), OperationOutcome::Duplicate);
                settled += 1;
                continue;
            }

            match op.start() {
                Ok(()) => {
                    self.in_flight.push(op);
                    self.peak_in_flight = self.peak_in_flight.max(self.in_flight.len());
                }
                Err(e) => {
                    self.finish(op.key(), OperationOutcome::Failed(e));
                    settled += 1;
                }
            }
        }
        settled
    }
}

impl WorkUnit for BoundedConcurrentLauncher {
    fn label(&self) -> &str {
        &self.label
    }

    fn resume(&mut self, cx: &mut ResumeContext) -> Step {
        let progressed = self.poll_in_flight() + self.launch();

        if self.is_finished() {
            debug!(total = self.total, label = %self.label, "launcher drained");
            return Step::Done;
        }

        if progressed == 0 && self.in_flight.len() == self.max_concurrent {
            cx.request_frame_skip();
        }
        Step::Continue
    }

    fn current_item(&self) -> Option<&str> {
        self.in_flight.first().map(|op| op.key())
    }

    fn abandoned(&mut self, error: &LoaderError) {
        warn!(
            label = %self.label,
            in_flight = self.in_flight.len(),
            pending = self.pending.len(),
            error = %error,
            "launcher abandoned"
        );
    }
}
