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

//! Cooperative scheduler for nested, suspendable work units
//!
//! Units are resumed innermost first from an explicit stack. A unit that
//! pauses with [`Step::Continue`] only hands control back to the host once
//! the frame budget is spent or a frame skip was requested, so cheap steps
//! run back to back within one quantum.

use crate::error::{FatalError, LoaderError};
use crate::time::FrameBudget;
use smallvec::SmallVec;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, warn};

/// Typical nesting: root, per-item unit, launcher
pub type UnitStack = SmallVec<[Box<dyn WorkUnit>; 8]>;

/// Result of resuming a unit once
pub enum Step {
    /// Pause; resumed again later
    Continue,
    /// Run this unit to completion before resuming the current one
    Nested(Box<dyn WorkUnit>),
    /// Finished
    Done,
    Failed(LoaderError),
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Continue => write!(f, "Continue"),
            Step::Nested(unit) => write!(f, "Nested({})", unit.label()),
            Step::Done => write!(f, "Done"),
            Step::Failed(err) => write!(f, "Failed({err})"),
        }
    }
}

/// Per-resume handle given to units
#[derive(Debug, Default)]
pub struct ResumeContext {
    depth: usize,
    frame_skip: bool,
}

impl ResumeContext {
    /// Return control at the next pause even if budget remains
    pub fn request_frame_skip(&mut self) {
        self.frame_skip = true;
    }

    /// Stack depth of the unit being resumed; the root is 0
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Suspendable state machine driven by the scheduler
pub trait WorkUnit {
    /// Phase name used in diagnostics
    fn label(&self) -> &str;

    fn resume(&mut self, cx: &mut ResumeContext) -> Step;

    /// Logical key being processed, if any
    fn current_item(&self) -> Option<&str> {
        None
    }

    /// Called when this unit is discarded because it or a unit nested in it
    /// failed
    fn abandoned(&mut self, _error: &LoaderError) {}
}

/// Scheduler lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Completed,
    Halted(FatalError),
}

/// Outcome of one `run` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Budget spent or frame skipped; call `run` again next frame
    Yielded,
    Completed,
    Halted(FatalError),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub resumes: u64,
    pub control_returns: u64,
    pub abandoned_units: u64,
    pub peak_depth: usize,
}

/// Drives a root unit and everything it nests within a frame budget
pub struct FrameBudgetScheduler {
    stack: UnitStack,
    budget: FrameBudget,
    state: SchedulerState,
    frame_skip: bool,
    stats: SchedulerStats,
}

impl FrameBudgetScheduler {
    pub fn new(root: Box<dyn WorkUnit>, budget: FrameBudget) -> Self {
        let mut stack = UnitStack::new();
        stack.push(root);
        Self {
            stack,
            budget,
            state: SchedulerState::Running,
            frame_skip: false,
            stats: SchedulerStats {
                peak_depth: 1,
                ..SchedulerStats::default()
            },
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn budget(&self) -> &FrameBudget {
        &self.budget
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Resume units until the budget is spent, a frame skip is taken, the
    /// root finishes or the root fails.
    pub fn run(&mut self) -> Tick {
        match &self.state {
            SchedulerState::Completed => return Tick::Completed,
            SchedulerState::Halted(fatal) => return Tick::Halted(fatal.clone()),
            SchedulerState::Running => {}
        }

        self.budget.mark_return();

        loop {
            let depth = self.stack.len();
            let Some(unit) = self.stack.last_mut() else {
                self.state = SchedulerState::Completed;
                return Tick::Completed;
            };

            let mut cx = ResumeContext {
                depth: depth - 1,
                frame_skip: false,
            };
            let step = catch_unwind(AssertUnwindSafe(|| unit.resume(&mut cx)))
                .unwrap_or_else(|payload| {
                    Step::Failed(LoaderError::Panicked(panic_message(payload.as_ref())))
                });
            self.stats.resumes += 1;
            if cx.frame_skip {
                self.frame_skip = true;
            }

            match step {
                Step::Continue => {
                    if self.frame_skip || self.budget.exhausted() {
                        self.frame_skip = false;
                        self.budget.mark_return();
                        self.stats.control_returns += 1;
                        return Tick::Yielded;
                    }
                }
                Step::Nested(child) => {
                    self.stack.push(child);
                    self.stats.peak_depth = self.stats.peak_depth.max(self.stack.len());
                }
                Step::Done => {
                    self.stack.pop();
                    if self.stack.is_empty() {
                        debug!(resumes = self.stats.resumes, "scheduler completed");
                        self.state = SchedulerState::Completed;
                        return Tick::Completed;
                    }
                }
                Step::Failed(err) => {
                    if let Some(fatal) = self.fail(err) {
                        return Tick::Halted(fatal);
                    }
                }
            }
        }
    }

    /// Unwind after a failure. Returns the fatal error when the root failed.
    fn fail(&mut self, err: LoaderError) -> Option<FatalError> {
        if self.stack.len() > 1 {
            if let Some(unit) = self.stack.last() {
                warn!(
                    unit = unit.label(),
                    item = unit.current_item().unwrap_or(""),
                    error = %err,
                    "work unit failed, resuming root"
                );
            }
            while self.stack.len() > 1 {
                if let Some(mut unit) = self.stack.pop() {
                    let notified = catch_unwind(AssertUnwindSafe(|| unit.abandoned(&err)));
                    if notified.is_err() {
                        warn!(unit = unit.label(), "abandon callback panicked");
                    }
                    self.stats.abandoned_units += 1;
                }
            }
            return None;
        }

        let fatal = match self.stack.first() {
            Some(root) => FatalError {
                phase: root.label().to_string(),
                item: root.current_item().map(str::to_string),
                message: err.to_string(),
            },
            None => FatalError {
                phase: "unknown".to_string(),
                item: None,
                message: err.to_string(),
            },
        };
        error!(
            phase = %fatal.phase,
            item = fatal.item.as_deref().unwrap_or(""),
            message = %fatal.message,
            "root work unit failed"
        );
        self.stack.clear();
        self.state = SchedulerState::Halted(fatal.clone());
        Some(fatal)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Work unit built from a closure
pub struct FnUnit<F> {
    label: String,
    body: F,
}

impl<F> WorkUnit for FnUnit<F>
where
    F: FnMut(&mut ResumeContext) -> Step,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn resume(&mut self, cx: &mut ResumeContext) -> Step {
        (self.body)(cx)
    }
}

/// Box a closure as a work unit
pub fn unit_fn<F>(label: impl Into<String>, body: F) -> Box<dyn WorkUnit>
where
    F: FnMut(&mut ResumeContext) -> Step + 'static,
{
    Box::new(FnUnit {
        label: label.into(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Clock, ManualClock};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::Duration;

    type Log = Rc<RefCell<Vec<String>>>;

    fn budget_ms(ms: u64) -> (FrameBudget, ManualClock) {
        let clock = ManualClock::new();
        let budget =
            FrameBudget::from_duration(Duration::from_millis(ms)).with_clock(Arc::new(clock.clone()));
        (budget, clock)
    }

    fn counting_unit(name: &'static str, steps: u32, log: Log) -> Box<dyn WorkUnit> {
        let mut left = steps;
        unit_fn(name, move |_| {
            if left == 0 {
                log.borrow_mut().push(format!("{name} done"));
                return Step::Done;
            }
            left -= 1;
            Step::Continue
        })
    }

    fn drive(scheduler: &mut FrameBudgetScheduler) -> Tick {
        for _ in 0..10_000 {
            match scheduler.run() {
                Tick::Yielded => continue,
                other => return other,
            }
        }
        panic!("scheduler never finished");
    }

    #[test]
    fn test_nested_units_finish_before_parent() {
        let log: Log = Rc::default();
        let mut stage = 0;
        let root_log = log.clone();
        let root = unit_fn("root", move |cx| {
            assert_eq!(cx.depth(), 0);
            stage += 1;
            match stage {
                1 => Step::Nested(counting_unit("a", 3, root_log.clone())),
                2 => {
                    let inner_log = root_log.clone();
                    let mut nested = false;
                    Step::Nested(unit_fn("b", move |_| {
                        if !nested {
                            nested = true;
                            return Step::Nested(counting_unit("c", 2, inner_log.clone()));
                        }
                        inner_log.borrow_mut().push("b done".to_string());
                        Step::Done
                    }))
                }
                _ => {
                    root_log.borrow_mut().push("root done".to_string());
                    Step::Done
                }
            }
        });

        let (budget, _clock) = budget_ms(33);
        let mut scheduler = FrameBudgetScheduler::new(root, budget);
        assert_eq!(drive(&mut scheduler), Tick::Completed);
        assert_eq!(*log.borrow(), vec!["a done", "c done", "b done", "root done"]);
        assert_eq!(scheduler.stats().peak_depth, 3);
        assert_eq!(scheduler.run(), Tick::Completed);
    }

    #[test]
    fn test_continue_runs_on_until_budget_spent() {
        let (budget, clock) = budget_ms(10);
        let mut count = 0;
        let ticking = clock.clone();
        let root = unit_fn("root", move |_| {
            count += 1;
            ticking.advance(Duration::from_millis(3));
            if count == 10 {
                Step::Done
            } else {
                Step::Continue
            }
        });

        let mut scheduler = FrameBudgetScheduler::new(root, budget);
        // 3, 6, 9, 12 ms: the fourth pause exceeds the 10 ms quantum
        assert_eq!(scheduler.run(), Tick::Yielded);
        assert_eq!(scheduler.stats().resumes, 4);
        assert_eq!(drive(&mut scheduler), Tick::Completed);
    }

    #[test]
    fn test_frame_skip_is_one_shot() {
        let (budget, _clock) = budget_ms(1000);
        let mut count = 0;
        let root = unit_fn("root", move |cx| {
            count += 1;
            match count {
                1 => {
                    cx.request_frame_skip();
                    Step::Continue
                }
                2 | 3 => Step::Continue,
                _ => Step::Done,
            }
        });

        let mut scheduler = FrameBudgetScheduler::new(root, budget);
        assert_eq!(scheduler.run(), Tick::Yielded);
        assert_eq!(scheduler.stats().resumes, 1);
        // latch consumed; the remaining pauses fit in the budget
        assert_eq!(scheduler.run(), Tick::Completed);
        assert_eq!(scheduler.stats().control_returns, 1);
    }

    struct Recorder {
        name: &'static str,
        log: Log,
        fail: bool,
    }

    impl WorkUnit for Recorder {
        fn label(&self) -> &str {
            self.name
        }

        fn resume(&mut self, _cx: &mut ResumeContext) -> Step {
            if self.fail {
                return Step::Failed(LoaderError::UnitFailed(format!("{} broke", self.name)));
            }
            Step::Nested(Box::new(Recorder {
                name: "inner",
                log: self.log.clone(),
                fail: true,
            }))
        }

        fn abandoned(&mut self, error: &LoaderError) {
            self.log.borrow_mut().push(format!("{} abandoned: {error}", self.name));
        }
    }

    #[test]
    fn test_nested_failure_unwinds_to_root() {
        let log: Log = Rc::default();
        let mut stage = 0;
        let root_log = log.clone();
        let root = unit_fn("root", move |_| {
            stage += 1;
            match stage {
                1 => Step::Nested(Box::new(Recorder {
                    name: "outer",
                    log: root_log.clone(),
                    fail: false,
                })),
                _ => {
                    root_log.borrow_mut().push("root resumed".to_string());
                    Step::Done
                }
            }
        });

        let (budget, _clock) = budget_ms(33);
        let mut scheduler = FrameBudgetScheduler::new(root, budget);
        assert_eq!(drive(&mut scheduler), Tick::Completed);

        let log = log.borrow();
        assert_eq!(log.len(), 3);
        assert!(log[0].starts_with("inner abandoned"));
        assert!(log[1].starts_with("outer abandoned"));
        assert_eq!(log[2], "root resumed");
        assert_eq!(scheduler.stats().abandoned_units, 2);
    }

    #[test]
    fn test_nested_panic_is_contained() {
        let mut stage = 0;
        let root = unit_fn("root", move |_| {
            stage += 1;
            match stage {
                1 => Step::Nested(unit_fn("bomb", |_| -> Step { panic!("kaboom") })),
                _ => Step::Done,
            }
        });

        let (budget, _clock) = budget_ms(33);
        let mut scheduler = FrameBudgetScheduler::new(root, budget);
        assert_eq!(drive(&mut scheduler), Tick::Completed);
        assert_eq!(scheduler.stats().abandoned_units, 1);
    }

    struct FailingRoot;

    impl WorkUnit for FailingRoot {
        fn label(&self) -> &str {
            "scan"
        }

        fn resume(&mut self, _cx: &mut ResumeContext) -> Step {
            panic!("registry exploded")
        }

        fn current_item(&self) -> Option<&str> {
            Some("parts/fuel.cfg")
        }
    }

    #[test]
    fn test_root_failure_halts_with_context() {
        let (budget, _clock) = budget_ms(33);
        let mut scheduler = FrameBudgetScheduler::new(Box::new(FailingRoot), budget);

        let Tick::Halted(fatal) = scheduler.run() else {
            panic!("expected halt");
        };
        assert_eq!(fatal.phase, "scan");
        assert_eq!(fatal.item.as_deref(), Some("parts/fuel.cfg"));
        assert!(fatal.message.contains("registry exploded"));
        assert_eq!(scheduler.run(), Tick::Halted(fatal.clone()));
        assert_eq!(scheduler.state(), &SchedulerState::Halted(fatal));
    }

    #[test]
    fn test_control_returns_bounded_by_elapsed_time() {
        let (budget, clock) = budget_ms(33);
        let quantum = budget.quantum();
        let mut scheduler = {
            let clock = clock.clone();
            let mut produced = 0;
            let root = unit_fn("root", move |_| {
                produced += 1;
                if produced > 40 {
                    return Step::Done;
                }
                let clock = clock.clone();
                let mut steps = 0;
                Step::Nested(unit_fn("leaf", move |_| {
                    steps += 1;
                    clock.advance(Duration::from_millis(7));
                    if steps < 5 {
                        Step::Continue
                    } else {
                        Step::Done
                    }
                }))
            });
            FrameBudgetScheduler::new(root, budget)
        };

        assert_eq!(drive(&mut scheduler), Tick::Completed);
        let elapsed = clock.elapsed();
        let bound = (elapsed.as_nanos() / quantum.as_nanos()) as u64 + 1;
        assert!(scheduler.stats().control_returns <= bound);
        assert!(scheduler.stats().control_returns > 0);
    }
}
