use archetype_loader::pool::BufferPool;
use archetype_loader::prefetch::{PrefetchOptions, PrefetchPipeline};
use archetype_loader::scheduler::{unit_fn, FrameBudgetScheduler, Step, Tick};
use archetype_loader::task::{AssetItem, AssetKind, RawAssetTask, TaskState};
use archetype_loader::time::{Clock, FrameBudget, ManualClock};
use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

fn write_tasks(dir: &std::path::Path, sizes: &[usize], kind: AssetKind) -> Vec<RawAssetTask> {
    sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let path = dir.join(format!("item{i}.bin"));
            fs::write(&path, vec![(i % 251) as u8; size]).unwrap();
            RawAssetTask::new(AssetItem::new(format!("item{i}"), path, kind))
        })
        .collect()
}

#[test]
fn buffer_bound_holds_while_draining() {
    let dir = tempfile::tempdir().unwrap();
    // pseudo-random sizes, a few larger than the whole budget
    let sizes: Vec<usize> = (0..120).map(|i| (i * 7_919 + 13) % 9_000).collect();
    let tasks = write_tasks(dir.path(), &sizes, AssetKind::Texture);

    let options = PrefetchOptions {
        max_bytes: 8 * 1024,
        min_count: 2,
        cacheable: Vec::new(),
    };
    let mut pipeline =
        PrefetchPipeline::start(tasks, options, BufferPool::default(), None).unwrap();

    let mut received = Vec::new();
    loop {
        let snapshot = pipeline.buffer().snapshot();
        assert!(pipeline.buffer().within_bounds(snapshot), "{snapshot:?}");
        match pipeline.next_task() {
            Poll::Ready(Ok(Some(task))) => {
                assert_eq!(task.state(), TaskState::Pending);
                received.push((task.key.clone(), task.payload_len()));
            }
            Poll::Ready(Ok(None)) => break,
            Poll::Ready(Err(e)) => panic!("{e}"),
            Poll::Pending => std::thread::sleep(Duration::from_micros(50)),
        }
    }

    assert_eq!(received.len(), sizes.len());
    for (i, size) in sizes.iter().enumerate() {
        let key = format!("item{i}");
        assert!(received.contains(&(key, *size)));
    }
    assert_eq!(
        pipeline.progress().bytes_read,
        sizes.iter().sum::<usize>() as u64
    );
}

#[test]
fn pooled_buffers_are_reused_across_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let tasks = write_tasks(dir.path(), &[4096; 16], AssetKind::Model);
    let pool = BufferPool::new(2);

    let options = PrefetchOptions {
        max_bytes: 4096,
        min_count: 1,
        cacheable: Vec::new(),
    };
    let mut pipeline = PrefetchPipeline::start(tasks, options, pool.clone(), None).unwrap();
    let mut count = 0;
    loop {
        match pipeline.next_task() {
            // dropping the task hands its buffer back
            Poll::Ready(Ok(Some(_task))) => count += 1,
            Poll::Ready(Ok(None)) => break,
            Poll::Ready(Err(e)) => panic!("{e}"),
            Poll::Pending => std::thread::yield_now(),
        }
    }

    let stats = pool.stats();
    assert_eq!(count, 16);
    assert_eq!(stats.rents, 16);
    assert_eq!(stats.returns, 16);
    assert!(stats.fresh_allocations < 16);
    assert!(stats.retained_bytes <= 2 * 4096);
}

#[test]
fn nested_work_respects_frame_budget() {
    let clock = ManualClock::new();
    let budget = FrameBudget::from_hz(30).with_clock(Arc::new(clock.clone()));
    let quantum = budget.quantum();
    let finished = Rc::new(RefCell::new(Vec::new()));

    let root = {
        let clock = clock.clone();
        let finished = finished.clone();
        let mut spawned = 0;
        unit_fn("root", move |_| {
            if spawned == 25 {
                finished.borrow_mut().push("root".to_string());
                return Step::Done;
            }
            spawned += 1;
            let id = spawned;
            let clock = clock.clone();
            let finished = finished.clone();
            let mut depth = 0;
            Step::Nested(unit_fn(format!("outer{id}"), move |_| {
                depth += 1;
                clock.advance(Duration::from_millis(4));
                match depth {
                    1 => {
                        let clock = clock.clone();
                        let finished = finished.clone();
                        let mut ticks = 0;
                        Step::Nested(unit_fn(format!("inner{id}"), move |_| {
                            ticks += 1;
                            clock.advance(Duration::from_millis(11));
                            if ticks < 3 {
                                Step::Continue
                            } else {
                                finished.borrow_mut().push(format!("inner{id}"));
                                Step::Done
                            }
                        }))
                    }
                    2 => Step::Continue,
                    _ => {
                        finished.borrow_mut().push(format!("outer{id}"));
                        Step::Done
                    }
                }
            }))
        })
    };

    let mut scheduler = FrameBudgetScheduler::new(root, budget);
    let mut frames = 0;
    loop {
        frames += 1;
        match scheduler.run() {
            Tick::Yielded => continue,
            Tick::Completed => break,
            Tick::Halted(fatal) => panic!("{fatal}"),
        }
    }

    let finished = finished.borrow();
    assert_eq!(finished.len(), 51);
    assert_eq!(finished.last().map(String::as_str), Some("root"));
    for id in 1..=25 {
        let inner = finished.iter().position(|s| *s == format!("inner{id}")).unwrap();
        let outer = finished.iter().position(|s| *s == format!("outer{id}")).unwrap();
        assert!(inner < outer);
    }

    let returns = scheduler.stats().control_returns;
    let bound = (clock.elapsed().as_nanos() / quantum.as_nanos()) as u64 + 1;
    assert!(returns <= bound, "{returns} > {bound}");
    assert_eq!(frames as u64, returns + 1);
    assert_eq!(scheduler.stats().peak_depth, 3);
}
