use criterion::{criterion_group, criterion_main, Criterion};
use goalwork::error::{GoalError, SchedulerError};
use goalwork::goal::{ExitCode, Goal, Step};
use goalwork::progress::NoProgress;
use goalwork::store::MemoryStore;
use goalwork::worker::{Context, Settings, Worker};
use std::fmt::Write;
use std::path::Path;

/// A goal in a binary tree of `size` goals.  Every goal also depends on the
/// last one, so that goal is shared by everybody.
struct Node {
    index: usize,
    size: usize,
    started: bool,
}

fn node(index: usize, size: usize) -> Box<dyn Goal> {
    Box::new(Node {
        index,
        size,
        started: false,
    })
}

impl Goal for Node {
    fn key(&self) -> String {
        format!("n{}", self.index)
    }

    fn name(&self) -> String {
        self.key()
    }

    fn work(&mut self, cx: &mut Context<'_, '_>) -> Result<Step, SchedulerError> {
        if !self.started {
            self.started = true;
            let size = self.size;
            let shared = size - 1;
            let mut deps = vec![2 * self.index + 1, 2 * self.index + 2];
            deps.push(shared);
            for dep in deps.into_iter().filter(|&d| d < size && d != self.index) {
                let goal = cx.make_goal(&format!("n{}", dep), || node(dep, size));
                cx.add_waitee(goal)?;
            }
            if cx.nr_waitees() > 0 {
                return Ok(Step::Suspend);
            }
        }
        cx.am_done(ExitCode::Success, None)?;
        Ok(Step::Suspend)
    }

    fn timed_out(&mut self, cx: &mut Context<'_, '_>, err: GoalError) -> Result<(), SchedulerError> {
        cx.am_done(ExitCode::Failed, Some(err))
    }
}

pub fn bench_schedule(c: &mut Criterion) {
    let store = MemoryStore::new();
    for size in [100, 10_000] {
        c.bench_function(&format!("schedule tree of {}", size), |b| {
            b.iter(|| {
                let mut progress = NoProgress;
                let mut worker = Worker::new(Settings::default(), &store, &mut progress);
                let root = worker.make_goal("n0", || node(0, size));
                worker.run(&[root.clone()]).unwrap();
                assert_eq!(root.exit_code(), ExitCode::Success);
            })
        });
    }
}

pub fn bench_manifest(c: &mut Criterion) {
    let mut input = String::new();
    for i in 0..100 {
        write!(
            input,
            "derivation pkg{i}.drv
  out = store/pkg{i}
  dev = store/pkg{i}-dev
  inputs = store/src{i} pkg{}.drv^out
  command = cc -o $out $in
",
            i + 1
        )
        .unwrap();
        write!(
            input,
            "path store/src{i}
  substitute = fetch src{i} $out
  references = store/base
"
        )
        .unwrap();
    }

    c.bench_function("manifest parse", |b| {
        b.iter(|| {
            goalwork::manifest::parse(Path::new("bench.goals"), &input).unwrap();
        })
    });
}

criterion_group!(benches, bench_schedule, bench_manifest);
criterion_main!(benches);
