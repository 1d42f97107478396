//! Goals: the nodes of the dependency graph the worker drives.
//!
//! A goal owns the goals it waits for ("waitees") through strong pointers and
//! is known to them only through weak pointers ("waiters"), so the pointer
//! graph never forms a cycle even though every edge is recorded both ways.

use crate::build_result::BuildResult;
use crate::derived_path::DerivedPath;
use crate::error::{GoalError, SchedulerError};
use crate::worker::Context;
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

pub type GoalPtr = Rc<GoalNode>;
pub type WeakGoalPtr = Weak<GoalNode>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExitCode {
    Busy,
    Success,
    Failed,
    NoSubstituters,
    IncompleteClosure,
}

impl ExitCode {
    pub fn is_done(self) -> bool {
        self != ExitCode::Busy
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ExitCode::Failed | ExitCode::NoSubstituters | ExitCode::IncompleteClosure
        )
    }
}

/// What a goal wants after a call to `work`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    /// Park until a waitee finishes, a child produces output, a build slot
    /// frees up or a deadline passes.
    Suspend,
    /// Run again on the next pass of the worker loop.
    Yield,
}

/// Failures reported by waitees, one count per failed waitee.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FailureCounts {
    pub failed: usize,
    pub no_substituters: usize,
    pub incomplete_closure: usize,
}

impl FailureCounts {
    pub fn total(&self) -> usize {
        self.failed + self.no_substituters + self.incomplete_closure
    }

    pub(crate) fn record(&mut self, result: ExitCode) {
        match result {
            ExitCode::Failed => self.failed += 1,
            ExitCode::NoSubstituters => self.no_substituters += 1,
            ExitCode::IncompleteClosure => self.incomplete_closure += 1,
            ExitCode::Busy | ExitCode::Success => {}
        }
    }
}

/// One kind of unit of work.  The worker knows nothing about what a goal
/// does; it only calls these hooks.
///
/// Every hook gets a `Context` through which the goal talks back to the
/// worker: registering waitees and children, finishing, and so on.
pub trait Goal {
    /// Identity used for deduplication; must not change over the goal's life.
    fn key(&self) -> String;

    fn name(&self) -> String;

    /// Advance by one step.  Must not block.
    fn work(&mut self, cx: &mut Context<'_, '_>) -> Result<Step, SchedulerError>;

    /// Called once per waitee after the worker has already removed it from
    /// our waitees and counted its failure, if any.  Overriding this is how a
    /// goal reacts before all of its waitees are finished.
    fn waitee_done(
        &mut self,
        _cx: &mut Context<'_, '_>,
        _waitee: &GoalPtr,
        _result: ExitCode,
    ) -> Result<(), SchedulerError> {
        Ok(())
    }

    fn handle_child_output(
        &mut self,
        _cx: &mut Context<'_, '_>,
        fd: RawFd,
        _data: &[u8],
    ) -> Result<(), SchedulerError> {
        panic!("{}: output on fd {} it never registered", self.name(), fd)
    }

    fn handle_eof(&mut self, _cx: &mut Context<'_, '_>, fd: RawFd) -> Result<(), SchedulerError> {
        panic!("{}: eof on fd {} it never registered", self.name(), fd)
    }

    /// The goal ran out of time.  It must kill whatever it runs and finish;
    /// the worker fails it with `err` if it does not.
    fn timed_out(
        &mut self,
        cx: &mut Context<'_, '_>,
        err: GoalError,
    ) -> Result<(), SchedulerError>;

    /// Runs once, after the goal finished.
    fn cleanup(&mut self) {}
}

/// A set of goals, ordered by creation.
#[derive(Default)]
pub struct Goals(BTreeMap<u64, GoalPtr>);

impl Goals {
    pub fn new() -> Self {
        Goals(BTreeMap::new())
    }

    /// Returns false if the goal was already present.
    pub fn insert(&mut self, goal: GoalPtr) -> bool {
        self.0.insert(goal.serial(), goal).is_none()
    }

    pub fn remove(&mut self, goal: &GoalNode) -> Option<GoalPtr> {
        self.0.remove(&goal.serial())
    }

    pub fn contains(&self, goal: &GoalNode) -> bool {
        self.0.contains_key(&goal.serial())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GoalPtr> {
        self.0.values()
    }
}

/// A set of weak goal pointers, ordered by creation.  Dead entries are
/// skipped when upgrading.
#[derive(Default)]
pub struct WeakGoals(BTreeMap<u64, WeakGoalPtr>);

impl WeakGoals {
    pub fn new() -> Self {
        WeakGoals(BTreeMap::new())
    }

    pub fn insert(&mut self, goal: &GoalPtr) {
        self.0.insert(goal.serial(), Rc::downgrade(goal));
    }

    pub fn remove(&mut self, goal: &GoalNode) {
        self.0.remove(&goal.serial());
    }

    pub fn contains(&self, goal: &GoalNode) -> bool {
        self.0.contains_key(&goal.serial())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The goals still alive.
    pub fn upgrade_all(&self) -> Vec<GoalPtr> {
        self.0.values().filter_map(|w| w.upgrade()).collect()
    }
}

/// Scheduler-visible state of a goal.  Only the worker mutates it.
pub(crate) struct GoalState {
    pub exit_code: ExitCode,
    pub waitees: Goals,
    pub waiters: WeakGoals,
    pub counts: FailureCounts,
    /// Serials of every waitee ever registered.
    pub registered: FxHashSet<u64>,
    pub build_result: BuildResult,
    pub error: Option<GoalError>,
}

/// A goal as the worker holds it: scheduling state next to the goal's own
/// implementation.  The two live in separate cells so the worker can update
/// one goal's bookkeeping while another goal's hook is running.
pub struct GoalNode {
    serial: u64,
    key: String,
    name: String,
    pub(crate) state: RefCell<GoalState>,
    pub(crate) inner: RefCell<Box<dyn Goal>>,
}

impl GoalNode {
    pub(crate) fn new(serial: u64, goal: Box<dyn Goal>) -> GoalPtr {
        let node = GoalNode {
            serial,
            key: goal.key(),
            name: goal.name(),
            state: RefCell::new(GoalState {
                exit_code: ExitCode::Busy,
                waitees: Goals::new(),
                waiters: WeakGoals::new(),
                counts: FailureCounts::default(),
                registered: FxHashSet::default(),
                build_result: BuildResult::default(),
                error: None,
            }),
            inner: RefCell::new(goal),
        };
        tracing::trace!(goal = %node.name, "goal created");
        Rc::new(node)
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exit_code(&self) -> ExitCode {
        self.state.borrow().exit_code
    }

    pub fn is_done(&self) -> bool {
        self.exit_code().is_done()
    }

    pub fn counts(&self) -> FailureCounts {
        self.state.borrow().counts
    }

    /// Number of distinct waitees this goal has ever registered, including
    /// ones that were already finished when registered.
    pub fn nr_waitees_registered(&self) -> usize {
        self.state.borrow().registered.len()
    }

    pub fn waitees(&self) -> Vec<GoalPtr> {
        self.state.borrow().waitees.iter().cloned().collect()
    }

    pub fn has_waitees(&self) -> bool {
        !self.state.borrow().waitees.is_empty()
    }

    pub fn is_waiting_for(&self, goal: &GoalNode) -> bool {
        self.state.borrow().waitees.contains(goal)
    }

    /// Live waiters.
    pub fn waiters(&self) -> Vec<GoalPtr> {
        self.state.borrow().waiters.upgrade_all()
    }

    pub fn is_waited_on_by(&self, goal: &GoalNode) -> bool {
        self.state.borrow().waiters.contains(goal)
    }

    pub fn error(&self) -> Option<GoalError> {
        self.state.borrow().error.clone()
    }

    /// The result as seen by one request.  Goals may be shared between
    /// requests and hold information about all of them; this returns only
    /// what `req` asked about.
    pub fn get_build_result(&self, req: &DerivedPath) -> BuildResult {
        self.state.borrow().build_result.project(req)
    }
}

impl Drop for GoalNode {
    fn drop(&mut self) {
        tracing::trace!(goal = %self.name, "goal destroyed");
    }
}

impl std::fmt::Debug for GoalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalNode")
            .field("serial", &self.serial)
            .field("key", &self.key)
            .field("exit_code", &self.exit_code())
            .finish()
    }
}
