//! The worker: drives a set of goals to completion.
//!
//! Scheduling is single threaded and cooperative.  Each pass of the loop runs
//! every awake goal once, then, if nothing is awake, waits for output from
//! child processes or for a deadline, and delivers whatever that produced.
//! Concurrency of the actual work comes from the child processes, not from
//! running goal code in parallel.

use crate::build_result::{BuildResult, BuildStatus, KeyedBuildResult};
use crate::derived_path::DerivedPath;
use crate::error::{GoalError, SchedulerError};
use crate::goal::{ExitCode, FailureCounts, Goal, GoalPtr, Goals, Step, WeakGoalPtr, WeakGoals};
use crate::progress::{Progress, StateCounts};
use crate::registry::Registry;
use crate::signal;
use crate::store::Store;
use crate::trace;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, warn};

/// Knobs for a scheduling session.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Keep working on everything that can still succeed after a failure.
    /// When false, a goal stops waiting on its remaining waitees as soon as
    /// one fails, and the session ends once any top-level goal fails.
    pub keep_going: bool,
    /// Number of build slots, i.e. children that may run at once.
    pub max_jobs: usize,
    /// Time out a child that prints nothing for this long.
    pub max_silent_time: Option<Duration>,
    /// Time out a child that runs for longer than this.
    pub build_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            keep_going: true,
            max_jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_silent_time: None,
            build_timeout: None,
        }
    }
}

/// A child process registered by a goal.  Its pipe fds are the event
/// sources the worker polls on the goal's behalf.
struct Child {
    goal: WeakGoalPtr,
    serial: u64,
    name: String,
    fds: Vec<RawFd>,
    in_build_slot: bool,
    respect_timeouts: bool,
    time_started: Instant,
    last_output: Instant,
    /// Track in the Chrome trace.
    tid: usize,
}

/// A per-goal deadline.
struct Timer {
    goal: WeakGoalPtr,
    serial: u64,
    name: String,
    deadline: Instant,
    limit: Duration,
}

/// A waitee finished; its waiter's `waitee_done` hook still has to run.
struct Notification {
    waiter: WeakGoalPtr,
    waitee: GoalPtr,
    result: ExitCode,
}

/// Tracks faked "thread ids" -- integers assigned to running children to
/// put their spans on separate tracks in a performance trace.
#[derive(Default)]
struct ThreadIds {
    /// An entry is true when claimed, false or nonexistent otherwise.
    slots: Vec<bool>,
}

impl ThreadIds {
    fn claim(&mut self) -> usize {
        match self.slots.iter().position(|&used| !used) {
            Some(idx) => {
                self.slots[idx] = true;
                idx
            }
            None => {
                let idx = self.slots.len();
                self.slots.push(true);
                idx
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot] = false;
    }
}

pub struct Worker<'a> {
    settings: Settings,
    store: &'a dyn Store,
    progress: &'a mut dyn Progress,
    registry: Registry,

    /// The goals the session was asked for.  The only strong references the
    /// worker holds; everything else is kept alive by its waiters.
    top_goals: Goals,
    /// Goals to run on the next pass, in the order they were woken.
    awake: VecDeque<WeakGoalPtr>,
    /// Serial of each goal in `awake`, and whether it was woken explicitly.
    /// Goals woken implicitly only run once they have no waitees left.
    awake_set: FxHashMap<u64, bool>,
    wanting_slot: WeakGoals,
    children: Vec<Child>,
    timers: Vec<Timer>,
    pending: VecDeque<Notification>,
    /// Finished goals whose `cleanup` has not run yet.
    to_clean: Vec<GoalPtr>,
    /// Build slots in use.
    nr_local_builds: usize,

    iterations: usize,
    counts: StateCounts,
    tids: ThreadIds,
}

impl<'a> Worker<'a> {
    pub fn new(settings: Settings, store: &'a dyn Store, progress: &'a mut dyn Progress) -> Self {
        Worker {
            settings,
            store,
            progress,
            registry: Registry::new(),
            top_goals: Goals::new(),
            awake: VecDeque::new(),
            awake_set: FxHashMap::default(),
            wanting_slot: WeakGoals::new(),
            children: Vec::new(),
            timers: Vec::new(),
            pending: VecDeque::new(),
            to_clean: Vec::new(),
            nr_local_builds: 0,
            iterations: 0,
            counts: StateCounts::default(),
            tids: ThreadIds::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Passes of the scheduling loop made so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn counts(&self) -> &StateCounts {
        &self.counts
    }

    /// Returns the goal registered for `key`, creating it if needed.
    pub fn make_goal<F>(&mut self, key: &str, factory: F) -> GoalPtr
    where
        F: FnOnce() -> Box<dyn Goal>,
    {
        self.registry.get_or_create(key, factory)
    }

    /// Realises every request and returns, for each, the view of its goal's
    /// result that concerns that request alone.  `make` maps a request to its
    /// goal, normally through the registry so that requests share goals.
    pub fn realize<F>(
        &mut self,
        reqs: &[DerivedPath],
        mut make: F,
    ) -> Result<Vec<KeyedBuildResult>, SchedulerError>
    where
        F: FnMut(&mut Registry, &DerivedPath) -> GoalPtr,
    {
        let state: Vec<(DerivedPath, GoalPtr)> = reqs
            .iter()
            .map(|req| (req.clone(), make(&mut self.registry, req)))
            .collect();
        let goals: Vec<GoalPtr> = state.iter().map(|(_, goal)| goal.clone()).collect();
        self.run(&goals)?;
        Ok(state
            .into_iter()
            .map(|(path, goal)| {
                let result = if goal.is_done() {
                    goal.get_build_result(&path)
                } else {
                    BuildResult {
                        error_msg: format!(
                            "{}: cancelled because another goal failed",
                            goal.name()
                        ),
                        ..BuildResult::default()
                    }
                };
                KeyedBuildResult { path, result }
            })
            .collect())
    }

    /// Runs until every goal in `goals` is finished.
    pub fn run(&mut self, goals: &[GoalPtr]) -> Result<(), SchedulerError> {
        for goal in goals {
            if !goal.is_done() {
                self.top_goals.insert(goal.clone());
                self.wake_up(goal);
            }
        }
        let res = self.run_loop();
        self.teardown();
        res
    }

    fn run_loop(&mut self) -> Result<(), SchedulerError> {
        self.wake_fresh();
        while !self.top_goals.is_empty() {
            self.iterations += 1;
            self.check_interrupt()?;

            // Run every goal that is awake at the start of the pass once.
            // Goals woken during the pass run on the next one.
            let awake: Vec<WeakGoalPtr> = self.awake.drain(..).collect();
            for weak in awake {
                let goal = match weak.upgrade() {
                    Some(goal) => goal,
                    None => continue,
                };
                let forced = self.awake_set.remove(&goal.serial()).unwrap_or(false);
                if goal.is_done() || (!forced && goal.has_waitees()) {
                    continue;
                }
                self.check_interrupt()?;
                self.step(&goal)?;
                if self.top_goals.is_empty() {
                    break;
                }
            }
            self.deliver()?;
            self.registry.prune();
            self.update_progress();

            if self.top_goals.is_empty() {
                break;
            }
            if self.has_event_sources() {
                // Goals still awake must not stop children and deadlines from
                // being serviced, so only block when nothing else can run.
                let block = self.awake.is_empty();
                trace::scope("worker.wait_for_input", || self.wait_for_input(block))?;
                continue;
            }
            if !self.awake.is_empty() {
                continue;
            }
            if !self.wanting_slot.is_empty() {
                if self.settings.max_jobs == 0 {
                    return Err(SchedulerError::NoBuildSlots);
                }
                // Nothing is running, so every slot is free.
                self.wake_slot_waiters();
                continue;
            }
            return Err(self.deadlock());
        }
        Ok(())
    }

    /// One call to a goal's `work`.
    fn step(&mut self, goal: &GoalPtr) -> Result<(), SchedulerError> {
        {
            let mut st = goal.state.borrow_mut();
            if st.build_result.start_time.is_none() {
                st.build_result.start_time = Some(SystemTime::now());
            }
        }
        debug!(goal = %goal.name(), "work");
        let step = {
            let mut inner = goal.inner.borrow_mut();
            let mut cx = Context { worker: self, goal };
            inner.work(&mut cx)?
        };
        if step == Step::Yield && !goal.is_done() {
            self.wake_up(goal);
        }
        self.after_callback()
    }

    /// Housekeeping after any goal hook ran.
    fn after_callback(&mut self) -> Result<(), SchedulerError> {
        self.wake_fresh();
        self.deliver()?;
        self.run_cleanups();
        Ok(())
    }

    /// Wakes goals created since the last call.
    fn wake_fresh(&mut self) {
        for weak in self.registry.take_fresh() {
            if let Some(goal) = weak.upgrade() {
                self.queue(&goal, false);
            }
        }
    }

    /// Schedules `goal` to run on the next pass even if it still has waitees.
    pub fn wake_up(&mut self, goal: &GoalPtr) {
        self.queue(goal, true);
    }

    fn queue(&mut self, goal: &GoalPtr, forced: bool) {
        if goal.is_done() {
            return;
        }
        match self.awake_set.get_mut(&goal.serial()) {
            Some(f) => *f |= forced,
            None => {
                self.awake_set.insert(goal.serial(), forced);
                self.awake.push_back(Rc::downgrade(goal));
            }
        }
    }

    /// Makes `waiter` wait for `waitee`.  Waiting for a finished goal is
    /// immediate: a success is ignored, a failure is counted right away.
    pub fn add_waitee(&mut self, waiter: &GoalPtr, waitee: GoalPtr) -> Result<(), SchedulerError> {
        if Rc::ptr_eq(waiter, &waitee) {
            return Err(SchedulerError::SelfWaitee {
                goal: waiter.name().to_string(),
            });
        }
        if waiter.is_done() {
            return Err(SchedulerError::AlreadyDone {
                goal: waiter.name().to_string(),
            });
        }
        match waitee.exit_code() {
            ExitCode::Success => Ok(()),
            ExitCode::Busy => {
                {
                    let mut st = waiter.state.borrow_mut();
                    if !st.waitees.insert(waitee.clone()) {
                        return Ok(());
                    }
                    st.registered.insert(waitee.serial());
                }
                waitee.state.borrow_mut().waiters.insert(waiter);
                debug!(goal = %waiter.name(), waitee = %waitee.name(), "added waitee");
                Ok(())
            }
            result => {
                let first = waiter.state.borrow_mut().registered.insert(waitee.serial());
                if first {
                    self.waitee_finished(waiter, &waitee, result);
                }
                Ok(())
            }
        }
    }

    /// Base bookkeeping for a finished waitee: drop the edge, count the
    /// failure, wake the waiter if it has nothing left to wait for, and queue
    /// its `waitee_done` hook.
    fn waitee_finished(&mut self, waiter: &GoalPtr, waitee: &GoalPtr, result: ExitCode) {
        let (left, released) = {
            let mut st = waiter.state.borrow_mut();
            st.waitees.remove(waitee);
            st.counts.record(result);
            let mut released = Vec::new();
            if result == ExitCode::Failed && !self.settings.keep_going {
                released = st.waitees.iter().cloned().collect();
                st.waitees.clear();
            }
            (st.waitees.len(), released)
        };
        for other in &released {
            other.state.borrow_mut().waiters.remove(waiter);
        }
        debug!(
            goal = %waiter.name(),
            waitee = %waitee.name(),
            ?result,
            left,
            "waitee done"
        );
        self.pending.push_back(Notification {
            waiter: Rc::downgrade(waiter),
            waitee: waitee.clone(),
            result,
        });
        if left == 0 {
            self.queue(waiter, false);
        }
    }

    /// Finishes `goal`.  The only way a goal becomes terminal.
    pub fn am_done(
        &mut self,
        goal: &GoalPtr,
        result: ExitCode,
        err: Option<GoalError>,
    ) -> Result<(), SchedulerError> {
        if !result.is_done() {
            return Err(SchedulerError::NotTerminal {
                goal: goal.name().to_string(),
            });
        }
        let (waiters, released) = {
            let mut st = goal.state.borrow_mut();
            if st.exit_code.is_done() {
                return Err(SchedulerError::AlreadyDone {
                    goal: goal.name().to_string(),
                });
            }
            st.exit_code = result;
            let res = &mut st.build_result;
            res.stop_time = Some(SystemTime::now());
            if let Some(err) = &err {
                res.status = err.status;
                if res.error_msg.is_empty() {
                    res.error_msg = err.msg.clone();
                }
            }
            match result {
                ExitCode::Success if !res.status.is_success() => res.status = BuildStatus::Built,
                ExitCode::NoSubstituters if res.status == BuildStatus::MiscFailure => {
                    res.status = BuildStatus::NoSubstituters
                }
                ExitCode::IncompleteClosure if res.status == BuildStatus::MiscFailure => {
                    res.status = BuildStatus::DependencyFailed
                }
                _ => {}
            }
            if let Some(err) = err {
                if !st.waiters.is_empty() {
                    error!(goal = %goal.name(), "{}", err);
                }
                st.error = Some(err);
            }
            let waiters = std::mem::take(&mut st.waiters).upgrade_all();
            let released: Vec<GoalPtr> = st.waitees.iter().cloned().collect();
            st.waitees.clear();
            (waiters, released)
        };
        debug!(goal = %goal.name(), ?result, "done");

        for waitee in &released {
            waitee.state.borrow_mut().waiters.remove(goal);
        }
        for waiter in &waiters {
            self.waitee_finished(waiter, goal, result);
        }

        if result == ExitCode::Success {
            self.counts.succeeded += 1;
        } else {
            self.counts.failed += 1;
        }
        {
            let st = goal.state.borrow();
            self.progress
                .goal_finished(goal.name(), result, st.error.as_ref());
        }

        // The goal no longer needs anything from the worker.
        self.release_child(goal.serial(), true);
        self.timers.retain(|t| t.serial != goal.serial());
        self.wanting_slot.remove(goal);
        self.awake_set.remove(&goal.serial());

        if self.top_goals.remove(goal).is_some() && result.is_failure() && !self.settings.keep_going {
            debug!(goal = %goal.name(), "top-level goal failed; stopping");
            self.top_goals.clear();
        }

        self.to_clean.push(goal.clone());
        Ok(())
    }

    fn run_cleanups(&mut self) {
        let mut busy = Vec::new();
        for goal in std::mem::take(&mut self.to_clean) {
            let cleaned = goal
                .inner
                .try_borrow_mut()
                .map(|mut inner| inner.cleanup())
                .is_ok();
            if !cleaned {
                // Still inside one of its own hooks; try again later.
                busy.push(goal);
            }
        }
        self.to_clean = busy;
    }

    /// Runs queued `waitee_done` hooks.
    fn deliver(&mut self) -> Result<(), SchedulerError> {
        while let Some(n) = self.pending.pop_front() {
            let waiter = match n.waiter.upgrade() {
                Some(waiter) => waiter,
                None => continue,
            };
            if waiter.is_done() {
                continue;
            }
            {
                let mut inner = waiter.inner.borrow_mut();
                let mut cx = Context {
                    worker: self,
                    goal: &waiter,
                };
                inner.waitee_done(&mut cx, &n.waitee, n.result)?;
            }
            self.wake_fresh();
            self.run_cleanups();
        }
        Ok(())
    }

    pub fn can_build_more(&self) -> bool {
        self.nr_local_builds < self.settings.max_jobs
    }

    fn wait_for_build_slot(&mut self, goal: &GoalPtr) {
        if self.can_build_more() {
            self.wake_up(goal);
        } else {
            self.wanting_slot.insert(goal);
        }
    }

    fn wake_slot_waiters(&mut self) {
        let waiting = std::mem::take(&mut self.wanting_slot).upgrade_all();
        for goal in &waiting {
            self.wake_up(goal);
        }
    }

    fn child_started(
        &mut self,
        goal: &GoalPtr,
        fds: Vec<RawFd>,
        in_build_slot: bool,
        respect_timeouts: bool,
    ) {
        let now = Instant::now();
        if in_build_slot {
            self.nr_local_builds += 1;
        }
        self.children.push(Child {
            goal: Rc::downgrade(goal),
            serial: goal.serial(),
            name: goal.name().to_string(),
            fds,
            in_build_slot,
            respect_timeouts,
            time_started: now,
            last_output: now,
            tid: self.tids.claim(),
        });
        self.counts.running = self.children.len();
        self.progress.goal_started(goal.name());
    }

    /// Forgets the child of goal `serial`, if it has one.
    fn release_child(&mut self, serial: u64, wake_sleepers: bool) {
        let idx = match self.children.iter().position(|c| c.serial == serial) {
            Some(idx) => idx,
            None => return,
        };
        let child = self.children.remove(idx);
        self.tids.release(child.tid);
        trace::span(&child.name, child.time_started, Instant::now(), child.tid);
        if child.in_build_slot {
            self.nr_local_builds = self.nr_local_builds.saturating_sub(1);
            if wake_sleepers {
                self.wake_slot_waiters();
            }
        }
        self.counts.running = self.children.len();
    }

    fn set_deadline(&mut self, goal: &GoalPtr, limit: Duration) {
        self.timers.retain(|t| t.serial != goal.serial());
        self.timers.push(Timer {
            goal: Rc::downgrade(goal),
            serial: goal.serial(),
            name: goal.name().to_string(),
            deadline: Instant::now() + limit,
            limit,
        });
    }

    fn has_event_sources(&self) -> bool {
        !self.timers.is_empty()
            || self
                .children
                .iter()
                .any(|c| !c.fds.is_empty() || self.child_deadline(c).is_some())
    }

    fn child_deadline(&self, child: &Child) -> Option<Instant> {
        if !child.respect_timeouts {
            return None;
        }
        let silent = self.settings.max_silent_time.map(|t| child.last_output + t);
        let total = self.settings.build_timeout.map(|t| child.time_started + t);
        match (silent, total) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.children
            .iter()
            .filter_map(|c| self.child_deadline(c))
            .chain(self.timers.iter().map(|t| t.deadline))
            .min()
    }

    /// Waits until a child has output or a deadline passes, then routes
    /// what happened to the goals concerned.  Without `block`, only picks up
    /// what is already there.
    fn wait_for_input(&mut self, block: bool) -> Result<(), SchedulerError> {
        let timeout_ms: libc::c_int = match self.next_deadline() {
            _ if !block => 0,
            None => -1,
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                // Round up so we don't wake just before the deadline.
                (left.as_millis() + 1).min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        let mut pollfds: Vec<libc::pollfd> = self
            .children
            .iter()
            .flat_map(|c| c.fds.iter())
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        // Safety: pollfds is a valid array of pollfd for its whole length.
        let ret = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }

        let now = Instant::now();
        for pfd in pollfds.iter().filter(|p| p.revents != 0) {
            let mut buf = [0u8; 4096];
            // Safety: buf is valid for writes of buf.len() bytes.
            let n = unsafe {
                libc::read(
                    pfd.fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
                ) {
                    continue;
                }
                // Anything else (EIO from a closed pty, say) counts as EOF.
            }

            let goal = match self.children.iter_mut().find(|c| c.fds.contains(&pfd.fd)) {
                Some(child) => {
                    if n > 0 {
                        child.last_output = now;
                    } else {
                        child.fds.retain(|&fd| fd != pfd.fd);
                    }
                    child.goal.upgrade()
                }
                // The goal finished while handling an earlier fd.
                None => continue,
            };
            let goal = match goal {
                Some(goal) if !goal.is_done() => goal,
                _ => continue,
            };

            {
                let mut inner = goal.inner.borrow_mut();
                let mut cx = Context {
                    worker: self,
                    goal: &goal,
                };
                if n > 0 {
                    inner.handle_child_output(&mut cx, pfd.fd, &buf[..n as usize])?;
                } else {
                    inner.handle_eof(&mut cx, pfd.fd)?;
                }
            }
            self.after_callback()?;
        }

        // Children whose goal went away behind our back.
        let dead: Vec<u64> = self
            .children
            .iter()
            .filter(|c| c.goal.strong_count() == 0)
            .map(|c| c.serial)
            .collect();
        for serial in dead {
            self.release_child(serial, true);
        }

        self.check_timeouts()
    }

    fn check_timeouts(&mut self) -> Result<(), SchedulerError> {
        let now = Instant::now();
        let mut expired: Vec<(WeakGoalPtr, GoalError)> = Vec::new();

        for child in self.children.iter().filter(|c| c.respect_timeouts) {
            if let Some(limit) = self.settings.max_silent_time {
                if now >= child.last_output + limit {
                    expired.push((
                        child.goal.clone(),
                        GoalError::timed_out(format!(
                            "'{}' timed out after {} seconds of silence",
                            child.name,
                            limit.as_secs()
                        )),
                    ));
                    continue;
                }
            }
            if let Some(limit) = self.settings.build_timeout {
                if now >= child.time_started + limit {
                    expired.push((
                        child.goal.clone(),
                        GoalError::timed_out(format!(
                            "'{}' timed out after {} seconds",
                            child.name,
                            limit.as_secs()
                        )),
                    ));
                }
            }
        }

        let mut timers = Vec::new();
        for timer in std::mem::take(&mut self.timers) {
            if now >= timer.deadline {
                expired.push((
                    timer.goal,
                    GoalError::timed_out(format!(
                        "'{}' timed out after {} seconds",
                        timer.name,
                        timer.limit.as_secs()
                    )),
                ));
            } else {
                timers.push(timer);
            }
        }
        self.timers = timers;

        for (weak, err) in expired {
            if let Some(goal) = weak.upgrade() {
                if !goal.is_done() {
                    self.time_out(&goal, err)?;
                }
            }
        }
        Ok(())
    }

    fn time_out(&mut self, goal: &GoalPtr, err: GoalError) -> Result<(), SchedulerError> {
        debug!(goal = %goal.name(), "{}", err);
        {
            let mut inner = goal.inner.borrow_mut();
            let mut cx = Context { worker: self, goal };
            inner.timed_out(&mut cx, err.clone())?;
        }
        if !goal.is_done() {
            warn!(goal = %goal.name(), "goal still busy after timing out; failing it");
            self.am_done(goal, ExitCode::Failed, Some(err))?;
        }
        self.after_callback()
    }

    fn check_interrupt(&self) -> Result<(), SchedulerError> {
        if signal::interrupted() {
            return Err(SchedulerError::Interrupted);
        }
        Ok(())
    }

    fn update_progress(&mut self) {
        self.counts.total = self.registry.created();
        self.progress.update(&self.counts);
    }

    /// Every goal reachable from the top-level goals and the registry.
    fn reachable(&self) -> Vec<GoalPtr> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        let mut stack: Vec<GoalPtr> = self.top_goals.iter().cloned().collect();
        stack.extend(self.registry.live());
        while let Some(goal) = stack.pop() {
            if !seen.insert(goal.serial()) {
                continue;
            }
            stack.extend(goal.waitees());
            out.push(goal);
        }
        out.sort_by_key(|g| g.serial());
        out
    }

    fn deadlock(&self) -> SchedulerError {
        let stuck: Vec<String> = self
            .reachable()
            .into_iter()
            .filter(|g| !g.is_done())
            .map(|g| g.name().to_string())
            .collect();
        error!(?stuck, "no goal can make progress");
        SchedulerError::Deadlock { stuck }
    }

    /// Drops all worker state and cuts the waitee edges of anything still
    /// reachable, so no goal outlives the session through a cycle.
    fn teardown(&mut self) {
        for goal in self.reachable() {
            if let Ok(mut st) = goal.state.try_borrow_mut() {
                st.waitees.clear();
                st.waiters = WeakGoals::new();
            }
        }
        self.top_goals.clear();
        self.awake.clear();
        self.awake_set.clear();
        self.wanting_slot = WeakGoals::new();
        self.children.clear();
        self.timers.clear();
        self.pending.clear();
        self.run_cleanups();
        self.nr_local_builds = 0;
    }
}

/// A goal's handle on the worker while one of its hooks runs.
pub struct Context<'w, 'a> {
    worker: &'w mut Worker<'a>,
    goal: &'w GoalPtr,
}

impl<'w, 'a> Context<'w, 'a> {
    /// The goal whose hook is running.
    pub fn goal(&self) -> &GoalPtr {
        self.goal
    }

    pub fn settings(&self) -> &Settings {
        &self.worker.settings
    }

    pub fn store(&self) -> &dyn Store {
        self.worker.store
    }

    pub fn progress(&mut self) -> &mut dyn Progress {
        &mut *self.worker.progress
    }

    pub fn registry(&mut self) -> &mut Registry {
        &mut self.worker.registry
    }

    pub fn make_goal<F>(&mut self, key: &str, factory: F) -> GoalPtr
    where
        F: FnOnce() -> Box<dyn Goal>,
    {
        self.worker.make_goal(key, factory)
    }

    pub fn add_waitee(&mut self, waitee: GoalPtr) -> Result<(), SchedulerError> {
        let goal = self.goal;
        self.worker.add_waitee(goal, waitee)
    }

    pub fn am_done(&mut self, result: ExitCode, err: Option<GoalError>) -> Result<(), SchedulerError> {
        let goal = self.goal;
        self.worker.am_done(goal, result, err)
    }

    /// Run again on the next pass, whether or not waitees are outstanding.
    pub fn wake_up(&mut self) {
        let goal = self.goal;
        self.worker.wake_up(goal)
    }

    pub fn counts(&self) -> FailureCounts {
        self.goal.counts()
    }

    pub fn nr_waitees(&self) -> usize {
        self.goal.state.borrow().waitees.len()
    }

    /// Updates the goal's result record.  Fails once the goal is finished:
    /// a finished goal's result never changes.
    pub fn update_result<F>(&mut self, f: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut BuildResult),
    {
        let mut st = self.goal.state.borrow_mut();
        if st.exit_code.is_done() {
            return Err(SchedulerError::AlreadyDone {
                goal: self.goal.name().to_string(),
            });
        }
        f(&mut st.build_result);
        Ok(())
    }

    /// Registers a child process; the worker polls `fds` and calls
    /// `handle_child_output`/`handle_eof` for them.
    pub fn child_started(&mut self, fds: Vec<RawFd>, in_build_slot: bool, respect_timeouts: bool) {
        let goal = self.goal;
        self.worker
            .child_started(goal, fds, in_build_slot, respect_timeouts)
    }

    /// The goal's child is gone.  Frees its build slot; with `wake_sleepers`
    /// goals waiting for a slot get to retry.
    pub fn child_terminated(&mut self, wake_sleepers: bool) {
        let serial = self.goal.serial();
        self.worker.release_child(serial, wake_sleepers)
    }

    pub fn can_build_more(&self) -> bool {
        self.worker.can_build_more()
    }

    /// Park until a build slot is free.
    pub fn wait_for_build_slot(&mut self) {
        let goal = self.goal;
        self.worker.wait_for_build_slot(goal)
    }

    /// Time the goal out if it is still busy `limit` from now.
    pub fn set_deadline(&mut self, limit: Duration) {
        let goal = self.goal;
        self.worker.set_deadline(goal, limit)
    }
}
