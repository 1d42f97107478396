//! Makes a single store path valid by running its substitute command, after
//! the paths it references.

use super::{append_log, expand, log_tail, prepare_outputs, Planner};
use crate::build_result::BuildStatus;
use crate::derived_path::StorePath;
use crate::error::{GoalError, SchedulerError};
use crate::goal::{ExitCode, Goal, Step};
use crate::process::{Process, Termination};
use crate::worker::Context;
use rustc_hash::FxHashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use tracing::debug;

enum State {
    Init,
    /// Waiting for references to become valid.
    References,
    /// Waiting for a build slot.
    Slot,
    Running { process: Process, log: Vec<u8> },
    Finished,
}

pub struct SubstitutionGoal {
    planner: Rc<Planner>,
    path: StorePath,
    state: State,
}

impl SubstitutionGoal {
    pub fn new(planner: Rc<Planner>, path: StorePath) -> Self {
        SubstitutionGoal {
            planner,
            path,
            state: State::Init,
        }
    }

    pub fn key_for(path: &StorePath) -> String {
        format!("a${}", path)
    }

    fn init(&mut self, cx: &mut Context<'_, '_>) -> Result<Step, SchedulerError> {
        if cx.store().is_valid_path(&self.path) {
            cx.update_result(|res| res.status = BuildStatus::AlreadyValid)?;
            return self.finish(cx, ExitCode::Success, None);
        }

        let references = match self.planner.manifest().path_info(&self.path) {
            Some(info) if info.substitute.is_some() => info.references.clone(),
            _ => {
                let err = GoalError::new(
                    BuildStatus::NoSubstituters,
                    format!(
                        "path '{}' is required, but there is no substituter that can build it",
                        self.path
                    ),
                );
                return self.finish(cx, ExitCode::NoSubstituters, Some(err));
            }
        };

        for reference in references.iter().filter(|r| **r != self.path) {
            let goal = self.planner.substitution_goal(cx.registry(), reference);
            cx.add_waitee(goal)?;
        }
        self.state = State::References;
        if cx.nr_waitees() == 0 {
            return self.references_done(cx);
        }
        Ok(Step::Suspend)
    }

    fn references_done(&mut self, cx: &mut Context<'_, '_>) -> Result<Step, SchedulerError> {
        let counts = cx.counts();
        if counts.total() > 0 {
            // A reference nobody can supply makes our closure incomplete; a
            // reference that merely failed is an ordinary failure.
            let result = if counts.no_substituters > 0 || counts.incomplete_closure > 0 {
                ExitCode::IncompleteClosure
            } else {
                ExitCode::Failed
            };
            let err = GoalError::new(
                BuildStatus::DependencyFailed,
                format!(
                    "some references of path '{}' could not be realised",
                    self.path
                ),
            );
            return self.finish(cx, result, Some(err));
        }
        self.try_to_run(cx)
    }

    fn try_to_run(&mut self, cx: &mut Context<'_, '_>) -> Result<Step, SchedulerError> {
        if !cx.can_build_more() {
            debug!(path = %self.path, "waiting for a build slot");
            self.state = State::Slot;
            cx.wait_for_build_slot();
            return Ok(Step::Suspend);
        }

        let template = self
            .planner
            .manifest()
            .path_info(&self.path)
            .and_then(|info| info.substitute.clone())
            .unwrap_or_default();
        let mut vars = FxHashMap::default();
        vars.insert("out", self.path.to_string());
        let cmdline = expand(&template, &vars);

        let spawned = prepare_outputs([&self.path])
            .map_err(anyhow::Error::from)
            .and_then(|()| Process::spawn(&cmdline));
        match spawned {
            Ok(process) => {
                cx.child_started(vec![process.fd()], true, true);
                self.state = State::Running {
                    process,
                    log: Vec::new(),
                };
                Ok(Step::Suspend)
            }
            Err(err) => {
                let err = GoalError::new(
                    BuildStatus::MiscFailure,
                    format!("substituting '{}': {}", self.path, err),
                );
                self.finish(cx, ExitCode::Failed, Some(err))
            }
        }
    }

    fn finish(
        &mut self,
        cx: &mut Context<'_, '_>,
        result: ExitCode,
        err: Option<GoalError>,
    ) -> Result<Step, SchedulerError> {
        self.state = State::Finished;
        cx.am_done(result, err)?;
        Ok(Step::Suspend)
    }
}

impl Goal for SubstitutionGoal {
    fn key(&self) -> String {
        Self::key_for(&self.path)
    }

    fn name(&self) -> String {
        self.path.to_string()
    }

    fn work(&mut self, cx: &mut Context<'_, '_>) -> Result<Step, SchedulerError> {
        match self.state {
            State::Init => self.init(cx),
            State::References => self.references_done(cx),
            State::Slot => self.try_to_run(cx),
            State::Running { .. } | State::Finished => Ok(Step::Suspend),
        }
    }

    fn handle_child_output(
        &mut self,
        cx: &mut Context<'_, '_>,
        _fd: RawFd,
        data: &[u8],
    ) -> Result<(), SchedulerError> {
        if let State::Running { log, .. } = &mut self.state {
            append_log(log, data);
            cx.progress().goal_output(self.path.as_str(), data);
        }
        Ok(())
    }

    fn handle_eof(&mut self, cx: &mut Context<'_, '_>, _fd: RawFd) -> Result<(), SchedulerError> {
        let (mut process, log) = match std::mem::replace(&mut self.state, State::Finished) {
            State::Running { process, log } => (process, log),
            other => {
                self.state = other;
                return Ok(());
            }
        };
        let termination = process.wait();
        cx.child_terminated(true);

        let (result, err) = match termination {
            Ok(Termination::Success) if cx.store().is_valid_path(&self.path) => {
                cx.update_result(|res| res.status = BuildStatus::Substituted)?;
                (ExitCode::Success, None)
            }
            Ok(Termination::Success) => (
                ExitCode::Failed,
                Some(GoalError::new(
                    BuildStatus::MiscFailure,
                    format!("substituter did not produce path '{}'", self.path),
                )),
            ),
            Ok(Termination::Interrupted) => (
                ExitCode::Failed,
                Some(GoalError::new(
                    BuildStatus::MiscFailure,
                    format!("substitution of '{}' was interrupted", self.path),
                )),
            ),
            Ok(Termination::Failure(how)) => (
                ExitCode::Failed,
                Some(GoalError::new(
                    BuildStatus::TransientFailure,
                    format!(
                        "substitution of '{}' failed with {}{}",
                        self.path,
                        how,
                        log_tail(&log)
                    ),
                )),
            ),
            Err(err) => (
                ExitCode::Failed,
                Some(GoalError::new(
                    BuildStatus::MiscFailure,
                    format!("substituting '{}': {}", self.path, err),
                )),
            ),
        };
        self.finish(cx, result, err)?;
        Ok(())
    }

    fn timed_out(&mut self, cx: &mut Context<'_, '_>, err: GoalError) -> Result<(), SchedulerError> {
        if let State::Running { process, .. } = &mut self.state {
            process.kill();
        }
        self.finish(cx, ExitCode::Failed, Some(err))?;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.state = State::Finished;
    }
}
