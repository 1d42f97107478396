//! Builds every output of a derivation by running its command, once all of
//! its inputs are realised.

use super::{append_log, expand, log_tail, prepare_outputs, Planner};
use crate::build_result::BuildStatus;
use crate::derived_path::StorePath;
use crate::error::{GoalError, SchedulerError};
use crate::goal::{ExitCode, Goal, Step};
use crate::manifest::Derivation;
use crate::process::{Process, Termination};
use crate::worker::Context;
use rustc_hash::FxHashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use tracing::debug;

enum State {
    Init,
    Inputs(Rc<Derivation>),
    Slot(Rc<Derivation>),
    Running {
        drv: Rc<Derivation>,
        process: Process,
        log: Vec<u8>,
    },
    Finished,
}

pub struct DerivationGoal {
    planner: Rc<Planner>,
    drv_path: StorePath,
    state: State,
}

impl DerivationGoal {
    pub fn new(planner: Rc<Planner>, drv_path: StorePath) -> Self {
        DerivationGoal {
            planner,
            drv_path,
            state: State::Init,
        }
    }

    pub fn key_for(drv_path: &StorePath) -> String {
        format!("b${}", drv_path)
    }

    fn init(&mut self, cx: &mut Context<'_, '_>) -> Result<Step, SchedulerError> {
        let drv = match self.planner.manifest().derivation(&self.drv_path) {
            Some(drv) => Rc::new(drv.clone()),
            None => {
                let err = GoalError::new(
                    BuildStatus::MiscFailure,
                    format!("don't know how to build '{}'", self.drv_path),
                );
                return self.finish(cx, ExitCode::Failed, Some(err));
            }
        };

        if drv.outputs.values().all(|p| cx.store().is_valid_path(p)) {
            cx.update_result(|res| {
                res.status = BuildStatus::AlreadyValid;
                res.built_outputs = drv.outputs.clone();
            })?;
            return self.finish(cx, ExitCode::Success, None);
        }

        for input in &drv.inputs {
            let goal = self.planner.goal_for(cx.registry(), input);
            cx.add_waitee(goal)?;
        }
        self.state = State::Inputs(drv.clone());
        if cx.nr_waitees() == 0 {
            return self.inputs_done(cx, drv);
        }
        Ok(Step::Suspend)
    }

    fn inputs_done(
        &mut self,
        cx: &mut Context<'_, '_>,
        drv: Rc<Derivation>,
    ) -> Result<Step, SchedulerError> {
        // Whatever way an input failed, this build cannot run.
        let failed = cx.counts().total();
        if failed > 0 {
            let err = GoalError::new(
                BuildStatus::DependencyFailed,
                format!(
                    "cannot build '{}': {} dependencies couldn't be realised",
                    self.drv_path, failed
                ),
            );
            return self.finish(cx, ExitCode::Failed, Some(err));
        }
        if drv.command.is_none() {
            let err = GoalError::new(
                BuildStatus::MiscFailure,
                format!("derivation '{}' has no command", self.drv_path),
            );
            return self.finish(cx, ExitCode::Failed, Some(err));
        }
        self.try_to_build(cx, drv)
    }

    fn command_line(&self, drv: &Derivation) -> String {
        let mut vars = FxHashMap::default();
        for (name, path) in &drv.outputs {
            vars.insert(name.as_str(), path.to_string());
        }
        let ins: Vec<String> = drv
            .inputs
            .iter()
            .flat_map(|input| self.planner.input_paths(input))
            .map(|path| path.to_string())
            .collect();
        vars.insert("in", ins.join(" "));
        expand(drv.command.as_deref().unwrap_or_default(), &vars)
    }

    fn try_to_build(
        &mut self,
        cx: &mut Context<'_, '_>,
        drv: Rc<Derivation>,
    ) -> Result<Step, SchedulerError> {
        if !cx.can_build_more() {
            debug!(drv = %self.drv_path, "waiting for a build slot");
            self.state = State::Slot(drv);
            cx.wait_for_build_slot();
            return Ok(Step::Suspend);
        }

        let cmdline = self.command_line(&drv);
        let spawned = prepare_outputs(drv.outputs.values())
            .map_err(anyhow::Error::from)
            .and_then(|()| Process::spawn(&cmdline));
        match spawned {
            Ok(process) => {
                cx.child_started(vec![process.fd()], true, true);
                if let Some(limit) = drv.timeout {
                    cx.set_deadline(limit);
                }
                self.state = State::Running {
                    drv,
                    process,
                    log: Vec::new(),
                };
                Ok(Step::Suspend)
            }
            Err(err) => {
                let err = GoalError::new(
                    BuildStatus::MiscFailure,
                    format!("building '{}': {}", self.drv_path, err),
                );
                self.finish(cx, ExitCode::Failed, Some(err))
            }
        }
    }

    fn build_done(
        &mut self,
        cx: &mut Context<'_, '_>,
        drv: &Derivation,
        termination: anyhow::Result<Termination>,
        log: &[u8],
    ) -> Result<Step, SchedulerError> {
        let err = match termination {
            Ok(Termination::Success) => {
                match drv.outputs.values().find(|p| !cx.store().is_valid_path(p)) {
                    Some(missing) => Some(GoalError::new(
                        BuildStatus::OutputRejected,
                        format!(
                            "builder for '{}' failed to produce output path '{}'",
                            self.drv_path, missing
                        ),
                    )),
                    None => None,
                }
            }
            Ok(Termination::Interrupted) => Some(GoalError::new(
                BuildStatus::MiscFailure,
                format!("build of '{}' was interrupted", self.drv_path),
            )),
            Ok(Termination::Failure(how)) => Some(GoalError::new(
                BuildStatus::PermanentFailure,
                format!(
                    "builder for '{}' failed with {}{}",
                    self.drv_path,
                    how,
                    log_tail(log)
                ),
            )),
            Err(err) => Some(GoalError::new(
                BuildStatus::MiscFailure,
                format!("building '{}': {}", self.drv_path, err),
            )),
        };
        match err {
            None => {
                cx.update_result(|res| {
                    res.status = BuildStatus::Built;
                    res.times_built = 1;
                    res.built_outputs = drv.outputs.clone();
                })?;
                self.finish(cx, ExitCode::Success, None)
            }
            Some(err) => self.finish(cx, ExitCode::Failed, Some(err)),
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

impl Goal for DerivationGoal {
    fn key(&self) -> String {
        Self::key_for(&self.drv_path)
    }

    fn name(&self) -> String {
        self.drv_path.to_string()
    }

    fn work(&mut self, cx: &mut Context<'_, '_>) -> Result<Step, SchedulerError> {
        match &self.state {
            State::Init => self.init(cx),
            State::Inputs(drv) => {
                let drv = drv.clone();
                self.inputs_done(cx, drv)
            }
            State::Slot(drv) => {
                let drv = drv.clone();
                self.try_to_build(cx, drv)
            }
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
            cx.progress().goal_output(self.drv_path.as_str(), data);
        }
        Ok(())
    }

    fn handle_eof(&mut self, cx: &mut Context<'_, '_>, _fd: RawFd) -> Result<(), SchedulerError> {
        let (drv, mut process, log) = match std::mem::replace(&mut self.state, State::Finished) {
            State::Running { drv, process, log } => (drv, process, log),
            other => {
                self.state = other;
                return Ok(());
            }
        };
        let termination = process.wait();
        cx.child_terminated(true);
        self.build_done(cx, &drv, termination, &log)?;
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
