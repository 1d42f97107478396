//! The outcome of realising something, and the per-request projection of it.

use crate::derived_path::{DerivedPath, StorePath};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BuildStatus {
    Built,
    Substituted,
    AlreadyValid,
    PermanentFailure,
    InputRejected,
    OutputRejected,
    TransientFailure,
    TimedOut,
    MiscFailure,
    DependencyFailed,
    NoSubstituters,
}

impl BuildStatus {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            BuildStatus::Built | BuildStatus::Substituted | BuildStatus::AlreadyValid
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildStatus::Built => "built",
            BuildStatus::Substituted => "substituted",
            BuildStatus::AlreadyValid => "already valid",
            BuildStatus::PermanentFailure => "permanent failure",
            BuildStatus::InputRejected => "input rejected",
            BuildStatus::OutputRejected => "output rejected",
            BuildStatus::TransientFailure => "transient failure",
            BuildStatus::TimedOut => "timed out",
            BuildStatus::MiscFailure => "failed",
            BuildStatus::DependencyFailed => "dependency failed",
            BuildStatus::NoSubstituters => "no substituters",
        })
    }
}

/// Everything a goal learned while it ran.  A goal shared between several
/// requests accumulates the union of what they asked for, so callers only
/// ever see it through `project`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub status: BuildStatus,
    pub error_msg: String,
    /// How many times the output was built in this session.
    pub times_built: u32,
    /// Output name to the path that now holds it.
    pub built_outputs: BTreeMap<String, StorePath>,
    pub start_time: Option<SystemTime>,
    pub stop_time: Option<SystemTime>,
}

impl Default for BuildResult {
    fn default() -> Self {
        BuildResult {
            status: BuildStatus::MiscFailure,
            error_msg: String::new(),
            times_built: 0,
            built_outputs: BTreeMap::new(),
            start_time: None,
            stop_time: None,
        }
    }
}

impl BuildResult {
    pub fn success(&self) -> bool {
        self.status.is_success()
    }

    /// The view of this result that only `req` is entitled to: outputs the
    /// request did not ask for are dropped, so the answer depends on the
    /// caller's own request alone.
    pub fn project(&self, req: &DerivedPath) -> BuildResult {
        let mut res = self.clone();
        match req {
            DerivedPath::Built { outputs, .. } => {
                res.built_outputs.retain(|name, _| outputs.contains(name));
            }
            DerivedPath::Opaque(_) => res.built_outputs.clear(),
        }
        res
    }
}

/// A projected result paired with the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedBuildResult {
    pub path: DerivedPath,
    pub result: BuildResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(s: &str) -> StorePath {
        StorePath::new(s).unwrap()
    }

    fn union_result() -> BuildResult {
        let mut res = BuildResult::default();
        res.status = BuildStatus::Built;
        res.times_built = 1;
        res.built_outputs.insert("out".into(), sp("store/hello"));
        res.built_outputs.insert("dev".into(), sp("store/hello-dev"));
        res.built_outputs.insert("doc".into(), sp("store/hello-doc"));
        res
    }

    #[test]
    fn project_keeps_requested_outputs() {
        let res = union_result();
        let view = res.project(&DerivedPath::parse("hello.drv^out").unwrap());
        assert_eq!(view.built_outputs.len(), 1);
        assert_eq!(view.built_outputs["out"], sp("store/hello"));
        assert_eq!(view.status, BuildStatus::Built);
        assert_eq!(view.times_built, 1);

        let view = res.project(&DerivedPath::parse("hello.drv^*").unwrap());
        assert_eq!(view.built_outputs.len(), 3);
    }

    #[test]
    fn project_ignores_unknown_names() {
        let res = union_result();
        let view = res.project(&DerivedPath::parse("hello.drv^man,dev").unwrap());
        assert_eq!(view.built_outputs.keys().collect::<Vec<_>>(), vec!["dev"]);
    }

    #[test]
    fn project_opaque_has_no_outputs() {
        let res = union_result();
        let view = res.project(&DerivedPath::parse("store/hello").unwrap());
        assert!(view.built_outputs.is_empty());
        assert!(view.success());
    }

    #[test]
    fn default_is_failure() {
        assert!(!BuildResult::default().success());
    }
}
