//! Concrete goal kinds driven by a plan file, and the planner that maps
//! requests to them.

mod derivation;
mod substitution;

pub use derivation::DerivationGoal;
pub use substitution::SubstitutionGoal;

use crate::derived_path::{DerivedPath, StorePath};
use crate::goal::GoalPtr;
use crate::manifest::Manifest;
use crate::registry::Registry;
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Lines of child output quoted in a failure message.
const LOG_TAIL_LINES: usize = 10;
/// Child output kept per goal, for quoting on failure.
const LOG_LIMIT: usize = 64 * 1024;

/// Maps requests to goals, sharing one goal per key through the registry.
pub struct Planner {
    manifest: Manifest,
}

impl Planner {
    pub fn new(manifest: Manifest) -> Rc<Self> {
        Rc::new(Planner { manifest })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn goal_for(self: &Rc<Self>, registry: &mut Registry, req: &DerivedPath) -> GoalPtr {
        match req {
            DerivedPath::Opaque(path) => self.substitution_goal(registry, path),
            DerivedPath::Built { drv_path, .. } => self.derivation_goal(registry, drv_path),
        }
    }

    pub fn substitution_goal(self: &Rc<Self>, registry: &mut Registry, path: &StorePath) -> GoalPtr {
        registry.get_or_create(&SubstitutionGoal::key_for(path), || {
            Box::new(SubstitutionGoal::new(self.clone(), path.clone()))
        })
    }

    pub fn derivation_goal(
        self: &Rc<Self>,
        registry: &mut Registry,
        drv_path: &StorePath,
    ) -> GoalPtr {
        registry.get_or_create(&DerivationGoal::key_for(drv_path), || {
            Box::new(DerivationGoal::new(self.clone(), drv_path.clone()))
        })
    }

    /// The paths an input stands for once it is realised.
    pub fn input_paths(&self, input: &DerivedPath) -> Vec<StorePath> {
        match input {
            DerivedPath::Opaque(path) => vec![path.clone()],
            DerivedPath::Built { drv_path, outputs } => match self.manifest.derivation(drv_path) {
                Some(drv) => drv
                    .outputs
                    .iter()
                    .filter(|(name, _)| outputs.contains(name))
                    .map(|(_, path)| path.clone())
                    .collect(),
                None => Vec::new(),
            },
        }
    }
}

/// Expands `$name` references in a command.  Unknown names are left alone so
/// the shell still sees its own variables; `$$` is a literal `$`.
pub fn expand(template: &str, vars: &FxHashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        if let Some(after) = rest.strip_prefix('$') {
            out.push('$');
            rest = after;
            continue;
        }
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        match vars.get(&rest[..len]) {
            Some(value) if len > 0 => out.push_str(value),
            _ => {
                out.push('$');
                out.push_str(&rest[..len]);
            }
        }
        rest = &rest[len..];
    }
    out.push_str(rest);
    out
}

/// Appends child output to a bounded log buffer.
fn append_log(log: &mut Vec<u8>, data: &[u8]) {
    log.extend_from_slice(data);
    if log.len() > LOG_LIMIT {
        let excess = log.len() - LOG_LIMIT;
        log.drain(..excess);
    }
}

/// The last few lines of a log, formatted to follow an error message.
pub fn log_tail(log: &[u8]) -> String {
    let text = String::from_utf8_lossy(log);
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    let mut out = String::from("\nlast log lines:");
    for line in &lines[start..] {
        out.push_str("\n> ");
        out.push_str(line);
    }
    out
}

/// Creates the directories outputs will be written into.
fn prepare_outputs<'p>(paths: impl IntoIterator<Item = &'p StorePath>) -> std::io::Result<()> {
    for path in paths {
        if let Some(parent) = std::path::Path::new(path.as_str()).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
