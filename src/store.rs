//! The store: answers whether a path is valid, i.e. already present.

use crate::derived_path::StorePath;
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

pub trait Store {
    fn is_valid_path(&self, path: &StorePath) -> bool;
}

/// A store rooted at a directory; a path is valid if it exists beneath it.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `path` lives on disk.
    pub fn real_path(&self, path: &StorePath) -> PathBuf {
        self.root.join(path.as_str())
    }
}

impl Store for DirStore {
    fn is_valid_path(&self, path: &StorePath) -> bool {
        // symlink_metadata so a dangling symlink output still counts.
        std::fs::symlink_metadata(self.real_path(path)).is_ok()
    }
}

/// An in-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    valid: RefCell<FxHashSet<StorePath>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, path: StorePath) {
        self.valid.borrow_mut().insert(path);
    }

    pub fn remove(&self, path: &StorePath) {
        self.valid.borrow_mut().remove(path);
    }
}

impl Store for MemoryStore {
    fn is_valid_path(&self, path: &StorePath) -> bool {
        self.valid.borrow().contains(path)
    }
}
