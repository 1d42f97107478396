//! The request model: what a caller asks to have realised.
//!
//! A request is either a plain store path (`store/foo`) or a selection of
//! outputs of a derivation (`foo.drv^out,dev`, or `foo.drv^*` for all).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty store path")]
    Empty,
    #[error("invalid character {ch:?} in store path {path:?}")]
    BadChar { path: String, ch: char },
    #[error("no outputs selected in {0:?}")]
    NoOutputs(String),
}

/// A path in the store.  Opaque to the scheduler apart from being a key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath(String);

impl StorePath {
    pub fn new(path: impl Into<String>) -> Result<Self, ParseError> {
        let path = path.into();
        if path.is_empty() {
            return Err(ParseError::Empty);
        }
        if let Some(ch) = path
            .chars()
            .find(|&c| c.is_whitespace() || c == '^' || c == ',')
        {
            return Err(ParseError::BadChar { path, ch });
        }
        Ok(StorePath(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StorePath {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorePath::new(s)
    }
}

/// Which outputs of a derivation a request wants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputsSpec {
    All,
    Names(BTreeSet<String>),
}

impl OutputsSpec {
    pub fn contains(&self, name: &str) -> bool {
        match self {
            OutputsSpec::All => true,
            OutputsSpec::Names(names) => names.contains(name),
        }
    }
}

impl fmt::Display for OutputsSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputsSpec::All => f.write_str("*"),
            OutputsSpec::Names(names) => {
                let names: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DerivedPath {
    /// A path that must exist in the store, however it gets there.
    Opaque(StorePath),
    /// Outputs of a derivation, built if necessary.
    Built {
        drv_path: StorePath,
        outputs: OutputsSpec,
    },
}

impl DerivedPath {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (path, outputs) = match s.split_once('^') {
            None => return Ok(DerivedPath::Opaque(StorePath::new(s)?)),
            Some(split) => split,
        };
        let drv_path = StorePath::new(path)?;
        let outputs = if outputs == "*" {
            OutputsSpec::All
        } else {
            let names: BTreeSet<String> = outputs
                .split(',')
                .filter(|n| !n.is_empty())
                .map(|n| n.to_string())
                .collect();
            if names.is_empty() {
                return Err(ParseError::NoOutputs(s.to_string()));
            }
            OutputsSpec::Names(names)
        };
        Ok(DerivedPath::Built { drv_path, outputs })
    }

    /// The store path the request is rooted at.
    pub fn base_path(&self) -> &StorePath {
        match self {
            DerivedPath::Opaque(path) => path,
            DerivedPath::Built { drv_path, .. } => drv_path,
        }
    }
}

impl fmt::Display for DerivedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DerivedPath::Opaque(path) => write!(f, "{}", path),
            DerivedPath::Built { drv_path, outputs } => write!(f, "{}^{}", drv_path, outputs),
        }
    }
}

impl FromStr for DerivedPath {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DerivedPath::parse(s)
    }
}
