//! The plan file: what derivations exist, how to build them, and which paths
//! can be substituted from where.
//!
//! ```text
//! # comment
//! derivation hello.drv
//!   out = store/hello
//!   inputs = store/src greeting.drv^out
//!   command = cat $in > $out
//!
//! path store/src
//!   substitute = cp /somewhere/src $out
//!   references = store/other
//! ```

use crate::derived_path::{DerivedPath, StorePath};
use crate::scanner::{ParseResult, Scanner};
use crate::trace;
use anyhow::{anyhow, bail};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivation {
    pub drv_path: StorePath,
    /// Output name to the path it is built at.
    pub outputs: BTreeMap<String, StorePath>,
    pub inputs: Vec<DerivedPath>,
    pub command: Option<String>,
    /// Per-derivation deadline, on top of the session-wide timeouts.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub path: StorePath,
    /// Command that makes `path` valid, if any substituter has it.
    pub substitute: Option<String>,
    /// Paths that must be valid before this one is usable.
    pub references: Vec<StorePath>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub derivations: BTreeMap<StorePath, Derivation>,
    pub paths: BTreeMap<StorePath, PathInfo>,
}

impl Manifest {
    pub fn derivation(&self, drv_path: &StorePath) -> Option<&Derivation> {
        self.derivations.get(drv_path)
    }

    pub fn path_info(&self, path: &StorePath) -> Option<&PathInfo> {
        self.paths.get(path)
    }
}

struct Parser<'a> {
    scanner: Scanner<'a>,
}

impl<'a> Parser<'a> {
    fn new(buf: &'a str) -> Self {
        Parser {
            scanner: Scanner::new(buf),
        }
    }

    fn store_path(&self, text: &str) -> ParseResult<StorePath> {
        match StorePath::new(text) {
            Ok(path) => Ok(path),
            Err(err) => self.scanner.parse_error(err.to_string()),
        }
    }

    fn derived_path(&self, text: &str) -> ParseResult<DerivedPath> {
        match DerivedPath::parse(text) {
            Ok(path) => Ok(path),
            Err(err) => self.scanner.parse_error(err.to_string()),
        }
    }

    /// Skips blank and comment lines; returns false at end of input.
    fn skip_blank(&mut self) -> bool {
        loop {
            let start = self.scanner.ofs;
            self.scanner.skip_spaces();
            match self.scanner.peek() {
                '#' | '\r' | '\n' => self.scanner.skip_line(),
                '\0' if self.scanner.at_eof() => return false,
                _ => {
                    self.scanner.ofs = start;
                    return true;
                }
            }
        }
    }

    /// Reads one indented `key = value` line, if the next line is one.
    fn read_binding(&mut self) -> ParseResult<Option<(&'a str, &'a str)>> {
        if !self.skip_blank() {
            return Ok(None);
        }
        let start = self.scanner.ofs;
        if self.scanner.skip_spaces() == 0 {
            self.scanner.ofs = start;
            return Ok(None);
        }
        let key = self.scanner.read_word();
        if key.is_empty() {
            return self.scanner.parse_error("expected variable name");
        }
        self.scanner.skip_spaces();
        self.scanner.expect('=')?;
        Ok(Some((key, self.scanner.read_to_eol())))
    }

    fn read_derivation(&mut self, drv_path: StorePath) -> ParseResult<Derivation> {
        let mut drv = Derivation {
            drv_path,
            outputs: BTreeMap::new(),
            inputs: Vec::new(),
            command: None,
            timeout: None,
        };
        while let Some((key, value)) = self.read_binding()? {
            match key {
                "inputs" => {
                    for word in value.split_whitespace() {
                        drv.inputs.push(self.derived_path(word)?);
                    }
                }
                "command" => drv.command = Some(value.to_string()),
                "timeout" => match value.parse::<u64>() {
                    Ok(secs) => drv.timeout = Some(Duration::from_secs(secs)),
                    Err(_) => {
                        return self
                            .scanner
                            .parse_error(format!("bad timeout {:?}", value))
                    }
                },
                name => {
                    let path = self.store_path(value)?;
                    if drv.outputs.insert(name.to_string(), path).is_some() {
                        return self
                            .scanner
                            .parse_error(format!("duplicate output {:?}", name));
                    }
                }
            }
        }
        if drv.outputs.is_empty() {
            return self
                .scanner
                .parse_error(format!("derivation {} has no outputs", drv.drv_path));
        }
        Ok(drv)
    }

    fn read_path(&mut self, path: StorePath) -> ParseResult<PathInfo> {
        let mut info = PathInfo {
            path,
            substitute: None,
            references: Vec::new(),
        };
        while let Some((key, value)) = self.read_binding()? {
            match key {
                "substitute" => info.substitute = Some(value.to_string()),
                "references" => {
                    for word in value.split_whitespace() {
                        info.references.push(self.store_path(word)?);
                    }
                }
                _ => {
                    return self
                        .scanner
                        .parse_error(format!("unexpected variable {:?}", key))
                }
            }
        }
        Ok(info)
    }

    fn read(&mut self) -> ParseResult<Manifest> {
        let mut manifest = Manifest::default();
        while self.skip_blank() {
            let ident = self.scanner.read_word();
            if !matches!(ident, "derivation" | "path") {
                return self
                    .scanner
                    .parse_error(format!("expected 'derivation' or 'path', got {:?}", ident));
            }
            self.scanner.skip_spaces();
            let name = self.scanner.read_to_eol();
            if ident == "derivation" {
                let drv_path = self.store_path(name)?;
                if manifest.derivations.contains_key(&drv_path) {
                    return self
                        .scanner
                        .parse_error(format!("duplicate derivation {}", drv_path));
                }
                let drv = self.read_derivation(drv_path.clone())?;
                manifest.derivations.insert(drv_path, drv);
            } else {
                let path = self.store_path(name)?;
                if manifest.paths.contains_key(&path) {
                    return self
                        .scanner
                        .parse_error(format!("duplicate path {}", path));
                }
                let info = self.read_path(path.clone())?;
                manifest.paths.insert(path, info);
            }
        }
        Ok(manifest)
    }
}

/// Parses plan text.  `filename` is only used in error messages.
pub fn parse(filename: &Path, text: &str) -> anyhow::Result<Manifest> {
    let mut buf = String::with_capacity(text.len() + 1);
    buf.push_str(text);
    buf.push('\0');
    let mut parser = Parser::new(&buf);
    parser
        .read()
        .map_err(|err| anyhow!(parser.scanner.format_parse_error(filename, err)))
}

pub fn read(path: &Path) -> anyhow::Result<Manifest> {
    let text = match trace::scope("fs::read", || std::fs::read_to_string(path)) {
        Ok(text) => text,
        Err(err) => bail!("read {}: {}", path.display(), err),
    };
    trace::scope("manifest.parse", || parse(path, &text))
}
