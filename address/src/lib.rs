// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

///
/// A tag on a build target which selects a variant of the rule's behavior (a platform, a
/// language binding, etc). Flavors are an unordered set on the target; a BTreeSet keeps their
/// rendering and hashing deterministic.
///
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Flavor(String);

impl Flavor {
    pub fn new(name: &str) -> Result<Flavor, String> {
        if name.is_empty() {
            return Err("Flavor names must be non-empty.".to_owned());
        }
        if name.contains(['#', ',', ':']) {
            return Err(format!("Invalid character in flavor name: `{name}`"));
        }
        Ok(Flavor(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

///
/// The fully qualified identity of one rule instance: the cell it lives in, the package base
/// path within the cell, the short name declared in the build file, and an optional set of
/// flavors. Immutable.
///
/// The cell root is held by Arc because targets are cloned freely throughout the pipelines.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct BuildTarget {
    cell_root: Arc<PathBuf>,
    base_path: PathBuf,
    short_name: String,
    flavors: BTreeSet<Flavor>,
}

impl BuildTarget {
    pub fn new(cell_root: Arc<PathBuf>, base_path: PathBuf, short_name: &str) -> BuildTarget {
        BuildTarget {
            cell_root,
            base_path,
            short_name: short_name.to_owned(),
            flavors: BTreeSet::new(),
        }
    }

    pub fn with_flavors<I: IntoIterator<Item = Flavor>>(mut self, flavors: I) -> BuildTarget {
        self.flavors.extend(flavors);
        self
    }

    ///
    /// Parses a fully qualified target of the form `//base/path:name#flavor,...`.
    ///
    pub fn parse(cell_root: &Arc<PathBuf>, value: &str) -> Result<BuildTarget, String> {
        let input = parse_target(value)?;
        let target_name = input
            .name
            .ok_or_else(|| format!("Target `{value}` is missing a `:target-name` suffix."))?;
        Self::from_input(cell_root, input.path, target_name, &input.flavors, value)
    }

    ///
    /// Parses a dependency reference appearing in a build file at `base_path`: either the fully
    /// qualified `//base/path:name` form, or the `:name` form relative to the declaring package.
    ///
    pub fn parse_dep(
        cell_root: &Arc<PathBuf>,
        base_path: &Path,
        value: &str,
    ) -> Result<BuildTarget, String> {
        if let Some(relative) = value.strip_prefix(':') {
            if relative.is_empty() {
                return Err(format!("Target `{value}` has an empty target name."));
            }
            return Ok(BuildTarget::new(
                cell_root.clone(),
                base_path.to_path_buf(),
                relative,
            ));
        }
        Self::parse(cell_root, value)
    }

    fn from_input(
        cell_root: &Arc<PathBuf>,
        path: &str,
        name: &str,
        flavors: &[&str],
        original: &str,
    ) -> Result<BuildTarget, String> {
        let base_path = PathBuf::from(path);
        for component in base_path.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(format!(
                        "Base path of target `{original}` may not contain `.`, `..`, or be absolute."
                    ));
                }
            }
        }
        let flavors = flavors
            .iter()
            .map(|f| Flavor::new(f))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(BuildTarget {
            cell_root: cell_root.clone(),
            base_path,
            short_name: name.to_owned(),
            flavors,
        })
    }

    pub fn cell_root(&self) -> &Arc<PathBuf> {
        &self.cell_root
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn flavors(&self) -> &BTreeSet<Flavor> {
        &self.flavors
    }

    pub fn is_flavored(&self) -> bool {
        !self.flavors.is_empty()
    }

    ///
    /// The same target with all flavors stripped: the identity under which the rule is declared
    /// in its build file.
    ///
    pub fn unflavored(&self) -> BuildTarget {
        BuildTarget {
            cell_root: self.cell_root.clone(),
            base_path: self.base_path.clone(),
            short_name: self.short_name.clone(),
            flavors: BTreeSet::new(),
        }
    }

    ///
    /// The absolute path of the build file which declares (or would declare) this target.
    ///
    pub fn build_file_path(&self, build_file_name: &str) -> PathBuf {
        self.cell_root.join(&self.base_path).join(build_file_name)
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "//{}:{}",
            self.base_path.display(),
            self.short_name
        )?;
        let mut sep = '#';
        for flavor in &self.flavors {
            write!(f, "{sep}{flavor}")?;
            sep = ',';
        }
        Ok(())
    }
}

pub struct TargetInput<'a> {
    pub path: &'a str,
    pub name: Option<&'a str>,
    pub flavors: Vec<&'a str>,
}

peg::parser! {
    grammar target_parser() for str {
        rule path() -> &'input str = "//" s:$([^':' | '#']*) {s}

        rule target_name() -> &'input str
            = quiet!{ s:$([^'#']+) { s } }
            / expected!("a non-empty target name to follow a `:`.")

        rule target() -> &'input str = ":" s:target_name() { s }

        rule flavor_name() -> &'input str
            = quiet!{ s:$([^',']+) { s } }
            / expected!("a non-empty flavor name.")

        rule flavors() -> Vec<&'input str> = "#" fs:(flavor_name() ++ ",") { fs }

        pub(crate) rule qualified_target() -> TargetInput<'input>
            = path:path() name:target()? flavors:flavors()? {
                TargetInput {
                    path,
                    name,
                    flavors: flavors.unwrap_or_default(),
                }
            }
    }
}

pub fn parse_target(value: &str) -> Result<TargetInput<'_>, String> {
    target_parser::qualified_target(value)
        .map_err(|e| format!("Failed to parse target `{value}`: {e}"))
}
