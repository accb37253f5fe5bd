// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::path::PathBuf;

use address::{BuildTarget, Flavor};
use interpreter::ParseError;
use itertools::Itertools;

///
/// A failure to resolve a target query. Every variant is fatal to the query that raised it,
/// but none of them are cached, and none of them terminate the daemon.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildTargetError {
    /// The build file could not be parsed at all.
    Parse(ParseError),
    /// The build file parsed, but declares no rule with the requested name.
    MissingRule {
        target: BuildTarget,
        build_file: PathBuf,
    },
    /// The target requests a flavor its rule type does not support (or the rule type supports
    /// no flavors at all).
    UnrecognizedFlavor {
        target: BuildTarget,
        rule_type: String,
        flavors: Vec<Flavor>,
        build_file: PathBuf,
        rule_supports_flavors: bool,
    },
    /// A declared dependency does not exist in its build file.
    MissingDependency {
        dependent: BuildTarget,
        dependency: BuildTarget,
    },
    /// A source file of the target is reached through a symlink while the cell policy is
    /// Forbid.
    SymlinkPolicy {
        target: BuildTarget,
        source: PathBuf,
    },
    /// The dependency closure contains a cycle.
    Cycle { targets: Vec<BuildTarget> },
    /// An attribute failed validation against the rule type's schema.
    InvalidAttribute {
        target: BuildTarget,
        attribute: String,
        message: String,
    },
    /// A target literal could not be parsed.
    MalformedTarget(String),
    /// An infrastructure failure (executor shutdown mid-query, etc).
    Internal(String),
}

impl fmt::Display for BuildTargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildTargetError::Parse(e) => write!(f, "{e}"),
            BuildTargetError::MissingRule { target, build_file } => write!(
                f,
                "No rule found when resolving target {target} in build file {}",
                build_file.display()
            ),
            BuildTargetError::UnrecognizedFlavor {
                target,
                rule_type,
                flavors,
                build_file,
                rule_supports_flavors,
            } => {
                if *rule_supports_flavors {
                    write!(
                        f,
                        "Unrecognized flavor in target {target} while parsing {} (unsupported: [{}]).",
                        build_file.display(),
                        flavors.iter().join(", "),
                    )
                } else {
                    write!(
                        f,
                        "Target {} (type {rule_type}) does not support flavors (tried [{}]).",
                        target.unflavored(),
                        flavors.iter().join(", "),
                    )
                }
            }
            BuildTargetError::MissingDependency {
                dependent,
                dependency,
            } => write!(
                f,
                "Couldn't get dependency '{dependency}' of target '{dependent}'",
            ),
            BuildTargetError::SymlinkPolicy { target, source } => write!(
                f,
                "Target {target} has a source file reached through a symbolic link, which the \
                 cell forbids: {}",
                source.display()
            ),
            BuildTargetError::Cycle { targets } => write!(
                f,
                "Cycle found in dependency graph: [{}]",
                targets.iter().join(" -> "),
            ),
            BuildTargetError::InvalidAttribute {
                target,
                attribute,
                message,
            } => write!(
                f,
                "Invalid attribute `{attribute}` of target {target}: {message}"
            ),
            BuildTargetError::MalformedTarget(message) => write!(f, "{message}"),
            BuildTargetError::Internal(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for BuildTargetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildTargetError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseError> for BuildTargetError {
    fn from(e: ParseError) -> BuildTargetError {
        BuildTargetError::Parse(e)
    }
}
