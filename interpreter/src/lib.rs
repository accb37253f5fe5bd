// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The boundary to the external build-file interpreter.
//!
//! The interpreter itself is an opaque collaborator: anything implementing `Interpreter` can be
//! driven through the `FileParserPool`, which bounds concurrency, queues requests, and isolates
//! worker crashes from the daemon. A line-oriented reference implementation lives in `simple`
//! for tests and demos.

mod pool;
pub mod simple;

pub use crate::pool::FileParserPool;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;

///
/// A loosely-typed attribute value as produced by the interpreter. Raw values are validated
/// against the rule type's schema only when a typed target node is constructed from them.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RawValue {
    String(String),
    Number(i64),
    Bool(bool),
    List(Vec<RawValue>),
    Map(IndexMap<String, RawValue>),
}

impl RawValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::String(s) => Some(s),
            _ => None,
        }
    }

    ///
    /// Views this value as a list of strings: a single string is a list of one. This is the
    /// shape shared by `deps`, `srcs`, and `visibility` attributes.
    ///
    pub fn as_string_list(&self) -> Option<Vec<&str>> {
        match self {
            RawValue::String(s) => Some(vec![s.as_str()]),
            RawValue::List(values) => values
                .iter()
                .map(|v| v.as_str())
                .collect::<Option<Vec<_>>>(),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::String(_) => "string",
            RawValue::Number(_) => "number",
            RawValue::Bool(_) => "bool",
            RawValue::List(_) => "list",
            RawValue::Map(_) => "map",
        }
    }
}

/// The attributes of one rule instance, in declaration order.
pub type RawAttributes = IndexMap<String, RawValue>;

///
/// The parse result for one build file: every rule it declares (in declaration order, keyed by
/// short name) plus the absolute paths of the include files the interpreter actually read while
/// producing it. Never mutated after creation; re-parses replace it wholesale.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawRuleMap {
    rules: IndexMap<String, RawAttributes>,
    includes: Vec<PathBuf>,
}

impl RawRuleMap {
    pub fn new(rules: IndexMap<String, RawAttributes>, includes: Vec<PathBuf>) -> RawRuleMap {
        RawRuleMap { rules, includes }
    }

    pub fn get(&self, rule_name: &str) -> Option<&RawAttributes> {
        self.rules.get(rule_name)
    }

    pub fn rules(&self) -> impl Iterator<Item = (&String, &RawAttributes)> {
        self.rules.iter()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn includes(&self) -> &[PathBuf] {
        &self.includes
    }
}

///
/// One request to the interpreter: the build file to evaluate, in the context of its cell root,
/// the configured default includes, and the environment snapshot.
///
#[derive(Clone, Debug)]
pub struct InterpretRequest {
    pub cell_root: PathBuf,
    pub build_file: PathBuf,
    pub default_includes: Vec<PathBuf>,
    pub environment: BTreeMap<String, String>,
}

///
/// A failure to produce a rule map for a build file. Parse errors are fatal to the query that
/// triggered them but are never cached and never terminate the daemon.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The build file (or one of its includes) does not exist or could not be read.
    FileNotFound(PathBuf),
    /// The interpreter rejected the file's contents.
    Syntax {
        path: PathBuf,
        line: usize,
        message: String,
    },
    /// The interpreter worker died (panicked, or its process exited) while evaluating.
    InterpreterCrash { path: PathBuf, message: String },
    /// The interpreter did not produce a result within the configured timeout.
    Timeout { path: PathBuf, after_millis: u64 },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::FileNotFound(path) => {
                write!(f, "Build file not found: {}", path.display())
            }
            ParseError::Syntax {
                path,
                line,
                message,
            } => write!(
                f,
                "Parse error for build file {} at line {line}: {message}",
                path.display()
            ),
            ParseError::InterpreterCrash { path, message } => write!(
                f,
                "Build file interpreter crashed while parsing {}: {message}",
                path.display()
            ),
            ParseError::Timeout { path, after_millis } => write!(
                f,
                "Timed out after {after_millis}ms while parsing {}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for ParseError {}

///
/// A stateful interpreter worker. Workers serve one request at a time, and must not leak state
/// from one build file into the next call: callers may not assume warm-cache behavior inside
/// the interpreter.
///
pub trait Interpreter: Send {
    fn interpret(&mut self, request: &InterpretRequest) -> Result<RawRuleMap, ParseError>;
}

///
/// Creates fresh interpreter workers for the pool, both at startup and to replace workers
/// discarded after a crash or timeout.
///
pub trait InterpreterFactory: Send + Sync {
    fn spawn(&self) -> Result<Box<dyn Interpreter>, ParseError>;
}

impl<F> InterpreterFactory for F
where
    F: Fn() -> Result<Box<dyn Interpreter>, ParseError> + Send + Sync,
{
    fn spawn(&self) -> Result<Box<dyn Interpreter>, ParseError> {
        self()
    }
}
