// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A line-oriented reference interpreter, used by tests and the demo binary in place of a real
//! build-file evaluator.
//!
//! The format understood here is deliberately tiny:
//!
//! ```text
//! # comment
//! include //tools/defs.inc
//! rule java_library foo deps=:bar,//other:baz srcs=glob(*.java)
//! ```
//!
//! * `include //path` pulls in another file, cell-relative. Include files may themselves
//!   contain `include` directives; their remaining lines are treated as opaque definitions.
//! * `rule <type> <name> [attr=value]...` declares one rule. Values are comma-separated;
//!   integers and `true`/`false` are recognized, a multi-element value becomes a list, and
//!   `glob(*.ext)` expands to the matching file names in the build file's directory, sorted.
//!
//! Real deployments drive external evaluator processes through the same `Interpreter` trait.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::{InterpretRequest, Interpreter, ParseError, RawAttributes, RawRuleMap, RawValue};

pub struct SimpleInterpreter;

impl Interpreter for SimpleInterpreter {
    fn interpret(&mut self, request: &InterpretRequest) -> Result<RawRuleMap, ParseError> {
        let mut includes = Vec::new();
        let mut rules = IndexMap::new();

        for default_include in &request.default_includes {
            self.read_include(request, default_include, &mut includes)?;
        }

        let text = fs::read_to_string(&request.build_file)
            .map_err(|_| ParseError::FileNotFound(request.build_file.clone()))?;
        let package_dir = request
            .build_file
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();

        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("include") => {
                    let target = tokens.next().ok_or_else(|| {
                        self.syntax(request, line_number, "`include` requires a path.")
                    })?;
                    let path = self.resolve_include(request, target, line_number)?;
                    self.read_include(request, &path, &mut includes)?;
                }
                Some("rule") => {
                    let (name, attributes) =
                        self.parse_rule(request, line_number, &package_dir, tokens)?;
                    if rules.insert(name.clone(), attributes).is_some() {
                        return Err(self.syntax(
                            request,
                            line_number,
                            &format!("Duplicate rule definition found ({name})."),
                        ));
                    }
                }
                Some(other) => {
                    return Err(self.syntax(
                        request,
                        line_number,
                        &format!("Unrecognized directive `{other}`."),
                    ));
                }
                None => {}
            }
        }

        Ok(RawRuleMap::new(rules, includes))
    }
}

impl SimpleInterpreter {
    fn syntax(&self, request: &InterpretRequest, line: usize, message: &str) -> ParseError {
        ParseError::Syntax {
            path: request.build_file.clone(),
            line,
            message: message.to_owned(),
        }
    }

    fn resolve_include(
        &self,
        request: &InterpretRequest,
        target: &str,
        line_number: usize,
    ) -> Result<PathBuf, ParseError> {
        let relative = target.strip_prefix("//").ok_or_else(|| {
            self.syntax(
                request,
                line_number,
                &format!("Include paths must be cell-relative (`//...`): `{target}`"),
            )
        })?;
        Ok(request.cell_root.join(relative))
    }

    ///
    /// Reads an include file, recording it (and anything it transitively includes) in the
    /// dependency list. Non-`include` lines in include files are opaque definitions.
    ///
    fn read_include(
        &self,
        request: &InterpretRequest,
        path: &Path,
        includes: &mut Vec<PathBuf>,
    ) -> Result<(), ParseError> {
        let text = fs::read_to_string(path)
            .map_err(|_| ParseError::FileNotFound(path.to_path_buf()))?;
        includes.push(path.to_path_buf());

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("include ") {
                let nested = self.resolve_include(request, rest.trim(), index + 1)?;
                self.read_include(request, &nested, includes)?;
            }
        }
        Ok(())
    }

    fn parse_rule<'a>(
        &self,
        request: &InterpretRequest,
        line_number: usize,
        package_dir: &Path,
        mut tokens: impl Iterator<Item = &'a str>,
    ) -> Result<(String, RawAttributes), ParseError> {
        let rule_type = tokens
            .next()
            .ok_or_else(|| self.syntax(request, line_number, "`rule` requires a type."))?;
        let name = tokens
            .next()
            .ok_or_else(|| self.syntax(request, line_number, "`rule` requires a name."))?;
        if name.contains('=') {
            return Err(self.syntax(request, line_number, "`rule` requires a name."));
        }

        let mut attributes = RawAttributes::new();
        attributes.insert("type".to_owned(), RawValue::String(rule_type.to_owned()));
        attributes.insert("name".to_owned(), RawValue::String(name.to_owned()));

        for token in tokens {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                self.syntax(
                    request,
                    line_number,
                    &format!("Expected `attr=value`, found `{token}`."),
                )
            })?;
            if attributes.contains_key(key) {
                return Err(self.syntax(
                    request,
                    line_number,
                    &format!("Attribute `{key}` was given twice."),
                ));
            }
            let value = self.parse_value(request, line_number, package_dir, value)?;
            attributes.insert(key.to_owned(), value);
        }

        Ok((name.to_owned(), attributes))
    }

    fn parse_value(
        &self,
        request: &InterpretRequest,
        line_number: usize,
        package_dir: &Path,
        value: &str,
    ) -> Result<RawValue, ParseError> {
        if let Some(pattern) = value
            .strip_prefix("glob(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return self.expand_glob(request, line_number, package_dir, pattern);
        }

        let elements: Vec<RawValue> = value.split(',').map(Self::scalar).collect();
        if elements.len() == 1 {
            Ok(elements.into_iter().next().unwrap())
        } else {
            Ok(RawValue::List(elements))
        }
    }

    fn scalar(element: &str) -> RawValue {
        if let Ok(n) = element.parse::<i64>() {
            return RawValue::Number(n);
        }
        match element {
            "true" => RawValue::Bool(true),
            "false" => RawValue::Bool(false),
            _ => RawValue::String(element.to_owned()),
        }
    }

    ///
    /// Expands a `glob(*.ext)` value to the sorted file names in the package directory with the
    /// given suffix. Only this single-star suffix form is supported.
    ///
    fn expand_glob(
        &self,
        request: &InterpretRequest,
        line_number: usize,
        package_dir: &Path,
        pattern: &str,
    ) -> Result<RawValue, ParseError> {
        let suffix = pattern.strip_prefix('*').ok_or_else(|| {
            self.syntax(
                request,
                line_number,
                &format!("Unsupported glob pattern `{pattern}`."),
            )
        })?;

        let mut matches = Vec::new();
        let entries = fs::read_dir(package_dir)
            .map_err(|_| ParseError::FileNotFound(package_dir.to_path_buf()))?;
        for entry in entries {
            let entry = entry.map_err(|_| ParseError::FileNotFound(package_dir.to_path_buf()))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.ends_with(suffix) && entry.path().is_file() {
                matches.push(file_name.to_owned());
            }
        }
        matches.sort();
        Ok(RawValue::List(
            matches.into_iter().map(RawValue::String).collect(),
        ))
    }
}
