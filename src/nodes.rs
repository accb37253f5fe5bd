// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::{Path, PathBuf};

use address::BuildTarget;
use hashing::{Fingerprint, Hasher};
use interpreter::{RawAttributes, RawValue};
use log::warn;

use crate::cell::{Cell, SymlinkPolicy};
use crate::error::BuildTargetError;
use crate::rules::RuleTypeRegistry;

/// Attributes handled by the conversion itself rather than by rule-type schemas.
const CORE_ATTRS: &[&str] = &["type", "name", "deps", "srcs", "visibility"];

///
/// The typed, validated representation of one rule instance: its identity, its declared
/// dependencies (resolved to targets, not yet to nodes), its visibility patterns, its source
/// files, and a fingerprint over everything that went into it. Immutable.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetNode {
    target: BuildTarget,
    rule_type: String,
    deps: Vec<BuildTarget>,
    visibility: Vec<String>,
    // Package-relative source files, as expanded by the interpreter.
    sources: Vec<PathBuf>,
    attributes: RawAttributes,
    raw_inputs_hash: Fingerprint,
}

impl TargetNode {
    pub fn target(&self) -> &BuildTarget {
        &self.target
    }

    pub fn rule_type(&self) -> &str {
        &self.rule_type
    }

    pub fn deps(&self) -> &[BuildTarget] {
        &self.deps
    }

    pub fn visibility(&self) -> &[String] {
        &self.visibility
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn attributes(&self) -> &RawAttributes {
        &self.attributes
    }

    ///
    /// A content hash covering the rule's attributes and the source files its globs matched.
    /// Stable across re-parses that do not change the rule, and guaranteed to change when a
    /// glob picks up, loses, or renames a file.
    ///
    pub fn raw_inputs_hash(&self) -> Fingerprint {
        self.raw_inputs_hash
    }
}

///
/// Converts one entry of a raw rule map into a TargetNode, validating it against the rule
/// type's schema and the cell's policies. Returns the node together with the absolute source
/// paths that belong in the cache entry's dependency set.
///
/// Performs filesystem access (symlink checks) and must run on the blocking pool.
///
pub(crate) fn raw_to_target_node(
    cell: &Cell,
    target: &BuildTarget,
    build_file: &Path,
    raw: &RawAttributes,
    registry: &dyn RuleTypeRegistry,
) -> Result<(TargetNode, Vec<PathBuf>), BuildTargetError> {
    let invalid_attr = |attribute: &str, message: String| BuildTargetError::InvalidAttribute {
        target: target.clone(),
        attribute: attribute.to_owned(),
        message,
    };

    let rule_type_name = raw
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid_attr("type", "Rule has no type.".to_owned()))?;
    let rule_type = registry
        .get(rule_type_name)
        .ok_or_else(|| invalid_attr("type", format!("Unknown rule type `{rule_type_name}`.")))?;

    // Flavor validation happens against the rule type, regardless of cache state.
    if target.is_flavored() {
        let domain = rule_type.flavors();
        if !domain.supports_flavors() {
            return Err(BuildTargetError::UnrecognizedFlavor {
                target: target.clone(),
                rule_type: rule_type_name.to_owned(),
                flavors: target.flavors().iter().cloned().collect(),
                build_file: build_file.to_path_buf(),
                rule_supports_flavors: false,
            });
        }
        let unsupported: Vec<_> = target
            .flavors()
            .iter()
            .filter(|f| !domain.contains(f))
            .cloned()
            .collect();
        if !unsupported.is_empty() {
            return Err(BuildTargetError::UnrecognizedFlavor {
                target: target.clone(),
                rule_type: rule_type_name.to_owned(),
                flavors: unsupported,
                build_file: build_file.to_path_buf(),
                rule_supports_flavors: true,
            });
        }
    }

    // Schema validation for non-core attributes.
    for (key, value) in raw.iter() {
        if CORE_ATTRS.contains(&key.as_str()) {
            continue;
        }
        match rule_type.attr(key) {
            Some(spec) if spec.kind.admits(value) => {}
            Some(spec) => {
                return Err(invalid_attr(
                    key,
                    format!("Expected a {}, found a {}.", spec.kind.as_str(), value.kind()),
                ));
            }
            None => {
                return Err(invalid_attr(
                    key,
                    format!("Rule type `{rule_type_name}` has no attribute `{key}`."),
                ));
            }
        }
    }
    for spec in rule_type.attrs() {
        if spec.required && !raw.contains_key(spec.name) {
            return Err(invalid_attr(
                spec.name,
                "Required attribute is missing.".to_owned(),
            ));
        }
    }

    let deps = string_list_attr(raw, "deps", &invalid_attr)?
        .into_iter()
        .map(|value| {
            BuildTarget::parse_dep(target.cell_root(), target.base_path(), &value)
                .map_err(BuildTargetError::MalformedTarget)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let sources: Vec<PathBuf> = string_list_attr(raw, "srcs", &invalid_attr)?
        .into_iter()
        .map(PathBuf::from)
        .collect();
    let visibility = string_list_attr(raw, "visibility", &invalid_attr)?;

    let package_dir = cell.root().join(target.base_path());
    let source_paths: Vec<PathBuf> = sources.iter().map(|s| package_dir.join(s)).collect();

    if cell.symlink_policy() != SymlinkPolicy::Allow {
        for (source, source_path) in sources.iter().zip(source_paths.iter()) {
            if crosses_symlink(&package_dir, source) {
                match cell.symlink_policy() {
                    SymlinkPolicy::Forbid => {
                        return Err(BuildTargetError::SymlinkPolicy {
                            target: target.clone(),
                            source: source_path.clone(),
                        });
                    }
                    SymlinkPolicy::Warn => {
                        warn!(
                            "Target {target} has a source file reached through a symbolic \
                             link: {}",
                            source_path.display()
                        );
                    }
                    SymlinkPolicy::Allow => {}
                }
            }
        }
    }

    let raw_inputs_hash = fingerprint_raw_inputs(target, raw);

    let node = TargetNode {
        target: target.clone(),
        rule_type: rule_type_name.to_owned(),
        deps,
        visibility,
        sources,
        attributes: raw.clone(),
        raw_inputs_hash,
    };
    Ok((node, source_paths))
}

fn string_list_attr(
    raw: &RawAttributes,
    key: &str,
    invalid_attr: &impl Fn(&str, String) -> BuildTargetError,
) -> Result<Vec<String>, BuildTargetError> {
    match raw.get(key) {
        None => Ok(vec![]),
        Some(value) => value
            .as_string_list()
            .map(|list| list.into_iter().map(str::to_owned).collect())
            .ok_or_else(|| {
                invalid_attr(
                    key,
                    format!("Expected a list of strings, found a {}.", value.kind()),
                )
            }),
    }
}

///
/// True if any path component between the package directory and the source file (inclusive) is
/// a symbolic link.
///
fn crosses_symlink(package_dir: &Path, source: &Path) -> bool {
    let mut current = package_dir.to_path_buf();
    for component in source.components() {
        current.push(component);
        if let Ok(metadata) = std::fs::symlink_metadata(&current) {
            if metadata.file_type().is_symlink() {
                return true;
            }
        }
    }
    false
}

fn fingerprint_raw_inputs(target: &BuildTarget, raw: &RawAttributes) -> Fingerprint {
    let mut hasher = Hasher::new();
    hasher.update_str(&target.to_string());
    for (key, value) in raw.iter() {
        hasher.update_str(key);
        hash_raw_value(&mut hasher, value);
    }
    hasher.finish()
}

fn hash_raw_value(hasher: &mut Hasher, value: &RawValue) {
    match value {
        RawValue::String(s) => {
            hasher.update_str("s").update_str(s);
        }
        RawValue::Number(n) => {
            hasher.update_str("n").update(&n.to_be_bytes());
        }
        RawValue::Bool(b) => {
            hasher.update_str("b").update(&[u8::from(*b)]);
        }
        RawValue::List(values) => {
            hasher.update_str("l");
            for value in values {
                hash_raw_value(hasher, value);
            }
        }
        RawValue::Map(map) => {
            hasher.update_str("m");
            for (key, value) in map.iter() {
                hasher.update_str(key);
                hash_raw_value(hasher, value);
            }
        }
    }
}
