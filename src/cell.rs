// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashing::{Fingerprint, Hasher};
use regex::RegexSet;
use serde::Deserialize;

///
/// What to do when a target's source-file closure crosses a symbolic link.
///
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    #[default]
    Allow,
    Warn,
    Forbid,
}

impl SymlinkPolicy {
    fn as_str(&self) -> &'static str {
        match self {
            SymlinkPolicy::Allow => "allow",
            SymlinkPolicy::Warn => "warn",
            SymlinkPolicy::Forbid => "forbid",
        }
    }
}

///
/// Per-cell parsing configuration, typically deserialized from the cell's config file.
///
/// `parsing_env_keys` names the environment variables the build-file interpreter's
/// configuration actually references: only those participate in the cell fingerprint, so
/// changes to unrelated variables never invalidate the cache.
///
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CellConfig {
    pub build_file_name: String,
    /// Cell-relative (`//`-prefixed) files included into every build file before parsing.
    pub default_includes: Vec<String>,
    /// The environment snapshot handed to the interpreter.
    pub environment: BTreeMap<String, String>,
    pub parsing_env_keys: Vec<String>,
    pub symlink_policy: SymlinkPolicy,
    /// Regexes for editor droppings and the like; matching paths never trigger invalidation.
    pub temp_file_patterns: Vec<String>,
    pub enforce_package_boundary: bool,
}

impl Default for CellConfig {
    fn default() -> CellConfig {
        CellConfig {
            build_file_name: "BUILD".to_owned(),
            default_includes: Vec::new(),
            environment: BTreeMap::new(),
            parsing_env_keys: Vec::new(),
            symlink_policy: SymlinkPolicy::Allow,
            temp_file_patterns: Vec::new(),
            enforce_package_boundary: true,
        }
    }
}

impl CellConfig {
    pub fn from_toml_str(text: &str) -> Result<CellConfig, String> {
        toml::from_str(text).map_err(|e| format!("Invalid cell configuration: {e}"))
    }
}

///
/// A root directory of a source tree with its own build configuration. Identity is the
/// canonical root path; a changed configuration produces a logically new cell, which
/// DaemonicParserState detects via `fingerprint` and answers by dropping the old cell's caches.
///
#[derive(Clone, Debug)]
pub struct Cell {
    root: Arc<PathBuf>,
    config: CellConfig,
    default_include_paths: Vec<PathBuf>,
    temp_file_matcher: Arc<RegexSet>,
    fingerprint: Fingerprint,
}

impl Cell {
    pub fn new(root: PathBuf, config: CellConfig) -> Result<Cell, String> {
        let root = std::fs::canonicalize(&root)
            .map_err(|e| format!("Cell root {} is not readable: {e}", root.display()))?;

        let default_include_paths = config
            .default_includes
            .iter()
            .map(|include| {
                include
                    .strip_prefix("//")
                    .map(|rel| root.join(rel))
                    .ok_or_else(|| {
                        format!("Default includes must be cell-relative (`//...`): `{include}`")
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let temp_file_matcher = RegexSet::new(&config.temp_file_patterns)
            .map_err(|e| format!("Could not parse temp file patterns: {e}"))?;

        let fingerprint = Self::compute_fingerprint(&config);

        Ok(Cell {
            root: Arc::new(root),
            config,
            default_include_paths,
            temp_file_matcher: Arc::new(temp_file_matcher),
            fingerprint,
        })
    }

    ///
    /// The environment/config fingerprint that gates whole-cell invalidation: parse-relevant
    /// configuration fields, plus the values of exactly the environment variables the parsing
    /// configuration references.
    ///
    fn compute_fingerprint(config: &CellConfig) -> Fingerprint {
        let mut hasher = Hasher::new();
        hasher.update_str(&config.build_file_name);
        for include in &config.default_includes {
            hasher.update_str(include);
        }
        hasher.update_str(config.symlink_policy.as_str());
        hasher.update_str(if config.enforce_package_boundary {
            "boundary"
        } else {
            "no-boundary"
        });
        let mut referenced: Vec<&String> = config.parsing_env_keys.iter().collect();
        referenced.sort();
        for key in referenced {
            hasher.update_str(key);
            hasher.update_str(config.environment.get(key).map(String::as_str).unwrap_or(""));
        }
        hasher.finish()
    }

    pub fn root(&self) -> &Arc<PathBuf> {
        &self.root
    }

    pub fn config(&self) -> &CellConfig {
        &self.config
    }

    pub fn build_file_name(&self) -> &str {
        &self.config.build_file_name
    }

    pub fn default_include_paths(&self) -> &[PathBuf] {
        &self.default_include_paths
    }

    pub fn symlink_policy(&self) -> SymlinkPolicy {
        self.config.symlink_policy
    }

    pub fn enforce_package_boundary(&self) -> bool {
        self.config.enforce_package_boundary
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(self.root.as_path())
    }

    pub fn relativize<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(self.root.as_path()).ok()
    }

    ///
    /// True if the path matches a configured temporary-file pattern. Matching is against the
    /// cell-relative path when the path is inside the cell, otherwise against the path as
    /// given.
    ///
    pub fn is_temp_file(&self, path: &Path) -> bool {
        let candidate = self.relativize(path).unwrap_or(path);
        self.temp_file_matcher
            .is_match(&candidate.to_string_lossy())
    }

    ///
    /// The absolute path of the build file for the package at `base_path`.
    ///
    pub fn build_file_for_package(&self, base_path: &Path) -> PathBuf {
        self.root.join(base_path).join(self.build_file_name())
    }
}
