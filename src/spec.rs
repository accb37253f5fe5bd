// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::{Path, PathBuf};

use address::BuildTarget;
use interpreter::ParseError;
use walkdir::WalkDir;

use crate::cell::Cell;
use crate::error::BuildTargetError;

///
/// A higher-level description of a set of targets, expanded against the filesystem before
/// parsing:
///
/// * `//base/path:name`: one concrete target;
/// * `//base/path:`: every target declared in that package's build file;
/// * `//base/path/...`: every target in every build file under that directory tree.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TargetSpec {
    Exact(BuildTarget),
    Package { base_path: PathBuf },
    Recursive { base_path: PathBuf },
}

impl TargetSpec {
    pub fn parse(cell: &Cell, value: &str) -> Result<TargetSpec, BuildTargetError> {
        if let Some(prefix) = value.strip_suffix("/...") {
            let base = prefix.strip_prefix("//").ok_or_else(|| {
                BuildTargetError::MalformedTarget(format!(
                    "Specs must be cell-relative (`//...`): `{value}`"
                ))
            })?;
            return Ok(TargetSpec::Recursive {
                base_path: PathBuf::from(base),
            });
        }
        if value == "//..." {
            return Ok(TargetSpec::Recursive {
                base_path: PathBuf::new(),
            });
        }
        if let Some(prefix) = value.strip_suffix(':') {
            let base = prefix.strip_prefix("//").ok_or_else(|| {
                BuildTargetError::MalformedTarget(format!(
                    "Specs must be cell-relative (`//...`): `{value}`"
                ))
            })?;
            return Ok(TargetSpec::Package {
                base_path: PathBuf::from(base),
            });
        }
        BuildTarget::parse(cell.root(), value)
            .map(TargetSpec::Exact)
            .map_err(BuildTargetError::MalformedTarget)
    }
}

///
/// Lists the build files a non-exact spec covers. Blocking: run on the I/O pool.
///
pub(crate) fn collect_build_files(
    cell: &Cell,
    base_path: &Path,
    recursive: bool,
) -> Result<Vec<PathBuf>, BuildTargetError> {
    let root = cell.root().join(base_path);
    if !recursive {
        let build_file = root.join(cell.build_file_name());
        if !build_file.is_file() {
            return Err(BuildTargetError::Parse(ParseError::FileNotFound(build_file)));
        }
        return Ok(vec![build_file]);
    }

    let mut build_files = Vec::new();
    for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            BuildTargetError::Internal(format!(
                "Failed to list build files under {}: {e}",
                root.display()
            ))
        })?;
        if entry.file_type().is_file()
            && entry.file_name().to_str() == Some(cell.build_file_name())
            && !cell.is_temp_file(entry.path())
        {
            build_files.push(entry.path().to_path_buf());
        }
    }
    Ok(build_files)
}

///
/// The package base path of a build file within its cell.
///
pub(crate) fn base_path_of(cell: &Cell, build_file: &Path) -> Result<PathBuf, BuildTargetError> {
    let package_dir = build_file.parent().unwrap_or_else(|| Path::new(""));
    cell.relativize(package_dir)
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            BuildTargetError::Internal(format!(
                "Build file {} is not under the cell root {}",
                build_file.display(),
                cell.root().display()
            ))
        })
}
