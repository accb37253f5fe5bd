// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use address::BuildTarget;
use interpreter::{ParseError, RawRuleMap};
use log::debug;
use node_cache::{DepSet, NodeCache};
use parking_lot::RwLock;
use watch::WatchEventKind;

use crate::cell::Cell;
use crate::error::BuildTargetError;
use crate::nodes::TargetNode;

///
/// The per-cell cache: raw rule maps keyed by build file, and constructed target nodes keyed
/// by (possibly flavored) target. Both caches coalesce concurrent requests per key and record
/// each entry's dependency set for invalidation.
///
/// Lives for the daemon's session. Created lazily by DaemonicParserState on the first query
/// that touches the cell.
///
pub struct CellState {
    cell: RwLock<Cell>,
    raw: NodeCache<PathBuf, Arc<RawRuleMap>, ParseError>,
    nodes: NodeCache<BuildTarget, Arc<TargetNode>, BuildTargetError>,
}

impl CellState {
    pub fn new(cell: Cell) -> CellState {
        CellState {
            cell: RwLock::new(cell),
            raw: NodeCache::new(),
            nodes: NodeCache::new(),
        }
    }

    pub fn cell(&self) -> Cell {
        self.cell.read().clone()
    }

    ///
    /// Returns the cached raw rule map for the build file, or computes it via `compute`,
    /// which runs exactly once even under concurrent callers. The entry's dependency set is
    /// the build file itself plus every include the interpreter reports having read.
    ///
    pub async fn get_or_compute_raw<F, Fut>(
        &self,
        build_file: &Path,
        compute: F,
    ) -> Result<Arc<RawRuleMap>, ParseError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Arc<RawRuleMap>, ParseError>>,
    {
        let key = build_file.to_path_buf();
        self.raw
            .get_or_compute(&key, || {
                let fut = compute();
                let build_file = key.clone();
                async move {
                    let rule_map = fut.await?;
                    let mut deps = DepSet::new();
                    deps.add_path(build_file);
                    deps.add_paths(rule_map.includes().iter().cloned());
                    Ok((rule_map, Arc::new(deps)))
                }
            })
            .await
    }

    ///
    /// The typed-node analog of `get_or_compute_raw`, keyed by target. `compute` returns the
    /// node plus the absolute source paths its globs matched; the entry's dependency set is
    /// those sources plus the declaring build file and its includes.
    ///
    pub async fn get_or_compute_node<F, Fut>(
        &self,
        target: &BuildTarget,
        compute: F,
    ) -> Result<Arc<TargetNode>, BuildTargetError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(Arc<TargetNode>, Vec<PathBuf>), BuildTargetError>>,
    {
        self.nodes
            .get_or_compute(target, || {
                let fut = compute();
                async move {
                    let (node, dep_paths) = fut.await?;
                    let mut deps = DepSet::new();
                    deps.add_paths(dep_paths);
                    Ok((node, Arc::new(deps)))
                }
            })
            .await
    }

    pub fn peek_raw(&self, build_file: &Path) -> Option<Arc<RawRuleMap>> {
        self.raw.peek(&build_file.to_path_buf())
    }

    ///
    /// Applies one filesystem change to this cell's caches, returning the number of entries
    /// cleared.
    ///
    /// Modifications invalidate exactly the entries whose dependency set contains the path:
    /// containment in a package directory alone is never a trigger. Creates and deletes are
    /// additionally treated as potentially changing glob results, and so conservatively
    /// invalidate the owning package's build file (or, when package-boundary enforcement is
    /// disabled, every cached ancestor build file up to the cell root).
    ///
    pub fn invalidate_path(&self, kind: WatchEventKind, path: &Path) -> usize {
        let cell = self.cell.read().clone();
        if cell.is_temp_file(path) {
            debug!("Ignoring temp file event for {path:?}");
            return 0;
        }

        let mut cleared = 0;

        // Entries that directly depend on the path. An in-flight entry has not discovered its
        // dependency set yet (the path could turn out to be one of its includes or sources),
        // so it is conservatively cleared; its computation restarts rather than installing a
        // result derived from a stale read.
        cleared += self.raw.invalidate_matching(|_, deps| match deps {
            Some(deps) => deps.contains_path(path),
            None => true,
        });
        cleared += self.nodes.invalidate_matching(|_, deps| match deps {
            Some(deps) => deps.contains_path(path),
            None => true,
        });

        if matches!(kind, WatchEventKind::Create | WatchEventKind::Delete) {
            cleared += self.invalidate_ancestor_packages(&cell, path);
        }

        cleared
    }

    ///
    /// A created or deleted file can change what an ancestor build file's globs match. Clears
    /// the cached build files whose package directory is a strict ancestor of `path`: just the
    /// owning (nearest) package under package-boundary enforcement, all of them otherwise.
    ///
    fn invalidate_ancestor_packages(&self, cell: &Cell, path: &Path) -> usize {
        let mut ancestors: Vec<PathBuf> = self
            .raw
            .completed_keys()
            .into_iter()
            .filter(|build_file| {
                build_file.as_path() != path
                    && build_file
                        .parent()
                        .is_some_and(|package_dir| path.starts_with(package_dir))
            })
            .collect();

        if cell.enforce_package_boundary() {
            // Only the nearest package owns the new/removed file.
            ancestors = ancestors
                .into_iter()
                .max_by_key(|build_file| build_file.components().count())
                .into_iter()
                .collect();
        }

        let mut cleared = 0;
        for build_file in ancestors {
            debug!("Invalidating {build_file:?} for create/delete under its package");
            cleared += self
                .raw
                .invalidate_matching(|key, _| key.as_path() == build_file.as_path());
            cleared += self.nodes.invalidate_matching(|_, deps| {
                deps.is_some_and(|deps| deps.contains_path(&build_file))
            });
        }
        cleared
    }

    ///
    /// Drops the entire cell cache if the fingerprint of the given cell configuration differs
    /// from the one the caches were populated under, and adopts the new configuration.
    /// Otherwise a no-op.
    ///
    pub fn invalidate_if_environment_changed(&self, new_cell: &Cell) -> usize {
        {
            let current = self.cell.read();
            if current.fingerprint() == new_cell.fingerprint() {
                return 0;
            }
        }
        let mut current = self.cell.write();
        if current.fingerprint() == new_cell.fingerprint() {
            return 0;
        }
        *current = new_cell.clone();
        drop(current);

        debug!(
            "Cell configuration changed for {:?}: invalidating all cached entries.",
            new_cell.root()
        );
        self.invalidate_all()
    }

    ///
    /// Drops the entire cell cache unconditionally, e.g. for a watch overflow where the
    /// specific changed paths are unknown.
    ///
    pub fn invalidate_all(&self) -> usize {
        self.raw.clear() + self.nodes.clear()
    }

    pub fn cached_raw_entries(&self) -> usize {
        self.raw.len()
    }
}
