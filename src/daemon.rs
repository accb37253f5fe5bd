// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use watch::{InvalidateCaller, Invalidatable, WatchEvent, WatchEventKind};

use crate::cell::Cell;
use crate::cell_state::CellState;

///
/// The whole of the daemon's mutable parse state: one CellState per cell root seen so far.
///
/// Constructed once by the process entry point and shared (via Arc) with every query and with
/// the filesystem watcher; explicitly passed, never global. The registry is read on every
/// query and written only when a new cell appears, hence the reader/writer lock.
///
pub struct DaemonicParserState {
    cells: RwLock<HashMap<PathBuf, Arc<CellState>>>,
}

impl DaemonicParserState {
    pub fn new() -> DaemonicParserState {
        DaemonicParserState {
            cells: RwLock::new(HashMap::new()),
        }
    }

    ///
    /// Returns the CellState for the cell's root, lazily constructing and registering one.
    ///
    /// If the cell is already known but its parse-relevant configuration (or referenced
    /// environment) has changed, the existing state's caches are dropped before it is
    /// returned: a changed configuration is a logically new cell.
    ///
    pub fn get_or_create_cell_state(&self, cell: &Cell) -> Arc<CellState> {
        {
            let cells = self.cells.read();
            if let Some(state) = cells.get(cell.root().as_path()) {
                let state = state.clone();
                drop(cells);
                state.invalidate_if_environment_changed(cell);
                return state;
            }
        }

        let mut cells = self.cells.write();
        match cells.get(cell.root().as_path()) {
            Some(state) => {
                let state = state.clone();
                drop(cells);
                state.invalidate_if_environment_changed(cell);
                state
            }
            None => {
                debug!("Creating parser state for cell {:?}", cell.root());
                let state = Arc::new(CellState::new(cell.clone()));
                cells.insert(cell.root().as_path().to_path_buf(), state.clone());
                state
            }
        }
    }

    ///
    /// Recomputes the cell's environment/config fingerprint and drops its caches if it no
    /// longer matches the one the caches were populated under.
    ///
    pub fn update_cell_configuration(&self, cell: &Cell) -> usize {
        let cells = self.cells.read();
        match cells.get(cell.root().as_path()) {
            Some(state) => state.invalidate_if_environment_changed(cell),
            None => 0,
        }
    }

    ///
    /// The watch-service entry point. Path events are forwarded to every registered cell: a
    /// build file's includes may live in a different cell than the file that includes them, so
    /// no cell can be skipped on containment grounds. Overflow (and any other pathless) events
    /// drop everything.
    ///
    /// Callers must deliver events for a given cell in arrival order; the InvalidationWatcher
    /// does so by delivering all events from a single thread.
    ///
    pub fn on_file_system_change(&self, event: &WatchEvent) -> usize {
        match (&event.kind, &event.path) {
            (WatchEventKind::Overflow, _) | (_, None) => {
                warn!("Non-path filesystem event {event:?}: invalidating all cells.");
                self.invalidate_all_cells()
            }
            (kind, Some(path)) => {
                let cells = self.cells.read();
                cells
                    .values()
                    .map(|state| state.invalidate_path(*kind, path))
                    .sum()
            }
        }
    }

    pub fn invalidate_all_cells(&self) -> usize {
        let cells = self.cells.read();
        cells.values().map(|state| state.invalidate_all()).sum()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.read().len()
    }
}

impl Invalidatable for DaemonicParserState {
    fn invalidate(&self, events: &[WatchEvent], caller: InvalidateCaller) -> usize {
        let cleared: usize = events
            .iter()
            .map(|event| self.on_file_system_change(event))
            .sum();
        debug!(
            "{} invalidation: cleared {cleared} entries for {} event(s)",
            caller.as_str(),
            events.len()
        );
        cleared
    }

    fn invalidate_all(&self, caller: InvalidateCaller) -> usize {
        let cleared = self.invalidate_all_cells();
        warn!(
            "{} invalidation: cleared all ({cleared}) cached entries",
            caller.as_str()
        );
        cleared
    }
}
