// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The incremental parse/cache layer of a build daemon.
//!
//! Long-lived, concurrently-queried state maps (cell, build file, environment, includes) to
//! parsed rule definitions and typed target nodes. Filesystem-change events invalidate exactly
//! the cached entries whose recorded dependency set a change affects, and concurrent identical
//! parse requests are coalesced so that a daemon serving many overlapping queries does only
//! the minimum necessary re-parsing.
//!
//! `DaemonicParserState` is the daemon's root object, constructed once by the process entry
//! point; `Parser` is the query API over it; `watch::InvalidationWatcher` feeds it filesystem
//! events; `interpreter::FileParserPool` supplies raw rule maps from an external build-file
//! interpreter.

mod cell;
mod cell_state;
mod daemon;
mod error;
mod event;
mod nodes;
mod parser;
mod rules;
mod spec;
mod target_graph;

pub use crate::cell::{Cell, CellConfig, SymlinkPolicy};
pub use crate::cell_state::CellState;
pub use crate::daemon::DaemonicParserState;
pub use crate::error::BuildTargetError;
pub use crate::event::{ParseEvent, ParseEventBus};
pub use crate::nodes::TargetNode;
pub use crate::parser::Parser;
pub use crate::rules::{AttrKind, AttrSpec, FlavorDomain, RuleType, RuleTypeRegistry, SimpleRuleTypes};
pub use crate::spec::TargetSpec;
pub use crate::target_graph::TargetGraph;

/// The primary cache key for raw parsing: an absolute, canonicalized path to a build file.
pub type BuildFilePath = std::path::PathBuf;
