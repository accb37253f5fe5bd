// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::sync::Arc;

use address::BuildTarget;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::BuildTargetError;
use crate::nodes::TargetNode;

///
/// The node-level dependency graph over the requested closure of targets. A DAG: construction
/// fails with a cycle error naming the member targets otherwise.
///
#[derive(Debug)]
pub struct TargetGraph {
    graph: DiGraph<Arc<TargetNode>, ()>,
    index: HashMap<BuildTarget, NodeIndex>,
}

impl TargetGraph {
    pub(crate) fn new() -> TargetGraph {
        TargetGraph {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn add_node(&mut self, node: Arc<TargetNode>) -> NodeIndex {
        if let Some(&id) = self.index.get(node.target()) {
            return id;
        }
        let target = node.target().clone();
        let id = self.graph.add_node(node);
        self.index.insert(target, id);
        id
    }

    pub(crate) fn add_dep_edge(&mut self, from: &BuildTarget, to: &BuildTarget) {
        if let (Some(&from_id), Some(&to_id)) = (self.index.get(from), self.index.get(to)) {
            self.graph.update_edge(from_id, to_id, ());
        }
    }

    ///
    /// Verifies acyclicity. Cheap for the common (acyclic) case; when a cycle exists, finds
    /// its member targets for the error.
    ///
    pub(crate) fn check_acyclic(&self) -> Result<(), BuildTargetError> {
        if petgraph::algo::toposort(&self.graph, None).is_ok() {
            return Ok(());
        }
        // A cycle is either a strongly connected component of more than one node, or a
        // self-edge.
        for scc in petgraph::algo::tarjan_scc(&self.graph) {
            let is_cycle = scc.len() > 1
                || self
                    .graph
                    .edges(scc[0])
                    .any(|edge| edge.target() == scc[0]);
            if is_cycle {
                let mut targets: Vec<BuildTarget> = scc
                    .into_iter()
                    .map(|id| self.graph[id].target().clone())
                    .collect();
                targets.sort();
                return Err(BuildTargetError::Cycle { targets });
            }
        }
        Err(BuildTargetError::Cycle { targets: vec![] })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn contains(&self, target: &BuildTarget) -> bool {
        self.index.contains_key(target)
    }

    pub fn get(&self, target: &BuildTarget) -> Option<&Arc<TargetNode>> {
        self.index.get(target).map(|&id| &self.graph[id])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<TargetNode>> {
        self.graph.node_weights()
    }

    ///
    /// The declared dependencies of `target` that are present in this graph.
    ///
    pub fn deps_of(&self, target: &BuildTarget) -> Vec<&Arc<TargetNode>> {
        match self.index.get(target) {
            None => vec![],
            Some(&id) => self
                .graph
                .neighbors_directed(id, Direction::Outgoing)
                .map(|dep_id| &self.graph[dep_id])
                .collect(),
        }
    }
}
