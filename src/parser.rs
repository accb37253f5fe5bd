// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use address::BuildTarget;
use futures::future;
use interpreter::{FileParserPool, InterpretRequest, ParseError, RawAttributes, RawRuleMap};
use log::debug;
use task_executor::Executor;
use watch::WatchEvent;

use crate::cell::Cell;
use crate::cell_state::CellState;
use crate::daemon::DaemonicParserState;
use crate::error::BuildTargetError;
use crate::event::{ParseEvent, ParseEventBus};
use crate::nodes::{raw_to_target_node, TargetNode};
use crate::rules::RuleTypeRegistry;
use crate::spec::{base_path_of, collect_build_files, TargetSpec};
use crate::target_graph::TargetGraph;

///
/// The query API over the daemon's parse state.
///
/// Queries route through the per-cell caches: a build file is handed to the interpreter pool
/// only when no valid cached rule map exists, and a target node is converted only when no
/// valid cached node exists, with concurrent identical requests coalesced in both pipelines.
///
pub struct Parser {
    state: Arc<DaemonicParserState>,
    pool: Arc<FileParserPool>,
    rule_types: Arc<dyn RuleTypeRegistry>,
    executor: Executor,
    events: ParseEventBus,
}

impl Parser {
    pub fn new(
        state: Arc<DaemonicParserState>,
        pool: Arc<FileParserPool>,
        rule_types: Arc<dyn RuleTypeRegistry>,
        executor: Executor,
    ) -> Parser {
        Parser {
            state,
            pool,
            rule_types,
            executor,
            events: ParseEventBus::new(),
        }
    }

    pub fn events(&self) -> &ParseEventBus {
        &self.events
    }

    pub fn state(&self) -> &Arc<DaemonicParserState> {
        &self.state
    }

    /// The watch-service entry point, see `DaemonicParserState::on_file_system_change`.
    pub fn on_file_system_change(&self, event: &WatchEvent) -> usize {
        self.state.on_file_system_change(event)
    }

    ///
    /// Resolves each requested target to a node, transitively resolves declared dependencies,
    /// and returns the resulting graph. Fails with a missing-rule error naming the target and
    /// its build file, an unrecognized-flavor error, a missing-dependency error naming both
    /// ends of the missing edge, or a cycle error.
    ///
    pub async fn build_target_graph(
        &self,
        cell: &Cell,
        targets: Vec<BuildTarget>,
    ) -> Result<TargetGraph, BuildTargetError> {
        self.events.post(ParseEvent::QueryStarted {
            targets: targets.clone(),
        });
        let result = self.build_target_graph_inner(cell, &targets).await;
        self.events.post(ParseEvent::QueryFinished {
            targets,
            nodes: result.as_ref().ok().map(TargetGraph::len),
        });
        result
    }

    async fn build_target_graph_inner(
        &self,
        cell: &Cell,
        targets: &[BuildTarget],
    ) -> Result<TargetGraph, BuildTargetError> {
        let cell_state = self.state.get_or_create_cell_state(cell);

        let mut graph = TargetGraph::new();
        let mut visited: HashSet<BuildTarget> = HashSet::new();
        let mut queue: VecDeque<(Option<BuildTarget>, BuildTarget)> =
            targets.iter().map(|t| (None, t.clone())).collect();

        while let Some((dependent, target)) = queue.pop_front() {
            if !visited.insert(target.clone()) {
                if let Some(dependent) = &dependent {
                    graph.add_dep_edge(dependent, &target);
                }
                continue;
            }

            let node = match self.target_node(&cell_state, cell, &target).await {
                Ok(node) => node,
                Err(BuildTargetError::MissingRule {
                    target: missing,
                    build_file,
                }) => {
                    // A missing transitive dependency reports both ends of the broken edge; a
                    // missing root target reports the file that was searched.
                    return Err(match dependent {
                        Some(dependent) => BuildTargetError::MissingDependency {
                            dependent,
                            dependency: missing,
                        },
                        None => BuildTargetError::MissingRule {
                            target: missing,
                            build_file,
                        },
                    });
                }
                Err(e) => return Err(e),
            };

            graph.add_node(node.clone());
            if let Some(dependent) = &dependent {
                graph.add_dep_edge(dependent, &target);
            }
            for dep in node.deps() {
                queue.push_back((Some(target.clone()), dep.clone()));
            }
        }

        graph.check_acyclic()?;
        Ok(graph)
    }

    ///
    /// Expands the given specs into concrete targets by listing and parsing the build files
    /// they cover, filters the constructed nodes by `predicate`, and builds the graph for the
    /// surviving targets.
    ///
    pub async fn build_target_graph_for_specs<P>(
        &self,
        cell: &Cell,
        specs: Vec<TargetSpec>,
        predicate: P,
    ) -> Result<(Vec<BuildTarget>, TargetGraph), BuildTargetError>
    where
        P: Fn(&TargetNode) -> bool,
    {
        let cell_state = self.state.get_or_create_cell_state(cell);

        let mut targets: Vec<BuildTarget> = Vec::new();
        let mut seen: HashSet<BuildTarget> = HashSet::new();
        for spec in specs {
            let (base_path, recursive) = match spec {
                TargetSpec::Exact(target) => {
                    if seen.insert(target.clone()) {
                        targets.push(target);
                    }
                    continue;
                }
                TargetSpec::Package { base_path } => (base_path, false),
                TargetSpec::Recursive { base_path } => (base_path, true),
            };

            let build_files = {
                let cell = cell.clone();
                let base_path = base_path.clone();
                self.executor
                    .spawn_blocking(
                        move || collect_build_files(&cell, &base_path, recursive),
                        |join_error| {
                            Err(BuildTargetError::Internal(format!(
                                "Build file listing failed: {join_error}"
                            )))
                        },
                    )
                    .await?
            };
            debug!("Spec //{}{} covers {} build file(s)", base_path.display(),
                   if recursive { "/..." } else { ":" }, build_files.len());

            for build_file in build_files {
                let rule_map = self
                    .raw_rule_map(&cell_state, cell, &build_file)
                    .await
                    .map_err(BuildTargetError::Parse)?;
                let base_path = base_path_of(cell, &build_file)?;

                // Conversions of the rules in one file are independent: run them concurrently.
                let cell_state = &cell_state;
                let conversions: Vec<_> = rule_map
                    .rules()
                    .map(|(rule_name, _)| {
                        let target =
                            BuildTarget::new(cell.root().clone(), base_path.clone(), rule_name);
                        async move {
                            let node = self.target_node(cell_state, cell, &target).await?;
                            Ok::<_, BuildTargetError>((target, node))
                        }
                    })
                    .collect();
                for (target, node) in future::try_join_all(conversions).await? {
                    if predicate(&node) && seen.insert(target.clone()) {
                        targets.push(target);
                    }
                }
            }
        }

        let graph = self.build_target_graph(cell, targets.clone()).await?;
        Ok((targets, graph))
    }

    ///
    /// Diagnostic accessor: the unconverted attributes of one rule, for tooling.
    ///
    pub async fn get_raw_target_node(
        &self,
        cell: &Cell,
        target: &BuildTarget,
    ) -> Result<RawAttributes, BuildTargetError> {
        let cell_state = self.state.get_or_create_cell_state(cell);
        let build_file = target.build_file_path(cell.build_file_name());
        let rule_map = self
            .raw_rule_map(&cell_state, cell, &build_file)
            .await
            .map_err(BuildTargetError::Parse)?;
        rule_map
            .get(target.short_name())
            .cloned()
            .ok_or_else(|| BuildTargetError::MissingRule {
                target: target.unflavored(),
                build_file,
            })
    }

    ///
    /// Every target node declared in the given build file, in declaration order.
    ///
    pub async fn get_all_target_nodes(
        &self,
        cell: &Cell,
        build_file: &Path,
    ) -> Result<Vec<Arc<TargetNode>>, BuildTargetError> {
        let cell_state = self.state.get_or_create_cell_state(cell);
        let rule_map = self
            .raw_rule_map(&cell_state, cell, build_file)
            .await
            .map_err(BuildTargetError::Parse)?;
        let base_path = base_path_of(cell, build_file)?;

        let mut nodes = Vec::with_capacity(rule_map.rule_count());
        for (rule_name, _) in rule_map.rules() {
            let target = BuildTarget::new(cell.root().clone(), base_path.clone(), rule_name);
            nodes.push(self.target_node(&cell_state, cell, &target).await?);
        }
        Ok(nodes)
    }

    ///
    /// The raw pipeline: cache hit, or a parse on the interpreter pool. The started/finished
    /// event pair is posted inside the computation, so exactly one started event is emitted
    /// per build file actually parsed, and none for cache hits.
    ///
    async fn raw_rule_map(
        &self,
        cell_state: &CellState,
        cell: &Cell,
        build_file: &Path,
    ) -> Result<Arc<RawRuleMap>, ParseError> {
        cell_state
            .get_or_compute_raw(build_file, || {
                let build_file = build_file.to_path_buf();
                async move {
                    self.events.post(ParseEvent::FileParseStarted {
                        build_file: build_file.clone(),
                    });
                    debug!("Parsing {build_file:?}");
                    let result = self
                        .pool
                        .parse(InterpretRequest {
                            cell_root: cell.root().as_path().to_path_buf(),
                            build_file: build_file.clone(),
                            default_includes: cell.default_include_paths().to_vec(),
                            environment: cell.config().environment.clone(),
                        })
                        .await;
                    self.events.post(ParseEvent::FileParseFinished {
                        build_file,
                        rules: result.as_ref().ok().map(RawRuleMap::rule_count),
                    });
                    result.map(Arc::new)
                }
            })
            .await
    }

    ///
    /// The node pipeline: cache hit, or raw-map lookup plus conversion (on the blocking pool,
    /// since validation stats the filesystem for symlink checks).
    ///
    async fn target_node(
        &self,
        cell_state: &CellState,
        cell: &Cell,
        target: &BuildTarget,
    ) -> Result<Arc<TargetNode>, BuildTargetError> {
        cell_state
            .get_or_compute_node(target, || {
                let build_file = target.build_file_path(cell.build_file_name());
                async move {
                    let rule_map = self
                        .raw_rule_map(cell_state, cell, &build_file)
                        .await
                        .map_err(BuildTargetError::Parse)?;
                    let raw = rule_map
                        .get(target.short_name())
                        .cloned()
                        .ok_or_else(|| BuildTargetError::MissingRule {
                            target: target.unflavored(),
                            build_file: build_file.clone(),
                        })?;

                    let (node, source_paths) = {
                        let cell = cell.clone();
                        let target = target.clone();
                        let build_file = build_file.clone();
                        let rule_types = self.rule_types.clone();
                        self.executor
                            .spawn_blocking(
                                move || {
                                    raw_to_target_node(
                                        &cell,
                                        &target,
                                        &build_file,
                                        &raw,
                                        &*rule_types,
                                    )
                                },
                                |join_error| {
                                    Err(BuildTargetError::Internal(format!(
                                        "Node conversion failed: {join_error}"
                                    )))
                                },
                            )
                            .await?
                    };

                    let mut dep_paths = vec![build_file];
                    dep_paths.extend(rule_map.includes().iter().cloned());
                    dep_paths.extend(source_paths);
                    Ok((Arc::new(node), dep_paths))
                }
            })
            .await
    }
}
