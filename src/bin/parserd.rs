// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A minimal daemon wrapper over the parser library: parses the given targets in a cell, and
//! with `--watch` keeps running, re-resolving on demand so that filesystem invalidation can be
//! observed interactively.
//!
//! Usage: parserd <cell-root> <//target:name>... [--watch]
//!
//! If `<cell-root>/.cellconfig.toml` exists it is read as the cell configuration.

use std::io::BufRead;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use parser::{
    AttrKind, AttrSpec, BuildTargetError, Cell, CellConfig, DaemonicParserState, FlavorDomain,
    Parser, RuleType, SimpleRuleTypes,
};

use address::{BuildTarget, Flavor};
use interpreter::simple::SimpleInterpreter;
use interpreter::{FileParserPool, Interpreter};
use task_executor::Executor;
use watch::InvalidationWatcher;

fn default_rule_types() -> SimpleRuleTypes {
    let java_flavors = ["src", "doc"].iter().filter_map(|f| Flavor::new(f).ok());
    SimpleRuleTypes::new()
        .with(RuleType::new(
            "java_library",
            FlavorDomain::of(java_flavors),
            vec![AttrSpec {
                name: "testonly",
                kind: AttrKind::Bool,
                required: false,
            }],
        ))
        .with(RuleType::new(
            "genrule",
            FlavorDomain::Unsupported,
            vec![
                AttrSpec {
                    name: "out",
                    kind: AttrKind::String,
                    required: false,
                },
                AttrSpec {
                    name: "cmd",
                    kind: AttrKind::String,
                    required: false,
                },
            ],
        ))
}

fn main() {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let watch_mode = if let Some(idx) = args.iter().position(|a| a == "--watch") {
        args.remove(idx);
        true
    } else {
        false
    };
    if args.len() < 2 {
        eprintln!("Usage: parserd <cell-root> <//target:name>... [--watch]");
        exit(2);
    }

    let executor = Executor::new_owned(num_cpus(), num_cpus() * 4).unwrap_or_else(|e| {
        eprintln!("{e}");
        exit(1);
    });

    let root = PathBuf::from(args.remove(0));
    let config = match std::fs::read_to_string(root.join(".cellconfig.toml")) {
        Ok(text) => CellConfig::from_toml_str(&text).unwrap_or_else(|e| {
            eprintln!("{e}");
            exit(1);
        }),
        Err(_) => CellConfig::default(),
    };
    let cell = Cell::new(root, config).unwrap_or_else(|e| {
        eprintln!("{e}");
        exit(1);
    });
    let targets = args
        .iter()
        .map(|a| BuildTarget::parse(cell.root(), a))
        .collect::<Result<Vec<_>, _>>()
        .unwrap_or_else(|e| {
            eprintln!("{e}");
            exit(2);
        });

    let state = Arc::new(DaemonicParserState::new());
    let factory = || -> Result<Box<dyn Interpreter>, interpreter::ParseError> {
        Ok(Box::new(SimpleInterpreter))
    };
    let pool = Arc::new(FileParserPool::new(
        Arc::new(factory),
        num_cpus(),
        Duration::from_secs(30),
        executor.clone(),
    ));
    let parser = Parser::new(
        state.clone(),
        pool,
        Arc::new(default_rule_types()),
        executor.clone(),
    );

    let _watcher = if watch_mode {
        match InvalidationWatcher::new(Arc::downgrade(&state), cell.root().as_path().to_path_buf())
        {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                eprintln!("{e}");
                exit(1);
            }
        }
    } else {
        None
    };

    run_query(&executor, &parser, &cell, &targets);

    if watch_mode {
        println!("Watching {}; press Enter to re-resolve, ^D to quit.", cell.root().display());
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            if line.is_err() {
                break;
            }
            run_query(&executor, &parser, &cell, &targets);
        }
    }

    executor.shutdown(Duration::from_secs(3));
}

fn run_query(executor: &Executor, parser: &Parser, cell: &Cell, targets: &[BuildTarget]) {
    let result: Result<_, BuildTargetError> =
        executor.block_on(parser.build_target_graph(cell, targets.to_vec()));
    match result {
        Ok(graph) => {
            println!("Resolved {} target node(s):", graph.len());
            for node in graph.nodes() {
                println!(
                    "  {} ({}) [{}]",
                    node.target(),
                    node.rule_type(),
                    node.raw_inputs_hash()
                );
            }
        }
        Err(e) => eprintln!("{e}"),
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}
