// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::PathBuf;
use std::sync::Arc;

use address::BuildTarget;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

///
/// Structured observability events emitted by the Parser.
///
/// FileParseStarted is posted exactly once per build file actually handed to the interpreter:
/// a cache hit emits nothing, which makes the event stream a direct probe of caching behavior.
/// QueryStarted/QueryFinished bracket each front-door query.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseEvent {
    QueryStarted {
        targets: Vec<BuildTarget>,
    },
    QueryFinished {
        targets: Vec<BuildTarget>,
        // The size of the resulting graph, absent if the query failed.
        nodes: Option<usize>,
    },
    FileParseStarted {
        build_file: PathBuf,
    },
    FileParseFinished {
        build_file: PathBuf,
        // The number of rules parsed, absent if the parse failed.
        rules: Option<usize>,
    },
}

///
/// Fans ParseEvents out to any number of subscribers. Subscribers that have gone away are
/// dropped at the next post.
///
#[derive(Clone)]
pub struct ParseEventBus {
    senders: Arc<Mutex<Vec<Sender<ParseEvent>>>>,
}

impl ParseEventBus {
    pub fn new() -> ParseEventBus {
        ParseEventBus {
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<ParseEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.senders.lock().push(sender);
        receiver
    }

    pub fn post(&self, event: ParseEvent) {
        let mut senders = self.senders.lock();
        senders.retain(|sender| sender.send(event.clone()).is_ok());
    }
}
