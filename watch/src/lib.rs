// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Weak;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

///
/// The kind of a filesystem change. Overflow indicates that the underlying watch service lost
/// events and the specific changed paths are unknown; consumers must treat everything they have
/// cached as suspect.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchEventKind {
    Create,
    Modify,
    Delete,
    Overflow,
}

///
/// One filesystem change. The path is absolute (as delivered by the platform watcher) and is
/// absent exactly when the kind is Overflow.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: Option<PathBuf>,
}

impl WatchEvent {
    pub fn create(path: PathBuf) -> WatchEvent {
        WatchEvent {
            kind: WatchEventKind::Create,
            path: Some(path),
        }
    }

    pub fn modify(path: PathBuf) -> WatchEvent {
        WatchEvent {
            kind: WatchEventKind::Modify,
            path: Some(path),
        }
    }

    pub fn delete(path: PathBuf) -> WatchEvent {
        WatchEvent {
            kind: WatchEventKind::Delete,
            path: Some(path),
        }
    }

    pub fn overflow() -> WatchEvent {
        WatchEvent {
            kind: WatchEventKind::Overflow,
            path: None,
        }
    }
}

/// Who initiated an invalidation, for logging.
#[derive(Clone, Copy, Debug)]
pub enum InvalidateCaller {
    Notify,
    External,
}

impl InvalidateCaller {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidateCaller::Notify => "notify",
            InvalidateCaller::External => "external",
        }
    }
}

pub trait Invalidatable: Send + Sync + 'static {
    /// Apply the given path-carrying events, returning the number of entries invalidated.
    fn invalidate(&self, events: &[WatchEvent], caller: InvalidateCaller) -> usize;
    /// The watch service lost track of changes: invalidate everything.
    fn invalidate_all(&self, caller: InvalidateCaller) -> usize;
}

///
/// An InvalidationWatcher maintains a Thread that receives events from a notify Watcher and
/// forwards them to an Invalidatable.
///
/// If the spawned Thread exits for any reason, InvalidationWatcher::running() will return
/// false, and the caller should create a new InvalidationWatcher (or shut down, in some
/// cases).
///
pub struct InvalidationWatcher {
    // Held so that dropping the InvalidationWatcher tears down the platform watches.
    _watcher: RecommendedWatcher,
    liveness: Receiver<()>,
}

impl InvalidationWatcher {
    ///
    /// Begin watching `root` recursively, delivering events to `invalidatable` for as long as
    /// it is alive. Event delivery happens on a single background thread, so events are applied
    /// in arrival order.
    ///
    pub fn new<I: Invalidatable>(
        invalidatable: Weak<I>,
        root: PathBuf,
    ) -> Result<InvalidationWatcher, String> {
        // Inotify events contain canonical paths to the files being watched. If the root
        // contains a symlink the event paths would not share a prefix with it, so canonicalize
        // once up front.
        let canonical_root = std::fs::canonicalize(root.as_path())
            .map_err(|e| format!("Failed to canonicalize watch root: {e}"))?;

        let (watch_sender, watch_receiver) = crossbeam_channel::unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |event_res| {
                let _ = watch_sender.send(event_res);
            },
            notify::Config::default(),
        )
        .map_err(|e| format!("Failed to begin watching the filesystem: {e}"))?;
        watcher
            .watch(&canonical_root, RecursiveMode::Recursive)
            .map_err(|e| format!("Failed to begin recursively watching {canonical_root:?}: {e}"))?;

        let (liveness_sender, liveness_receiver) = crossbeam_channel::unbounded();
        InvalidationWatcher::start_background_thread(invalidatable, liveness_sender, watch_receiver);

        Ok(InvalidationWatcher {
            _watcher: watcher,
            liveness: liveness_receiver,
        })
    }

    pub(crate) fn start_background_thread<I: Invalidatable>(
        invalidatable: Weak<I>,
        liveness_sender: Sender<()>,
        watch_receiver: Receiver<notify::Result<notify::Event>>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            loop {
                let event_res = watch_receiver.recv_timeout(Duration::from_millis(100));
                let invalidatable = if let Some(i) = invalidatable.upgrade() {
                    i
                } else {
                    // The Invalidatable has been dropped: we're done.
                    break;
                };
                match event_res {
                    Ok(Ok(ev)) => {
                        let events = translate_event(ev);
                        if events
                            .iter()
                            .any(|e| e.kind == WatchEventKind::Overflow)
                        {
                            warn!("Filesystem watch overflowed: invalidating all cached entries.");
                            invalidatable.invalidate_all(InvalidateCaller::Notify);
                        } else if !events.is_empty() {
                            debug!("notify delivering {events:?}");
                            invalidatable.invalidate(&events, InvalidateCaller::Notify);
                        }
                    }
                    Ok(Err(err)) => {
                        if let notify::ErrorKind::PathNotFound = err.kind {
                            warn!("Path(s) did not exist: {:?}", err.paths);
                        } else {
                            error!("File watcher failing with: {err}");
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        // The Watcher is gone: we're done.
                        break;
                    }
                };
            }
            debug!("Watch thread exiting.");
            // Signal that we're exiting (which we would also do by just dropping the channel).
            let _ = liveness_sender.send(());
        })
    }

    ///
    /// Returns true if this InvalidationWatcher is still valid: if it is not valid, it will
    /// have already logged some sort of error, and will never restart on its own.
    ///
    pub fn running(&self) -> bool {
        match self.liveness.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => false,
            Err(TryRecvError::Empty) => true,
        }
    }
}

///
/// Maps one notify event to our event model. A rescan flag means the watcher's queue
/// overflowed and per-path information cannot be trusted.
///
pub(crate) fn translate_event(ev: notify::Event) -> Vec<WatchEvent> {
    if ev.need_rescan() {
        return vec![WatchEvent::overflow()];
    }
    let kind = match ev.kind {
        notify::EventKind::Create(_) => WatchEventKind::Create,
        notify::EventKind::Remove(_) => WatchEventKind::Delete,
        notify::EventKind::Modify(_) | notify::EventKind::Any | notify::EventKind::Other => {
            WatchEventKind::Modify
        }
        // Reads never change parse results.
        notify::EventKind::Access(_) => return vec![],
    };
    ev.paths
        .into_iter()
        .map(|path| WatchEvent {
            kind,
            path: Some(path),
        })
        .collect()
}
