// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::{
    translate_event, InvalidateCaller, Invalidatable, InvalidationWatcher, WatchEvent,
    WatchEventKind,
};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;

#[derive(Default)]
struct TestInvalidatable {
    calls: Mutex<Vec<Vec<WatchEvent>>>,
    overflows: Mutex<usize>,
}

impl TestInvalidatable {
    fn was_invalidated(&self, path: &Path) -> bool {
        let calls = self.calls.lock();
        calls
            .iter()
            .flatten()
            .any(|event| event.path.as_deref() == Some(path))
    }
}

impl Invalidatable for TestInvalidatable {
    fn invalidate(&self, events: &[WatchEvent], _caller: InvalidateCaller) -> usize {
        let invalidated = events.len();
        let mut calls = self.calls.lock();
        calls.push(events.to_vec());
        invalidated
    }

    fn invalidate_all(&self, _caller: InvalidateCaller) -> usize {
        *self.overflows.lock() += 1;
        0
    }
}

fn setup_fs() -> (tempfile::TempDir, PathBuf) {
    // setup a root with a file in it to watch.
    let tempdir = tempfile::TempDir::new().unwrap();
    let root = tempdir.path();
    fs::create_dir(root.join("foo")).unwrap();
    let file_path = root.join("foo/watch_me.txt");
    fs::write(&file_path, "contents").unwrap();
    (tempdir, file_path)
}

#[test]
fn receive_watch_event_on_file_change() {
    let (tempdir, file_path) = setup_fs();
    // The watcher delivers canonical paths, so compare against one.
    let canonical_file_path = fs::canonicalize(&file_path).unwrap();

    let invalidatable = Arc::new(TestInvalidatable::default());
    let _watcher = InvalidationWatcher::new(
        Arc::downgrade(&invalidatable),
        tempdir.path().to_path_buf(),
    )
    .expect("Couldn't create InvalidationWatcher");

    fs::write(&file_path, "stnetnoc").unwrap();

    // Wait for the watcher background thread to deliver the invalidation.
    for _ in 0..20 {
        sleep(Duration::from_millis(100));
        if invalidatable.was_invalidated(&canonical_file_path) {
            // Observed invalidation.
            return;
        }
    }
    panic!("Did not observe invalidation.");
}

#[test]
fn liveness_watch_error() {
    let invalidatable = Arc::new(TestInvalidatable::default());
    let (liveness_sender, liveness_receiver) = crossbeam_channel::unbounded();
    let (event_sender, event_receiver) = crossbeam_channel::unbounded();
    let join_handle = InvalidationWatcher::start_background_thread(
        Arc::downgrade(&invalidatable),
        liveness_sender,
        event_receiver,
    );

    // Should not exit.
    assert_eq!(
        Err(RecvTimeoutError::Timeout),
        liveness_receiver.recv_timeout(Duration::from_millis(100))
    );
    event_sender
        .send(Err(notify::Error::generic(
            "This should kill the background thread",
        )))
        .unwrap();

    // Should exit.
    assert!(liveness_receiver
        .recv_timeout(Duration::from_millis(1000))
        .is_ok());
    join_handle.join().unwrap();
}

#[test]
fn thread_exits_when_invalidatable_is_dropped() {
    let invalidatable = Arc::new(TestInvalidatable::default());
    let (liveness_sender, liveness_receiver) = crossbeam_channel::unbounded();
    let (_event_sender, event_receiver) = crossbeam_channel::unbounded();
    let join_handle = InvalidationWatcher::start_background_thread(
        Arc::downgrade(&invalidatable),
        liveness_sender,
        event_receiver,
    );

    drop(invalidatable);
    assert!(liveness_receiver
        .recv_timeout(Duration::from_millis(1000))
        .is_ok());
    join_handle.join().unwrap();
}

#[test]
fn translate_create_modify_delete() {
    let path = PathBuf::from("/repo/BUILD");
    let create = notify::Event::new(notify::EventKind::Create(
        notify::event::CreateKind::File,
    ))
    .add_path(path.clone());
    assert_eq!(translate_event(create), vec![WatchEvent::create(path.clone())]);

    let modify = notify::Event::new(notify::EventKind::Modify(
        notify::event::ModifyKind::Data(notify::event::DataChange::Content),
    ))
    .add_path(path.clone());
    assert_eq!(translate_event(modify), vec![WatchEvent::modify(path.clone())]);

    let delete = notify::Event::new(notify::EventKind::Remove(
        notify::event::RemoveKind::File,
    ))
    .add_path(path.clone());
    assert_eq!(translate_event(delete), vec![WatchEvent::delete(path)]);
}

#[test]
fn translate_rescan_to_overflow() {
    let event = notify::Event::new(notify::EventKind::Modify(
        notify::event::ModifyKind::Any,
    ))
    .add_path(PathBuf::from("/repo/BUILD"))
    .set_flag(notify::event::Flag::Rescan);
    let translated = translate_event(event);
    assert_eq!(translated, vec![WatchEvent::overflow()]);
    assert_eq!(translated[0].kind, WatchEventKind::Overflow);
}

#[test]
fn translate_ignores_access() {
    let event = notify::Event::new(notify::EventKind::Access(
        notify::event::AccessKind::Read,
    ))
    .add_path(PathBuf::from("/repo/BUILD"));
    assert!(translate_event(event).is_empty());
}
