// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A request-coalescing, dependency-tracked cache.
//!
//! For any key, at most one computation is in flight at a time: the first caller runs the
//! computation itself, and callers arriving while it runs wait on the same result. Each
//! completed entry records the set of filesystem paths it was computed from, so that
//! invalidation can clear exactly the entries a change affects.
//!
//! Invalidation of an in-flight computation is detected with a RunToken: when the computing
//! caller returns, a token mismatch means the entry was invalidated (and possibly restarted)
//! while it ran, and the stale result is discarded rather than installed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::{BuildHasherDefault, Hash};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fnv::FnvHasher;
use log::trace;
use parking_lot::Mutex;
use tokio::sync::oneshot;

type FNV = BuildHasherDefault<FnvHasher>;

///
/// The set of filesystem paths a cached entry was computed from: the build file itself, its
/// includes (transitively), and the source files its globs matched. A change to any member
/// invalidates the entry. Environment dependence is tracked separately, by the per-cell
/// configuration fingerprint, since an environment change invalidates a cell wholesale.
///
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DepSet {
    paths: HashSet<PathBuf, FNV>,
}

impl DepSet {
    pub fn new() -> DepSet {
        DepSet::default()
    }

    pub fn add_path(&mut self, path: PathBuf) -> &mut Self {
        self.paths.insert(path);
        self
    }

    pub fn add_paths<I: IntoIterator<Item = PathBuf>>(&mut self, paths: I) -> &mut Self {
        self.paths.extend(paths);
        self
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }
}

///
/// A token that uniquely identifies one run of a computation for a key. When a run completes,
/// if the current token of its entry no longer matches the token the run started with (because
/// the entry was invalidated), the result is discarded. See `NodeCache::get_or_compute`.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct RunToken(u32);

impl RunToken {
    fn initial() -> RunToken {
        RunToken(0)
    }

    fn next(self) -> RunToken {
        RunToken(self.0.wrapping_add(1))
    }
}

enum EntryState<V, E> {
    // No valid value, and nothing computing one. The token has been incremented past any
    // outstanding run.
    NotStarted {
        run_token: RunToken,
    },
    // One caller is computing a value; the rest wait. Waiters whose sender is dropped (by
    // invalidation) observe a closed channel and retry from scratch.
    Running {
        run_token: RunToken,
        waiters: Vec<oneshot::Sender<Result<V, E>>>,
    },
    // A valid value and the dependency set it was computed from. Failures are never stored.
    Completed {
        run_token: RunToken,
        result: V,
        deps: Arc<DepSet>,
    },
}

struct Entry<V, E> {
    state: Arc<Mutex<EntryState<V, E>>>,
}

// Derived Clone would demand V: Clone + E: Clone on the impl.
impl<V, E> Clone for Entry<V, E> {
    fn clone(&self) -> Self {
        Entry {
            state: self.state.clone(),
        }
    }
}

impl<V, E> Entry<V, E> {
    fn new() -> Entry<V, E> {
        Entry {
            state: Arc::new(Mutex::new(EntryState::NotStarted {
                run_token: RunToken::initial(),
            })),
        }
    }
}

enum Role<V, E> {
    Hit(V),
    Wait(oneshot::Receiver<Result<V, E>>),
    Run(RunToken),
}

fn clear_entry<V, E>(state: &mut EntryState<V, E>) {
    let run_token = match state {
        EntryState::NotStarted { run_token }
        | EntryState::Running { run_token, .. }
        | EntryState::Completed { run_token, .. } => *run_token,
    };
    // Swapping in a bumped token invalidates any outstanding run, and dropping a Running
    // state's waiters makes them retry.
    *state = EntryState::NotStarted {
        run_token: run_token.next(),
    };
}

///
/// Reverts an entry to NotStarted if the computing caller is dropped (query cancellation)
/// before its run completes: otherwise the entry would sit in Running forever and every future
/// caller would park on it. Disarmed once the run reaches its install-or-discard decision.
///
struct RunGuard<'a, V, E> {
    entry: &'a Entry<V, E>,
    run_token: RunToken,
    armed: bool,
}

impl<V, E> Drop for RunGuard<'_, V, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.entry.state.lock();
        let abandoned = matches!(
            &*state,
            EntryState::Running { run_token, .. } if *run_token == self.run_token
        );
        if abandoned {
            clear_entry(&mut state);
        }
    }
}

///
/// A concurrently-accessible cache from K to V with request coalescing and precise
/// invalidation.
///
/// The outer map lock is held only to locate an entry; all state transitions happen under the
/// entry's own lock, so computations and invalidations for unrelated keys never serialize on
/// one another.
///
pub struct NodeCache<K, V, E> {
    nodes: Mutex<HashMap<K, Entry<V, E>, FNV>>,
}

impl<K, V, E> NodeCache<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug,
    V: Clone,
    E: Clone,
{
    pub fn new() -> NodeCache<K, V, E> {
        NodeCache {
            nodes: Mutex::new(HashMap::default()),
        }
    }

    ///
    /// Returns the cached value for `key`, or computes it. For N concurrent callers of an
    /// uncached key the compute function runs exactly once, and all N receive the same value
    /// (or the same error). Errors are delivered to every waiter but never cached: the next
    /// call retries.
    ///
    /// If the entry is invalidated while the computation runs, the stale result is discarded
    /// and the computation reruns, so the returned value is never one that was invalidated
    /// before being returned.
    ///
    pub async fn get_or_compute<F, Fut>(&self, key: &K, compute: F) -> Result<V, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(V, Arc<DepSet>), E>>,
    {
        loop {
            let entry = {
                let mut nodes = self.nodes.lock();
                nodes.entry(key.clone()).or_insert_with(Entry::new).clone()
            };

            let role = {
                let mut state = entry.state.lock();
                match &mut *state {
                    EntryState::Completed { result, .. } => Role::Hit(result.clone()),
                    EntryState::Running { waiters, .. } => {
                        let (send, recv) = oneshot::channel();
                        waiters.push(send);
                        Role::Wait(recv)
                    }
                    EntryState::NotStarted { run_token } => {
                        let run_token = *run_token;
                        *state = EntryState::Running {
                            run_token,
                            waiters: Vec::new(),
                        };
                        Role::Run(run_token)
                    }
                }
            };

            match role {
                Role::Hit(value) => return Ok(value),
                Role::Wait(recv) => {
                    match recv.await {
                        Ok(result) => return result,
                        Err(_) => {
                            // The computation we were waiting on was invalidated before it
                            // could publish a result: retry.
                            trace!("Waiter for {key:?} was invalidated: retrying.");
                        }
                    }
                }
                Role::Run(run_token) => {
                    let mut guard = RunGuard {
                        entry: &entry,
                        run_token,
                        armed: true,
                    };
                    let result = compute().await;
                    guard.armed = false;
                    if let Some(final_result) = self.complete(&entry, run_token, result) {
                        return final_result;
                    }
                    // Our run was invalidated while in flight: discard and recompute.
                    trace!("Computation for {key:?} was invalidated while running: retrying.");
                }
            }
        }
    }

    ///
    /// Install-or-discard for a finished run. Returns None if the run's token no longer
    /// matches, in which case the result must not be observed by anyone.
    ///
    fn complete(
        &self,
        entry: &Entry<V, E>,
        run_token: RunToken,
        result: Result<(V, Arc<DepSet>), E>,
    ) -> Option<Result<V, E>> {
        let mut state = entry.state.lock();
        let prev = mem::replace(
            &mut *state,
            EntryState::NotStarted {
                run_token: RunToken::initial(),
            },
        );
        match prev {
            EntryState::Running {
                run_token: current,
                waiters,
            } if current == run_token => match result {
                Ok((value, deps)) => {
                    for waiter in waiters {
                        let _ = waiter.send(Ok(value.clone()));
                    }
                    *state = EntryState::Completed {
                        run_token: current,
                        result: value.clone(),
                        deps,
                    };
                    Some(Ok(value))
                }
                Err(e) => {
                    for waiter in waiters {
                        let _ = waiter.send(Err(e.clone()));
                    }
                    *state = EntryState::NotStarted {
                        run_token: current,
                    };
                    Some(Err(e))
                }
            },
            other => {
                // The entry was invalidated (and possibly already restarted by another caller)
                // while we were computing. Put back whatever state we found.
                *state = other;
                None
            }
        }
    }

    ///
    /// If a valid value is cached for `key`, returns a clone of it.
    ///
    pub fn peek(&self, key: &K) -> Option<V> {
        let entry = self.nodes.lock().get(key).cloned()?;
        let state = entry.state.lock();
        match &*state {
            EntryState::Completed { result, .. } => Some(result.clone()),
            _ => None,
        }
    }

    ///
    /// The keys of all entries currently holding a valid value.
    ///
    pub fn completed_keys(&self) -> Vec<K> {
        let nodes = self.nodes.lock();
        nodes
            .iter()
            .filter(|(_, entry)| {
                matches!(&*entry.state.lock(), EntryState::Completed { .. })
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    ///
    /// Clears every entry matched by the predicate, which receives the entry's dependency set
    /// if it has completed (in-flight entries have not discovered their dependencies yet, and
    /// receive None). Clearing an in-flight entry drops its waiters, which transparently
    /// retry. Returns the number of entries cleared.
    ///
    pub fn invalidate_matching<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K, Option<&DepSet>) -> bool,
    {
        let entries: Vec<(K, Entry<V, E>)> = {
            let nodes = self.nodes.lock();
            nodes
                .iter()
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect()
        };

        let mut cleared = 0;
        for (key, entry) in entries {
            let mut state = entry.state.lock();
            let matched = match &*state {
                EntryState::Completed { deps, .. } => predicate(&key, Some(deps)),
                EntryState::Running { .. } => predicate(&key, None),
                EntryState::NotStarted { .. } => false,
            };
            if matched {
                clear_entry(&mut state);
                cleared += 1;
            }
        }
        cleared
    }

    ///
    /// Unconditionally clears every entry, including in-flight ones (whose waiters retry and
    /// whose eventual results are discarded).
    ///
    pub fn clear(&self) -> usize {
        let mut nodes = self.nodes.lock();
        let mut cleared = 0;
        for entry in nodes.values() {
            let mut state = entry.state.lock();
            if !matches!(&*state, EntryState::NotStarted { .. }) {
                cleared += 1;
            }
            clear_entry(&mut state);
        }
        nodes.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }
}

#[cfg(test)]
mod tests;
