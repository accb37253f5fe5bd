// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use task_executor::Executor;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::{InterpretRequest, Interpreter, InterpreterFactory, ParseError, RawRuleMap};

///
/// A bounded pool of long-lived interpreter workers.
///
/// Each worker serves one parse request at a time; requests beyond the pool size queue on the
/// semaphore in arrival order. A worker that crashes or times out is discarded rather than
/// returned to the idle list, and a replacement is spun up lazily by the next request that
/// fails to find an idle worker.
///
pub struct FileParserPool {
    factory: Arc<dyn InterpreterFactory>,
    idle: Mutex<Vec<Box<dyn Interpreter>>>,
    concurrency: Arc<Semaphore>,
    parse_timeout: Duration,
    executor: Executor,
}

impl FileParserPool {
    pub fn new(
        factory: Arc<dyn InterpreterFactory>,
        pool_size: usize,
        parse_timeout: Duration,
        executor: Executor,
    ) -> FileParserPool {
        FileParserPool {
            factory,
            idle: Mutex::new(Vec::with_capacity(pool_size)),
            concurrency: Arc::new(Semaphore::new(pool_size)),
            parse_timeout,
            executor,
        }
    }

    ///
    /// Evaluate one build file on a pool worker.
    ///
    /// The interpret call itself runs on the blocking threadpool; the calling task suspends
    /// while waiting for a free worker and while the interpreter executes.
    ///
    pub async fn parse(&self, request: InterpretRequest) -> Result<RawRuleMap, ParseError> {
        let build_file = request.build_file.clone();

        let _permit = self
            .concurrency
            .acquire()
            .await
            .expect("The pool semaphore is never closed.");

        let mut worker = match self.idle.lock().pop() {
            Some(worker) => worker,
            None => self.factory.spawn()?,
        };

        let parse = self.executor.native_spawn_blocking(move || {
            let result = worker.interpret(&request);
            (worker, result)
        });

        match timeout(self.parse_timeout, parse).await {
            Ok(Ok((worker, Ok(rule_map)))) => {
                self.idle.lock().push(worker);
                Ok(rule_map)
            }
            Ok(Ok((worker, Err(e)))) => {
                match e {
                    ParseError::InterpreterCrash { .. } => {
                        // The worker reported itself broken: do not return it to the pool.
                        warn!("Discarding crashed interpreter worker: {e}");
                    }
                    _ => {
                        // Syntax and missing-file failures do not indicate a broken worker.
                        self.idle.lock().push(worker);
                    }
                }
                Err(e)
            }
            Ok(Err(join_error)) => {
                // The worker panicked. It was consumed by the blocking task, so it is already
                // gone from the pool.
                warn!("Interpreter worker panicked while parsing {build_file:?}: {join_error}");
                Err(ParseError::InterpreterCrash {
                    path: build_file,
                    message: join_error.to_string(),
                })
            }
            Err(_elapsed) => {
                // The blocking task still owns the worker and will drop it whenever the stuck
                // interpret call eventually returns; it is never re-pooled.
                debug!(
                    "Interpreter timed out after {:?} while parsing {build_file:?}",
                    self.parse_timeout
                );
                Err(ParseError::Timeout {
                    path: build_file,
                    after_millis: self.parse_timeout.as_millis() as u64,
                })
            }
        }
    }

    pub fn idle_workers(&self) -> usize {
        self.idle.lock().len()
    }
}
