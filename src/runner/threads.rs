//! Supervised task runner
//!
//! Every background thread runs inside its own root scope. Failures never
//! propagate to the spawner: they are logged and recorded once in the
//! runner's diagnostics list.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use super::scope::{Scope, ScopeId};
use crate::error::{Result, WatchError};

/// Background thread identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// How a thread's error is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Swallowed like a scope exit
    Expected,
    /// Logged and recorded
    Unexpected,
}

pub type ErrorClassifier = Arc<dyn Fn(&WatchError) -> ErrorClass + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadOutcome {
    Completed,
    Exited,
    Failed,
}

/// Diagnostics entry for a failed thread
#[derive(Debug, Clone)]
pub struct ThreadFailure {
    pub thread_id: ThreadId,
    pub name: String,
    pub scope: ScopeId,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
    pub scope: Scope,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub started: u64,
    pub completed: u64,
    pub exited: u64,
    pub failed: u64,
}

struct RunnerInner {
    next_thread_id: AtomicU64,
    next_scope_id: AtomicU64,
    threads: DashMap<ThreadId, ThreadInfo>,
    scopes: DashMap<ScopeId, Scope>,
    errors: Mutex<Vec<ThreadFailure>>,
    started: AtomicU64,
    completed: AtomicU64,
    exited: AtomicU64,
    failed: AtomicU64,
    classifier: Option<ErrorClassifier>,
    idle: Notify,
}

impl RunnerInner {
    fn new_scope(&self, parent: Option<Scope>) -> Scope {
        let id = ScopeId(self.next_scope_id.fetch_add(1, Ordering::SeqCst));
        let scope = Scope::new(id, parent);
        self.scopes.insert(id, scope.clone());
        scope
    }

    fn finish_scope(&self, scope: &Scope) {
        if scope.finish() {
            self.scopes.remove(&scope.id());
        }
    }

    fn classify(&self, err: &WatchError, scope: &Scope) -> ErrorClass {
        match err {
            WatchError::ScopeExit { scope: None } => ErrorClass::Expected,
            WatchError::ScopeExit { scope: Some(target) } if *target == scope.id() => ErrorClass::Expected,
            _ => self
                .classifier
                .as_ref()
                .map_or(ErrorClass::Unexpected, |classify| classify(err)),
        }
    }

    fn settle(
        &self,
        id: ThreadId,
        name: &str,
        scope: &Scope,
        result: std::thread::Result<Result<()>>,
    ) -> ThreadOutcome {
        let outcome = match result {
            Ok(Ok(())) => {
                debug!("Thread {} ({}) completed", id, name);
                ThreadOutcome::Completed
            }
            Ok(Err(e)) => match self.classify(&e, scope) {
                ErrorClass::Expected => {
                    debug!("Thread {} ({}) exited: {}", id, name, e);
                    ThreadOutcome::Exited
                }
                ErrorClass::Unexpected => {
                    self.record_failure(id, name, scope, &e);
                    ThreadOutcome::Failed
                }
            },
            Err(panic) => {
                let e = WatchError::TaskPanicked(panic_message(panic.as_ref()));
                self.record_failure(id, name, scope, &e);
                ThreadOutcome::Failed
            }
        };

        let counter = match outcome {
            ThreadOutcome::Completed => &self.completed,
            ThreadOutcome::Exited => &self.exited,
            ThreadOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    fn record_failure(&self, id: ThreadId, name: &str, scope: &Scope, e: &WatchError) {
        error!("Thread {} ({}) in {} failed: {}", id, name, scope.id(), e);
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ThreadFailure {
                thread_id: id,
                name: name.to_string(),
                scope: scope.id(),
                error: e.to_string(),
                at: Utc::now(),
            });
    }
}

/// Releases a thread's bookkeeping however its task ends, including when
/// the task itself is dropped by the executor.
struct ThreadGuard {
    inner: Arc<RunnerInner>,
    id: ThreadId,
    scope: Scope,
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        self.inner.threads.remove(&self.id);
        self.inner.finish_scope(&self.scope);
        self.inner.idle.notify_waiters();
    }
}

struct ScopeGuard {
    inner: Arc<RunnerInner>,
    scope: Scope,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.inner.finish_scope(&self.scope);
    }
}

/// Runs `fut` until it finishes or its scope is cancelled
async fn run_in_scope<T>(scope: &Scope, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        res = fut => res,
        _ = scope.cancelled() => Err(scope.exit()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Spawns supervised background threads and runs nested scopes
#[derive(Clone)]
pub struct ScopedRunner {
    inner: Arc<RunnerInner>,
}

impl ScopedRunner {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Runner whose threads treat errors the classifier marks
    /// [`ErrorClass::Expected`] like a scope exit
    pub fn with_classifier(classifier: ErrorClassifier) -> Self {
        Self::build(Some(classifier))
    }

    fn build(classifier: Option<ErrorClassifier>) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                next_thread_id: AtomicU64::new(1),
                next_scope_id: AtomicU64::new(1),
                threads: DashMap::new(),
                scopes: DashMap::new(),
                errors: Mutex::new(Vec::new()),
                started: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                exited: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                classifier,
                idle: Notify::new(),
            }),
        }
    }

    /// Start a supervised background thread in a fresh root scope.
    ///
    /// Returns immediately. A scope exit aimed at the thread's scope (or
    /// untargeted), a cancellation, and errors the classifier accepts end
    /// the thread quietly; anything else, panics included, is logged and
    /// appended to [`errors`](Self::errors) exactly once.
    pub fn start_thread<F, Fut>(&self, name: impl Into<String>, body: F) -> ThreadId
    where
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let id = ThreadId(self.inner.next_thread_id.fetch_add(1, Ordering::SeqCst));
        let scope = self.inner.new_scope(None);

        self.inner.threads.insert(
            id,
            ThreadInfo {
                id,
                name: name.clone(),
                scope: scope.clone(),
                started_at: Utc::now(),
            },
        );
        self.inner.started.fetch_add(1, Ordering::SeqCst);
        debug!("Starting thread {} ({}) in {}", id, name, scope.id());

        let guard = ThreadGuard {
            inner: self.inner.clone(),
            id,
            scope: scope.clone(),
        };
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let task_scope = scope.clone();
            let result = AssertUnwindSafe(async move {
                run_in_scope(&task_scope, body(task_scope.clone())).await
            })
            .catch_unwind()
            .await;
            inner.settle(id, &name, &scope, result);
        });

        id
    }

    /// Run `body` in a new root scope and wait for it.
    ///
    /// `Ok(None)` means the body exited its own scope (or the scope was
    /// cancelled); every other error is returned to the caller.
    pub async fn start_scope<F, Fut, T>(&self, body: F) -> Result<Option<T>>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_scope(None, body).await
    }

    /// Like [`start_scope`](Self::start_scope), nested under `parent`
    pub async fn start_scope_in<F, Fut, T>(&self, parent: &Scope, body: F) -> Result<Option<T>>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_scope(Some(parent.clone()), body).await
    }

    async fn run_scope<F, Fut, T>(&self, parent: Option<Scope>, body: F) -> Result<Option<T>>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = self.inner.new_scope(parent);
        let _guard = ScopeGuard {
            inner: self.inner.clone(),
            scope: scope.clone(),
        };

        match run_in_scope(&scope, body(scope.clone())).await {
            Ok(value) => Ok(Some(value)),
            Err(WatchError::ScopeExit { scope: None }) => Ok(None),
            Err(WatchError::ScopeExit { scope: Some(target) }) if target == scope.id() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Failures recorded so far, oldest first
    pub fn errors(&self) -> Vec<ThreadFailure> {
        self.inner
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn live_threads(&self) -> Vec<ThreadInfo> {
        let mut threads: Vec<ThreadInfo> = self.inner.threads.iter().map(|e| e.value().clone()).collect();
        threads.sort_by_key(|t| t.id);
        threads
    }

    pub fn live_thread_count(&self) -> usize {
        self.inner.threads.len()
    }

    /// Scopes not yet finished, threads' root scopes included
    pub fn live_scopes(&self) -> Vec<ScopeId> {
        let mut ids: Vec<ScopeId> = self.inner.scopes.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> RunnerStats {
        RunnerStats {
            started: self.inner.started.load(Ordering::SeqCst),
            completed: self.inner.completed.load(Ordering::SeqCst),
            exited: self.inner.exited.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
        }
    }

    /// Cancel one thread's scope. Returns false if the thread is gone.
    pub fn cancel_thread(&self, id: ThreadId) -> bool {
        match self.inner.threads.get(&id) {
            Some(info) => {
                info.scope.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live scope
    pub fn cancel_all(&self) {
        let scopes: Vec<Scope> = self.inner.scopes.iter().map(|e| e.value().clone()).collect();
        info!("Cancelling {} live scopes", scopes.len());
        for scope in scopes {
            scope.cancel();
        }
    }

    /// Wait until no thread is live. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.inner.threads.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }
}

impl Default for ScopedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScopedRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedRunner")
            .field("live_threads", &self.inner.threads.len())
            .field("live_scopes", &self.inner.scopes.len())
            .field("stats", &self.stats())
            .finish()
    }
}
