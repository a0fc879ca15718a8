//! Cancellation scopes
//!
//! A scope is a cancellation and error-grouping domain. Scopes form a tree:
//! cancelling a scope is observed by every descendant, never by siblings.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{Result, WatchError};

/// Scope identifier, unique per runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

struct ScopeInner {
    id: ScopeId,
    parent: Option<Scope>,
    cancel_tx: watch::Sender<bool>,
    finished: AtomicBool,
}

/// Handle to a live (or finished) scope. Cheap to clone.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(id: ScopeId, parent: Option<Scope>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScopeInner {
                id,
                parent,
                cancel_tx,
                finished: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    /// This scope followed by its ancestors, innermost first
    pub fn lineage(&self) -> impl Iterator<Item = &Scope> {
        std::iter::successors(Some(self), |s| s.parent())
    }

    pub fn is_descendant_of(&self, ancestor: &Scope) -> bool {
        self.lineage().skip(1).any(|s| s.id() == ancestor.id())
    }

    /// Cancel this scope and, through them observing it, all descendants
    pub fn cancel(&self) {
        self.inner.cancel_tx.send_replace(true);
    }

    /// True if this scope or any ancestor was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.lineage().any(|s| *s.inner.cancel_tx.borrow())
    }

    /// Resolves once this scope or any ancestor is cancelled
    pub async fn cancelled(&self) {
        let mut receivers: Vec<watch::Receiver<bool>> = self
            .lineage()
            .map(|s| s.inner.cancel_tx.subscribe())
            .collect();

        loop {
            if receivers.iter().any(|rx| *rx.borrow()) {
                return;
            }
            let changes = receivers.iter_mut().map(|rx| Box::pin(rx.changed()));
            let _ = futures::future::select_all(changes).await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Mark finished. Returns false if it already was.
    pub(crate) fn finish(&self) -> bool {
        !self.inner.finished.swap(true, Ordering::SeqCst)
    }

    /// Error that unwinds to, and is absorbed by, this scope
    pub fn exit(&self) -> WatchError {
        WatchError::ScopeExit {
            scope: Some(self.id()),
        }
    }

    /// Error that unwinds through this scope up to `ancestor`
    pub fn exit_ancestor(&self, ancestor: &Scope) -> WatchError {
        WatchError::ScopeExit {
            scope: Some(ancestor.id()),
        }
    }

    /// Turn a ledger revert whose reason is on `expected` into an exit of
    /// this scope; any other error is returned unchanged.
    pub fn exit_on_expected_error<S: AsRef<str>>(&self, err: WatchError, expected: &[S]) -> WatchError {
        match err.revert_reason() {
            Some(reason) if expected.iter().any(|e| reason.contains(e.as_ref())) => self.exit(),
            _ => err,
        }
    }

    /// Bail out with an exit if the scope was cancelled between steps
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(self.exit())
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id())
            .field("parent", &self.parent().map(Scope::id))
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}
