//! Structured concurrency: scopes and supervised background threads

mod scope;
mod threads;

pub use scope::{Scope, ScopeId};
pub use threads::{
    ErrorClass, ErrorClassifier, RunnerStats, ScopedRunner, ThreadFailure, ThreadId, ThreadInfo, ThreadOutcome,
};
