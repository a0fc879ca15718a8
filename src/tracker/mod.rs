//! Event-sourced model of agents and protocol aggregates

pub mod core_vault;
pub mod ordering;
pub mod reconciler;
pub mod registry;
pub mod state;

pub use core_vault::CoreVaultTotals;
pub use ordering::OrderingMonitor;
pub use reconciler::{Reconciler, ReconcilerStats};
pub use registry::AgentRegistry;
pub use state::{ApplyOutcome, Reconstructor, TrackedState};
