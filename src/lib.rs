pub mod actors;
pub mod bus;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod observer;
pub mod runner;
pub mod tracker;

pub use actors::{CollateralRatioPolicy, LiquidationAction, LiquidationPolicy, LiquidationTrigger};
pub use bus::{EventBus, EventFilter, EventHandler, Notification, SyntheticEvent, Topic};
pub use config::AppConfig;
pub use coordination::{install_signal_handlers, Shutdown, ShutdownSignal, ShutdownToken};
pub use error::{LedgerError, Result, WatchError};
pub use ledger::{AgentInfo, ChannelEventSource, EventSource, LedgerClient, ReplaySource};
pub use logging::init_logging;
pub use observer::{Observer, ObserverExit, ObserverStats};
pub use runner::{Scope, ScopeId, ScopedRunner};
pub use tracker::{Reconciler, TrackedState};
