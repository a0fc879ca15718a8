//! Observer - wires tracker, bus, runner and actors together
//!
//! Owns the single event-application loop. Events, lazily reconstructed
//! agents and shutdown requests are all handled on that one timeline.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::actors::{CollateralRatioPolicy, LiquidationPolicy, LiquidationTrigger, TriggerStats};
use crate::bus::EventBus;
use crate::config::AppConfig;
use crate::coordination::{ShutdownSignal, ShutdownToken};
use crate::domain::{Amount, LedgerEvent};
use crate::error::{Result, WatchError};
use crate::ledger::{AgentInfo, EventSource, LedgerClient};
use crate::runner::{RunnerStats, ScopedRunner};
use crate::tracker::{Reconciler, ReconcilerStats, Reconstructor, TrackedState};

/// Why the observer loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverExit {
    /// The event source has no more events
    StreamEnded,
    Shutdown(ShutdownSignal),
}

#[derive(Debug, Clone, Serialize)]
pub struct ObserverStats {
    pub reconciler: ReconcilerStats,
    pub runner: RunnerStats,
    pub liquidation: Option<TriggerStats>,
    pub backed_supply_uba: Amount,
    pub tracked_agents: usize,
    pub thread_failures: usize,
}

enum Step {
    Shutdown(ShutdownSignal),
    Reconstructed(AgentInfo),
    Event(Result<Option<LedgerEvent>>),
}

pub struct Observer {
    runner: ScopedRunner,
    bus: Arc<EventBus>,
    reconciler: Reconciler,
    inbox: mpsc::UnboundedReceiver<AgentInfo>,
    trigger: Option<Arc<LiquidationTrigger>>,
    shutdown_grace: Duration,
}

impl Observer {
    /// Observer with the default collateral-ratio liquidation policy
    pub async fn new(config: &AppConfig, ledger: Arc<dyn LedgerClient>) -> Self {
        Self::with_policy(config, ledger, Arc::new(CollateralRatioPolicy)).await
    }

    pub async fn with_policy(
        config: &AppConfig,
        ledger: Arc<dyn LedgerClient>,
        policy: Arc<dyn LiquidationPolicy>,
    ) -> Self {
        let runner = ScopedRunner::new();
        let bus = Arc::new(EventBus::new());

        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let reconstructor = Reconstructor::new(runner.clone(), ledger.clone(), inbox_tx);
        let state = Arc::new(RwLock::new(
            TrackedState::new(&config.tracker).with_reconstructor(reconstructor),
        ));
        let reconciler = Reconciler::new(state.clone(), ledger.clone(), bus.clone());

        let trigger = if config.liquidation.enabled {
            let trigger = Arc::new(LiquidationTrigger::new(
                state,
                ledger,
                runner.clone(),
                policy,
                &config.liquidation,
            ));
            trigger.register(&bus).await;
            Some(trigger)
        } else {
            info!("Liquidation trigger disabled");
            None
        };

        Self {
            runner,
            bus,
            reconciler,
            inbox,
            trigger,
            shutdown_grace: Duration::from_millis(config.runner.shutdown_grace_ms),
        }
    }

    /// Seed the tracked state from the ledger. Call once, before `run`.
    pub async fn initialize(&mut self) -> Result<()> {
        self.reconciler.initialize().await
    }

    /// Consume events until the source ends or shutdown is requested.
    ///
    /// Any error from the source or from applying an event stops the loop
    /// and is returned; the event is not skipped. Background threads are
    /// wound down before returning in every case.
    pub async fn run<S>(&mut self, source: &mut S, mut shutdown: ShutdownToken) -> Result<ObserverExit>
    where
        S: EventSource + ?Sized,
    {
        if !self.reconciler.is_initialized() {
            return Err(WatchError::InvalidState("observer not initialized".to_string()));
        }

        info!("Observer loop started");
        loop {
            let step = tokio::select! {
                biased;
                signal = shutdown.wait_for_shutdown() => Step::Shutdown(signal),
                Some(info) = self.inbox.recv() => Step::Reconstructed(info),
                event = source.next_event() => Step::Event(event),
            };

            match step {
                Step::Shutdown(signal) => {
                    info!("Observer stopping: {} shutdown", signal);
                    self.wind_down(signal).await;
                    return Ok(ObserverExit::Shutdown(signal));
                }
                Step::Reconstructed(info) => {
                    let vault = info.vault;
                    if self.reconciler.install_reconstructed(info).await {
                        debug!("Installed reconstructed agent {}", vault);
                    }
                }
                Step::Event(Ok(Some(event))) => {
                    let position = event.position;
                    if let Err(e) = self.reconciler.apply(event).await {
                        if e.is_fatal() {
                            error!("Event stream diverged from the local model at {}: {}", position, e);
                        } else {
                            error!("Event at {} failed: {}", position, e);
                        }
                        self.wind_down(ShutdownSignal::Graceful).await;
                        return Err(e);
                    }
                }
                Step::Event(Ok(None)) => {
                    info!("Event source ended");
                    self.drain().await;
                    return Ok(ObserverExit::StreamEnded);
                }
                Step::Event(Err(e)) => {
                    error!("Event source error: {}", e);
                    self.wind_down(ShutdownSignal::Graceful).await;
                    return Err(e);
                }
            }
        }
    }

    /// Let running threads finish, install what they fetched, then cancel
    /// anything still alive
    async fn drain(&mut self) {
        if !self.runner.wait_idle(self.shutdown_grace).await {
            warn!(
                "{} threads still running after {:?}",
                self.runner.live_thread_count(),
                self.shutdown_grace
            );
        }
        while let Ok(info) = self.inbox.try_recv() {
            self.reconciler.install_reconstructed(info).await;
        }
        self.runner.cancel_all();
    }

    async fn wind_down(&self, signal: ShutdownSignal) {
        self.runner.cancel_all();
        if signal == ShutdownSignal::Urgent {
            return;
        }
        if !self.runner.wait_idle(self.shutdown_grace).await {
            warn!(
                "{} threads did not stop within {:?}",
                self.runner.live_thread_count(),
                self.shutdown_grace
            );
        }
    }

    pub fn state(&self) -> Arc<RwLock<TrackedState>> {
        self.reconciler.state()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn runner(&self) -> &ScopedRunner {
        &self.runner
    }

    pub fn trigger(&self) -> Option<&Arc<LiquidationTrigger>> {
        self.trigger.as_ref()
    }

    pub async fn stats(&self) -> ObserverStats {
        let state = self.reconciler.state();
        let state = state.read().await;
        ObserverStats {
            reconciler: self.reconciler.stats(),
            runner: self.runner.stats(),
            liquidation: self.trigger.as_ref().map(|t| t.stats()),
            backed_supply_uba: state.backed_supply_uba(),
            tracked_agents: state.agents().len(),
            thread_failures: self.runner.errors().len(),
        }
    }
}
