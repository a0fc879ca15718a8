//! State Reconciler - applies ledger events to the tracked state
//!
//! Holds the write lock only while one event's synchronous handlers run.
//! Price refreshes and bus dispatch happen after the lock is released.

use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::ordering::OrderingMonitor;
use super::state::{ApplyOutcome, TrackedState};
use crate::bus::{EventBus, Notification, SyntheticEvent};
use crate::domain::{EventPosition, LedgerEvent};
use crate::error::{Result, WatchError};
use crate::ledger::{AgentInfo, LedgerClient};

/// Reconciler statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcilerStats {
    pub applied: u64,
    pub skipped: u64,
    pub ignored: u64,
    pub ordering_anomalies: u64,
    pub price_refreshes: u64,
    pub reconstructed: u64,
    /// Highest position applied so far
    pub last_position: Option<EventPosition>,
}

pub struct Reconciler {
    state: Arc<RwLock<TrackedState>>,
    ledger: Arc<dyn LedgerClient>,
    bus: Arc<EventBus>,
    ordering: OrderingMonitor,
    stats: ReconcilerStats,
    initialized: bool,
}

impl Reconciler {
    pub fn new(state: Arc<RwLock<TrackedState>>, ledger: Arc<dyn LedgerClient>, bus: Arc<EventBus>) -> Self {
        Self {
            state,
            ledger,
            bus,
            ordering: OrderingMonitor::new(),
            stats: ReconcilerStats::default(),
            initialized: false,
        }
    }

    pub fn state(&self) -> Arc<RwLock<TrackedState>> {
        self.state.clone()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Seed the model from the ledger's current view.
    ///
    /// Must run before the live event stream is consumed, and only once.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(WatchError::InvalidState("reconciler already initialized".to_string()));
        }

        let settings = self.ledger.settings().await?;
        let collaterals = self.ledger.collateral_types().await?;
        let holdings = self.ledger.core_vault_holdings().await?;
        let vaults = self.ledger.all_agents().await?;
        let agents = try_join_all(vaults.iter().map(|vault| self.ledger.agent_info(*vault))).await?;
        let current = self.ledger.current_prices().await?;
        let trusted = self.ledger.trusted_prices().await?;

        {
            let mut state = self.state.write().await;
            state.load_settings(settings);
            state.load_collaterals(collaterals);
            state.seed_core_vault(holdings);
            for agent in agents {
                state.seed_agent(agent)?;
            }
            state.set_prices(current, trusted);

            info!(
                "Initialized: {} agents, {} collateral types, {} settings, backed supply {} UBA",
                state.agents().len(),
                state.collaterals().len(),
                state.settings().len(),
                state.backed_supply_uba()
            );
        }

        self.initialized = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Apply one event, then tell subscribers about it
    pub async fn apply(&mut self, event: LedgerEvent) -> Result<ApplyOutcome> {
        self.ordering.observe(event.position, event.kind.name_str());

        let outcome = {
            let mut state = self.state.write().await;
            state.apply_event(&event)?
        };

        match outcome {
            ApplyOutcome::Applied | ApplyOutcome::PricesPublished => self.stats.applied += 1,
            ApplyOutcome::Skipped => self.stats.skipped += 1,
            ApplyOutcome::Ignored => self.stats.ignored += 1,
        }

        if outcome == ApplyOutcome::PricesPublished {
            self.refresh_prices().await?;
        }

        self.bus.publish(Notification::Ledger(Arc::new(event))).await;
        Ok(outcome)
    }

    /// Re-read both price snapshots and announce them
    pub async fn refresh_prices(&mut self) -> Result<()> {
        let (current, trusted) = tokio::try_join!(self.ledger.current_prices(), self.ledger.trusted_prices())?;
        {
            let mut state = self.state.write().await;
            state.set_prices(current, trusted);
        }
        self.stats.price_refreshes += 1;
        debug!("Prices refreshed");

        self.bus
            .publish(Notification::Synthetic(SyntheticEvent::PricesChanged))
            .await;
        Ok(())
    }

    /// Hand a lazily fetched agent to the state
    pub async fn install_reconstructed(&mut self, info: AgentInfo) -> bool {
        let installed = self.state.write().await.install_reconstructed(info);
        if installed {
            self.stats.reconstructed += 1;
        }
        installed
    }

    pub fn stats(&self) -> ReconcilerStats {
        ReconcilerStats {
            ordering_anomalies: self.ordering.anomalies(),
            last_position: self.ordering.last(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventHandler, Topic};
    use crate::config::TrackerConfig;
    use crate::domain::event::args;
    use crate::domain::{AgentStatus, EventKind, PriceSnapshot};
    use crate::ledger::MockLedgerClient;
    use alloy::primitives::Address;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info(n: u8, minted: u128) -> AgentInfo {
        AgentInfo {
            vault: Address::repeat_byte(n),
            owner: Address::repeat_byte(0xee),
            underlying_address: format!("rAgent{n}"),
            collateral_pool: Address::repeat_byte(n.wrapping_add(0x80)),
            status: AgentStatus::Normal,
            publicly_available: true,
            vault_collateral_token: Address::repeat_byte(0xcc),
            vault_collateral_wei: 0,
            pool_collateral_wei: 0,
            minted_uba: minted,
            reserved_uba: 0,
            redeeming_uba: 0,
            dust_uba: 0,
            underlying_balance_uba: 0,
        }
    }

    fn prices() -> PriceSnapshot {
        PriceSnapshot::new().with_price("XRP", dec!(0.5), Utc::now())
    }

    fn census_ledger() -> MockLedgerClient {
        let mut ledger = MockLedgerClient::new();
        ledger.expect_settings().returning(|| Ok(vec![]));
        ledger.expect_collateral_types().returning(|| Ok(vec![]));
        ledger.expect_core_vault_holdings().returning(|| Ok(50));
        ledger
            .expect_all_agents()
            .returning(|| Ok(vec![Address::repeat_byte(1), Address::repeat_byte(2)]));
        ledger.expect_agent_info().returning(|vault| {
            let n = vault.as_slice()[0];
            Ok(info(n, 100 * n as u128))
        });
        ledger.expect_current_prices().returning(|| Ok(prices()));
        ledger.expect_trusted_prices().returning(|| Ok(prices()));
        ledger
    }

    fn reconciler(ledger: MockLedgerClient) -> Reconciler {
        let state = Arc::new(RwLock::new(TrackedState::new(&TrackerConfig::default())));
        Reconciler::new(state, Arc::new(ledger), Arc::new(EventBus::new()))
    }

    struct Counter(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn handle(&self, _notification: &Notification) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initialize_seeds_aggregate_once() {
        let mut reconciler = reconciler(census_ledger());
        reconciler.initialize().await.unwrap();

        {
            let state = reconciler.state();
            let state = state.read().await;
            assert_eq!(state.agents().len(), 2);
            // 100 + 200 minted plus 50 held by the core vault
            assert_eq!(state.backed_supply_uba(), 350);
            assert_eq!(state.computed_backed_supply_uba(), 350);
            assert!(state.trusted_prices().get("XRP").is_some());
        }

        let err = reconciler.initialize().await.unwrap_err();
        assert!(matches!(err, WatchError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_prices_published_refreshes_and_notifies() {
        let mut reconciler = reconciler(census_ledger());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        reconciler
            .bus()
            .subscribe(Topic::Synthetic(SyntheticEvent::PricesChanged), counter.clone())
            .await;

        let outcome = reconciler
            .apply(LedgerEvent::new(
                EventPosition::new(5, 0),
                EventKind::PricesPublished(args::PricesPublished { voting_round_id: 9 }),
            ))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::PricesPublished);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.stats().price_refreshes, 1);
    }

    #[tokio::test]
    async fn test_out_of_order_event_is_applied_and_counted() {
        let mut reconciler = reconciler(MockLedgerClient::new());
        let unrecognized = |block| LedgerEvent::new(EventPosition::new(block, 0), EventKind::Unrecognized("X".into()));

        reconciler.apply(unrecognized(10)).await.unwrap();
        let outcome = reconciler.apply(unrecognized(3)).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Ignored);
        let stats = reconciler.stats();
        assert_eq!(stats.ordering_anomalies, 1);
        assert_eq!(stats.ignored, 2);
        assert_eq!(stats.last_position, Some(EventPosition::new(10, 0)));
    }
}
