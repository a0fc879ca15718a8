//! Liquidation trigger
//!
//! Reacts to price changes (every live agent) and to mintings (the minting
//! agent). Each agent check is its own supervised thread, so one failing
//! call never holds up the others.

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::policy::{LiquidationAction, LiquidationPolicy};
use crate::bus::{EventBus, EventHandler, Notification, SubscriptionId, SyntheticEvent, Topic};
use crate::config::LiquidationConfig;
use crate::domain::EventName;
use crate::error::Result;
use crate::ledger::LedgerClient;
use crate::runner::{Scope, ScopedRunner, ThreadId};
use crate::tracker::TrackedState;

#[derive(Debug, Default)]
struct Counters {
    checks_spawned: AtomicU64,
    no_action: AtomicU64,
    start_calls: AtomicU64,
    end_calls: AtomicU64,
}

/// Trigger statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerStats {
    pub checks_spawned: u64,
    pub no_action: u64,
    /// `start_liquidation` calls issued, successful or not
    pub start_calls: u64,
    pub end_calls: u64,
}

pub struct LiquidationTrigger {
    state: Arc<RwLock<TrackedState>>,
    ledger: Arc<dyn LedgerClient>,
    runner: ScopedRunner,
    policy: Arc<dyn LiquidationPolicy>,
    expected_errors: Arc<Vec<String>>,
    counters: Arc<Counters>,
}

impl LiquidationTrigger {
    pub fn new(
        state: Arc<RwLock<TrackedState>>,
        ledger: Arc<dyn LedgerClient>,
        runner: ScopedRunner,
        policy: Arc<dyn LiquidationPolicy>,
        config: &LiquidationConfig,
    ) -> Self {
        Self {
            state,
            ledger,
            runner,
            policy,
            expected_errors: Arc::new(config.expected_errors.clone()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Subscribe to prices changes and to the minting events
    pub async fn register(self: &Arc<Self>, bus: &EventBus) -> Vec<SubscriptionId> {
        let topics = [
            Topic::Synthetic(SyntheticEvent::PricesChanged),
            Topic::Ledger(EventName::MintingExecuted),
            Topic::Ledger(EventName::SelfMint),
        ];

        let mut ids = Vec::with_capacity(topics.len());
        for topic in topics {
            let handler: Arc<dyn EventHandler> = self.clone();
            ids.push(bus.subscribe(topic, handler).await);
        }
        ids
    }

    /// Spawn a check for every live agent. Returns how many were spawned.
    pub async fn check_all(&self) -> usize {
        let vaults = self.state.read().await.agents().live_vaults();
        debug!("Checking {} agents for liquidation", vaults.len());
        for vault in &vaults {
            self.spawn_check(*vault);
        }
        vaults.len()
    }

    /// Check one agent on a background thread
    pub fn spawn_check(&self, vault: Address) -> ThreadId {
        self.counters.checks_spawned.fetch_add(1, Ordering::SeqCst);

        let state = self.state.clone();
        let ledger = self.ledger.clone();
        let policy = self.policy.clone();
        let expected = self.expected_errors.clone();
        let counters = self.counters.clone();

        self.runner
            .start_thread(format!("liquidation-check-{vault}"), move |scope| async move {
                check_agent(&scope, vault, &state, ledger.as_ref(), policy.as_ref(), &counters)
                    .await
                    .map_err(|e| scope.exit_on_expected_error(e, expected.as_slice()))
            })
    }

    pub fn stats(&self) -> TriggerStats {
        TriggerStats {
            checks_spawned: self.counters.checks_spawned.load(Ordering::SeqCst),
            no_action: self.counters.no_action.load(Ordering::SeqCst),
            start_calls: self.counters.start_calls.load(Ordering::SeqCst),
            end_calls: self.counters.end_calls.load(Ordering::SeqCst),
        }
    }
}

async fn check_agent(
    scope: &Scope,
    vault: Address,
    state: &RwLock<TrackedState>,
    ledger: &dyn LedgerClient,
    policy: &dyn LiquidationPolicy,
    counters: &Counters,
) -> Result<()> {
    // Decide on a fresh read; never hold the lock across the ledger call
    let action = {
        let state = state.read().await;
        match state.agent_or_reconstruct(vault) {
            Some(agent) => policy.decide(agent, &state),
            None => {
                debug!("Agent {} not tracked yet; skipping liquidation check", vault);
                return Ok(());
            }
        }
    };

    scope.ensure_active()?;

    match action {
        LiquidationAction::Start => {
            counters.start_calls.fetch_add(1, Ordering::SeqCst);
            info!("Starting liquidation of agent {}", vault);
            ledger.start_liquidation(vault).await?;
        }
        LiquidationAction::End => {
            counters.end_calls.fetch_add(1, Ordering::SeqCst);
            info!("Ending liquidation of agent {}", vault);
            ledger.end_liquidation(vault).await?;
        }
        LiquidationAction::None => {
            counters.no_action.fetch_add(1, Ordering::SeqCst);
        }
    }
    Ok(())
}

#[async_trait]
impl EventHandler for LiquidationTrigger {
    fn name(&self) -> &str {
        "liquidation-trigger"
    }

    async fn handle(&self, notification: &Notification) -> Result<()> {
        match notification {
            Notification::Synthetic(SyntheticEvent::PricesChanged) => {
                self.check_all().await;
            }
            Notification::Ledger(event) => {
                if let Some(vault) = event.agent_vault() {
                    self.spawn_check(vault);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::domain::{AgentRecord, AgentStatus};
    use crate::error::LedgerError;
    use crate::ledger::{AgentInfo, MockLedgerClient};
    use std::time::Duration;

    /// Flags every agent whose status is Normal
    struct AlwaysStart;

    impl LiquidationPolicy for AlwaysStart {
        fn decide(&self, agent: &AgentRecord, _state: &TrackedState) -> LiquidationAction {
            if agent.status == AgentStatus::Normal {
                LiquidationAction::Start
            } else {
                LiquidationAction::None
            }
        }
    }

    fn seeded_state(count: u8) -> Arc<RwLock<TrackedState>> {
        let mut state = TrackedState::new(&TrackerConfig::default());
        for n in 1..=count {
            state
                .seed_agent(AgentInfo {
                    vault: Address::repeat_byte(n),
                    owner: Address::repeat_byte(0xee),
                    underlying_address: format!("rAgent{n}"),
                    collateral_pool: Address::repeat_byte(n.wrapping_add(0x80)),
                    status: AgentStatus::Normal,
                    publicly_available: true,
                    vault_collateral_token: Address::repeat_byte(0xcc),
                    vault_collateral_wei: 0,
                    pool_collateral_wei: 0,
                    minted_uba: 10,
                    reserved_uba: 0,
                    redeeming_uba: 0,
                    dust_uba: 0,
                    underlying_balance_uba: 0,
                })
                .unwrap();
        }
        Arc::new(RwLock::new(state))
    }

    #[tokio::test]
    async fn test_prices_changed_checks_every_agent() {
        let mut ledger = MockLedgerClient::new();
        ledger.expect_start_liquidation().times(2).returning(|vault| {
            if vault == Address::repeat_byte(2) {
                Err(LedgerError::reverted("startLiquidation", "already in liquidation").into())
            } else {
                Ok(())
            }
        });

        let runner = ScopedRunner::new();
        let trigger = Arc::new(LiquidationTrigger::new(
            seeded_state(2),
            Arc::new(ledger),
            runner.clone(),
            Arc::new(AlwaysStart),
            &LiquidationConfig::default(),
        ));
        let bus = EventBus::new();
        assert_eq!(trigger.register(&bus).await.len(), 3);

        bus.publish(Notification::Synthetic(SyntheticEvent::PricesChanged)).await;
        assert!(runner.wait_idle(Duration::from_secs(2)).await);

        assert!(runner.errors().is_empty());
        let stats = trigger.stats();
        assert_eq!(stats.checks_spawned, 2);
        assert_eq!(stats.start_calls, 2);
    }

    #[tokio::test]
    async fn test_unexpected_revert_reaches_diagnostics() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_start_liquidation()
            .returning(|_| Err(LedgerError::Transport("connection reset".into()).into()));

        let runner = ScopedRunner::new();
        let trigger = LiquidationTrigger::new(
            seeded_state(1),
            Arc::new(ledger),
            runner.clone(),
            Arc::new(AlwaysStart),
            &LiquidationConfig::default(),
        );

        trigger.spawn_check(Address::repeat_byte(1));
        assert!(runner.wait_idle(Duration::from_secs(2)).await);

        let errors = runner.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_untracked_agent_issues_no_call() {
        let ledger = MockLedgerClient::new();
        let runner = ScopedRunner::new();
        let trigger = LiquidationTrigger::new(
            seeded_state(0),
            Arc::new(ledger),
            runner.clone(),
            Arc::new(AlwaysStart),
            &LiquidationConfig::default(),
        );

        trigger.spawn_check(Address::repeat_byte(7));
        assert!(runner.wait_idle(Duration::from_secs(2)).await);
        assert!(runner.errors().is_empty());
        assert_eq!(trigger.stats().start_calls, 0);
    }
}
