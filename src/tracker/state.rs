//! Tracked protocol state
//!
//! `TrackedState` is a plain synchronous model. The reconciler owns the only
//! write path; actors read it through short-lived read locks.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::core_vault::CoreVaultTotals;
use super::registry::AgentRegistry;
use crate::config::TrackerConfig;
use crate::domain::event::args;
use crate::domain::{
    AgentRecord, AgentStatus, Amount, CollateralCatalogue, CollateralClass, CollateralType, EventKind, LedgerEvent,
    PriceSnapshot, SettingValue, SettingsMirror,
};
use crate::error::{Result, WatchError};
use crate::ledger::{AgentInfo, LedgerClient};
use crate::runner::ScopedRunner;

/// What applying one event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Refers to an agent that is not tracked (yet)
    Skipped,
    /// Not an event the observer models
    Ignored,
    /// New prices are available on the ledger
    PricesPublished,
}

/// Fetches agents the tracker missed and hands them back through the
/// reconciler's inbox.
#[derive(Clone)]
pub struct Reconstructor {
    runner: ScopedRunner,
    ledger: Arc<dyn LedgerClient>,
    inbox: mpsc::UnboundedSender<AgentInfo>,
    pending: Arc<DashSet<Address>>,
}

impl Reconstructor {
    pub fn new(
        runner: ScopedRunner,
        ledger: Arc<dyn LedgerClient>,
        inbox: mpsc::UnboundedSender<AgentInfo>,
    ) -> Self {
        Self {
            runner,
            ledger,
            inbox,
            pending: Arc::new(DashSet::new()),
        }
    }

    /// Start one fetch per vault; repeated misses while it runs are no-ops
    pub fn schedule(&self, vault: Address) {
        if !self.pending.insert(vault) {
            return;
        }

        let ledger = self.ledger.clone();
        let inbox = self.inbox.clone();
        let pending = self.pending.clone();

        self.runner
            .start_thread(format!("reconstruct-{vault}"), move |_scope| async move {
                let info = match ledger.agent_info(vault).await {
                    Ok(info) => info,
                    Err(e) => {
                        pending.remove(&vault);
                        return Err(e);
                    }
                };
                debug!("Fetched agent {} for reconstruction", vault);
                inbox.send(info).map_err(|_| {
                    pending.remove(&vault);
                    WatchError::Internal("reconstruction inbox closed".to_string())
                })
            });
    }

    pub fn is_pending(&self, vault: &Address) -> bool {
        self.pending.contains(vault)
    }

    fn settle(&self, vault: &Address) {
        self.pending.remove(vault);
    }
}

pub struct TrackedState {
    agents: AgentRegistry,
    backed_supply_uba: Amount,
    core_vault: CoreVaultTotals,
    current_prices: PriceSnapshot,
    trusted_prices: PriceSnapshot,
    collaterals: CollateralCatalogue,
    settings: SettingsMirror,
    hard_delete_on_destroy: bool,
    reconstructor: Option<Reconstructor>,
}

impl TrackedState {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            agents: AgentRegistry::new(),
            backed_supply_uba: 0,
            core_vault: CoreVaultTotals::default(),
            current_prices: PriceSnapshot::new(),
            trusted_prices: PriceSnapshot::new(),
            collaterals: CollateralCatalogue::new(),
            settings: SettingsMirror::new(),
            hard_delete_on_destroy: config.hard_delete_on_destroy,
            reconstructor: None,
        }
    }

    pub fn with_reconstructor(mut self, reconstructor: Reconstructor) -> Self {
        self.reconstructor = Some(reconstructor);
        self
    }

    // ==================== Queries ====================

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn agent(&self, vault: &Address) -> Option<&AgentRecord> {
        self.agents.get(vault)
    }

    /// Look up an agent; on a miss schedule reconstruction and return `None`
    /// right away.
    pub fn agent_or_reconstruct(&self, vault: Address) -> Option<&AgentRecord> {
        let found = self.agents.get(&vault);
        if found.is_none() && !self.agents.is_tombstoned(&vault) {
            self.schedule_reconstruction(vault);
        }
        found
    }

    pub fn backed_supply_uba(&self) -> Amount {
        self.backed_supply_uba
    }

    /// Backed supply recomputed from scratch; equals
    /// [`backed_supply_uba`](Self::backed_supply_uba) whenever the model is
    /// consistent.
    pub fn computed_backed_supply_uba(&self) -> Amount {
        self.agents
            .iter_live()
            .fold(self.core_vault.backed_contribution(), |sum, a| sum.saturating_add(a.minted_uba))
    }

    pub fn core_vault(&self) -> &CoreVaultTotals {
        &self.core_vault
    }

    pub fn current_prices(&self) -> &PriceSnapshot {
        &self.current_prices
    }

    pub fn trusted_prices(&self) -> &PriceSnapshot {
        &self.trusted_prices
    }

    pub fn collaterals(&self) -> &CollateralCatalogue {
        &self.collaterals
    }

    pub fn settings(&self) -> &SettingsMirror {
        &self.settings
    }

    // ==================== Seeding ====================

    /// Settings read at startup. Names outside the schema are skipped here;
    /// only live `SettingChanged` events treat them as fatal.
    pub fn load_settings(&mut self, settings: Vec<(String, SettingValue)>) {
        for (name, value) in settings {
            if let Err(e) = self.settings.set_raw(&name, value) {
                warn!("Skipping startup setting: {}", e);
            }
        }
    }

    pub fn load_collaterals(&mut self, collaterals: Vec<CollateralType>) {
        for collateral in collaterals {
            self.collaterals.add(collateral);
        }
    }

    pub fn seed_core_vault(&mut self, holdings: Amount) {
        self.core_vault.seed_holdings(holdings);
        self.add_backed(holdings);
    }

    /// Insert an agent from the startup census
    pub fn seed_agent(&mut self, info: AgentInfo) -> Result<()> {
        let minted = info.minted_uba;
        self.agents.create(info.into_record())?;
        self.add_backed(minted);
        Ok(())
    }

    pub fn set_prices(&mut self, current: PriceSnapshot, trusted: PriceSnapshot) {
        self.current_prices = current;
        self.trusted_prices = trusted;
    }

    /// Install an agent fetched after a lookup miss. Returns false if it was
    /// already tracked or has been destroyed in the meantime.
    pub fn install_reconstructed(&mut self, info: AgentInfo) -> bool {
        let vault = info.vault;
        if let Some(reconstructor) = &self.reconstructor {
            reconstructor.settle(&vault);
        }

        if self.agents.is_tombstoned(&vault) {
            debug!("Dropping reconstruction of destroyed agent {}", vault);
            return false;
        }
        if self.agents.contains(&vault) {
            debug!("Agent {} already tracked; reconstruction dropped", vault);
            return false;
        }

        let minted = info.minted_uba;
        match self.agents.create(info.into_record()) {
            Ok(_) => {
                self.add_backed(minted);
                info!("Reconstructed agent {} (minted {})", vault, minted);
                true
            }
            Err(e) => {
                warn!("Cannot install reconstructed agent {}: {}", vault, e);
                false
            }
        }
    }

    // ==================== Event application ====================

    /// Apply one event's effects. Synchronous; no I/O.
    pub fn apply_event(&mut self, event: &LedgerEvent) -> Result<ApplyOutcome> {
        let name = event.kind.name_str();

        match &event.kind {
            // Agent lifecycle
            EventKind::AgentVaultCreated(a) => self.create_agent(a),
            EventKind::AgentDestroyed(a) => Ok(self.destroy_agent(a.agent_vault)),
            EventKind::AgentDestroyAnnounced(a) => Ok(self.set_status(a.agent_vault, AgentStatus::Destroying, name)),
            EventKind::AgentInCCB(a) => Ok(self.set_status(a.agent_vault, AgentStatus::Ccb, name)),
            EventKind::LiquidationStarted(a) => Ok(self.set_status(a.agent_vault, AgentStatus::Liquidation, name)),
            EventKind::FullLiquidationStarted(a) => {
                Ok(self.set_status(a.agent_vault, AgentStatus::FullLiquidation, name))
            }
            EventKind::LiquidationEnded(a) => Ok(self.set_status(a.agent_vault, AgentStatus::Normal, name)),
            EventKind::AgentAvailable(a) => Ok(self.with_agent(a.agent_vault, name, |agent| {
                agent.publicly_available = true;
            })),
            EventKind::AvailableAgentExited(a) => Ok(self.with_agent(a.agent_vault, name, |agent| {
                agent.publicly_available = false;
            })),

            // Collateral movement
            EventKind::VaultCollateralDeposited(a) => Ok(self.with_agent(a.agent_vault, name, |agent| {
                if agent.vault_collateral_token == a.token {
                    agent.vault_collateral_wei = agent.vault_collateral_wei.saturating_add(a.amount_wei);
                }
            })),
            EventKind::VaultCollateralWithdrawn(a) => Ok(self.with_agent(a.agent_vault, name, |agent| {
                if agent.vault_collateral_token == a.token {
                    agent.vault_collateral_wei = agent.vault_collateral_wei.saturating_sub(a.amount_wei);
                }
            })),
            EventKind::CollateralPoolEntered(a) => Ok(self.with_pool(a.collateral_pool, name, |agent| {
                agent.pool_collateral_wei = agent.pool_collateral_wei.saturating_add(a.amount_nat_wei);
            })),
            EventKind::CollateralPoolExited(a) => Ok(self.with_pool(a.collateral_pool, name, |agent| {
                agent.pool_collateral_wei = agent.pool_collateral_wei.saturating_sub(a.amount_nat_wei);
            })),
            EventKind::UnderlyingBalanceChanged(a) => Ok(self.with_agent(a.agent_vault, name, |agent| {
                agent.underlying_balance_uba = a.underlying_balance_uba;
            })),
            EventKind::DustChanged(a) => Ok(self.with_agent(a.agent_vault, name, |agent| {
                agent.dust_uba = a.dust_uba;
            })),

            // Minting
            EventKind::CollateralReserved(a) => Ok(self.with_agent(a.agent_vault, name, |agent| {
                agent.reserved_uba = agent.reserved_uba.saturating_add(a.value_uba);
            })),
            EventKind::CollateralReservationDeleted(a) => Ok(self.with_agent(a.agent_vault, name, |agent| {
                agent.reserved_uba = agent.reserved_uba.saturating_sub(a.reserved_amount_uba);
            })),
            EventKind::MintingExecuted(a) => {
                let minted = a.minted_amount_uba.saturating_add(a.pool_fee_uba);
                Ok(self.mint(a.agent_vault, minted, name, |agent| {
                    agent.reserved_uba = agent.reserved_uba.saturating_sub(a.minted_amount_uba);
                }))
            }
            EventKind::SelfMint(a) => {
                let minted = a.minted_amount_uba.saturating_add(a.pool_fee_uba);
                Ok(self.mint(a.agent_vault, minted, name, |_| {}))
            }

            // Redemption and liquidation
            EventKind::RedemptionRequested(a) => Ok(self.burn(a.agent_vault, a.value_uba, name, |agent| {
                agent.redeeming_uba = agent.redeeming_uba.saturating_add(a.value_uba);
                agent.redemptions += 1;
            })),
            EventKind::RedemptionPerformed(a) => Ok(self.close_redemption(a.agent_vault, a.redemption_amount_uba, name)),
            EventKind::RedemptionPaymentBlocked(a) => {
                Ok(self.close_redemption(a.agent_vault, a.redemption_amount_uba, name))
            }
            EventKind::RedemptionPaymentFailed(a) => {
                Ok(self.close_redemption(a.agent_vault, a.redemption_amount_uba, name))
            }
            EventKind::RedemptionDefault(a) => Ok(self.redemption_default(a, name)),
            EventKind::RedeemedInCollateral(a) => {
                Ok(self.burn(a.agent_vault, a.redemption_amount_uba, name, |agent| {
                    agent.vault_collateral_wei = agent.vault_collateral_wei.saturating_sub(a.paid_vault_collateral_wei);
                }))
            }
            EventKind::SelfClose(a) => Ok(self.burn(a.agent_vault, a.value_uba, name, |_| {})),
            EventKind::LiquidationPerformed(a) => Ok(self.burn(a.agent_vault, a.value_uba, name, |agent| {
                agent.vault_collateral_wei = agent.vault_collateral_wei.saturating_sub(a.paid_vault_collateral_wei);
                agent.pool_collateral_wei = agent.pool_collateral_wei.saturating_sub(a.paid_pool_collateral_wei);
                agent.liquidations += 1;
            })),

            // Settings
            EventKind::SettingChanged(a) => self.change_setting(&a.name, SettingValue::Uint(a.value)),
            EventKind::SettingArrayChanged(a) => {
                self.change_setting(&a.name, SettingValue::UintArray(a.value.clone()))
            }
            EventKind::ContractChanged(a) => self.change_setting(&a.name, SettingValue::Address(a.value)),

            // Collateral catalogue
            EventKind::CollateralTypeAdded(a) => self.add_collateral_type(a, name),
            EventKind::CollateralRatiosChanged(a) => self.change_collateral_ratios(a, name),
            EventKind::CollateralTypeDeprecated(a) => self.deprecate_collateral_type(a, name),

            // Core vault
            EventKind::TransferToCoreVaultStarted(a) => Ok(self.transfer_to_core_vault_started(a, name)),
            EventKind::TransferToCoreVaultSuccessful(a) => {
                self.core_vault_step(|cv| {
                    cv.transfer_succeeded(a.value_uba);
                });
                Ok(ApplyOutcome::Applied)
            }
            EventKind::TransferToCoreVaultDefaulted(a) => {
                self.core_vault_step(|cv| {
                    cv.transfer_defaulted(a.reminted_uba);
                });
                Ok(self.mint(a.agent_vault, a.reminted_uba, name, |_| {}))
            }
            EventKind::ReturnFromCoreVaultRequested(a) => {
                debug!("Return from core vault requested by {}: {}", a.agent_vault, a.value_uba);
                Ok(ApplyOutcome::Applied)
            }
            EventKind::ReturnFromCoreVaultConfirmed(a) => {
                self.core_vault_step(|cv| {
                    cv.return_confirmed(a.reminted_uba);
                });
                Ok(self.mint(a.agent_vault, a.reminted_uba, name, |_| {}))
            }
            EventKind::ReturnFromCoreVaultCancelled(a) => {
                debug!("Return from core vault cancelled for {} (request {})", a.agent_vault, a.request_id);
                Ok(ApplyOutcome::Applied)
            }
            EventKind::CoreVaultRedemptionRequested(a) => {
                self.core_vault_step(|cv| {
                    cv.redemption_requested(a.value_uba);
                });
                Ok(ApplyOutcome::Applied)
            }

            EventKind::PricesPublished(a) => {
                debug!("Prices published for voting round {}", a.voting_round_id);
                Ok(ApplyOutcome::PricesPublished)
            }
            EventKind::Unrecognized(raw) => {
                debug!("Ignoring unrecognized event {} at {}", raw, event.position);
                Ok(ApplyOutcome::Ignored)
            }
        }
    }

    // ==================== Handlers ====================

    fn create_agent(&mut self, a: &args::AgentVaultCreated) -> Result<ApplyOutcome> {
        let record = AgentRecord::new(
            a.agent_vault,
            a.owner,
            a.underlying_address.clone(),
            a.collateral_pool,
            a.vault_collateral_token,
        );
        self.agents.create(record)?;
        info!(
            "Agent {} created (pool {}, underlying {})",
            a.agent_vault, a.collateral_pool, a.underlying_address
        );
        Ok(ApplyOutcome::Applied)
    }

    fn destroy_agent(&mut self, vault: Address) -> ApplyOutcome {
        if self.agents.get(&vault).is_some_and(AgentRecord::is_destroyed) {
            debug!("AgentDestroyed for already destroyed agent {}", vault);
            return ApplyOutcome::Skipped;
        }
        let Some(record) = self.agents.destroy(&vault, self.hard_delete_on_destroy) else {
            warn!("AgentDestroyed for untracked agent {}", vault);
            return ApplyOutcome::Skipped;
        };

        if record.minted_uba > 0 {
            warn!(
                "Agent {} destroyed with {} UBA still minted; removing it from the backed supply",
                vault, record.minted_uba
            );
            self.sub_backed(record.minted_uba);
        }
        info!("Agent {} destroyed", vault);
        ApplyOutcome::Applied
    }

    fn set_status(&mut self, vault: Address, target: AgentStatus, event: &str) -> ApplyOutcome {
        self.with_agent(vault, event, |agent| {
            if !agent.status.can_transition_to(target) {
                warn!(
                    "Unexpected status transition {} -> {} for agent {}",
                    agent.status, target, agent.vault
                );
            }
            if agent.status != target {
                info!("Agent {} status {} -> {}", agent.vault, agent.status, target);
            }
            agent.status = target;
        })
    }

    fn mint(
        &mut self,
        vault: Address,
        minted: Amount,
        event: &str,
        extra: impl FnOnce(&mut AgentRecord),
    ) -> ApplyOutcome {
        let outcome = self.with_agent(vault, event, |agent| {
            agent.minted_uba = agent.minted_uba.saturating_add(minted);
            agent.mintings += 1;
            extra(agent);
        });
        if outcome == ApplyOutcome::Applied {
            self.add_backed(minted);
        }
        outcome
    }

    /// Reduce the agent's minted amount and the backed supply by the same
    /// (possibly capped) value
    fn burn(
        &mut self,
        vault: Address,
        value: Amount,
        event: &str,
        extra: impl FnOnce(&mut AgentRecord),
    ) -> ApplyOutcome {
        let mut burned = 0;
        let outcome = self.with_agent(vault, event, |agent| {
            if value > agent.minted_uba {
                warn!(
                    "{} of {} exceeds minted {} for agent {}",
                    event, value, agent.minted_uba, agent.vault
                );
            }
            burned = value.min(agent.minted_uba);
            agent.minted_uba -= burned;
            extra(agent);
        });
        self.sub_backed(burned);
        outcome
    }

    fn close_redemption(&mut self, vault: Address, amount: Amount, event: &str) -> ApplyOutcome {
        self.with_agent(vault, event, |agent| {
            agent.redeeming_uba = agent.redeeming_uba.saturating_sub(amount);
        })
    }

    fn redemption_default(&mut self, a: &args::RedemptionDefault, event: &str) -> ApplyOutcome {
        self.with_agent(a.agent_vault, event, |agent| {
            agent.redeeming_uba = agent.redeeming_uba.saturating_sub(a.redemption_amount_uba);
            agent.vault_collateral_wei = agent.vault_collateral_wei.saturating_sub(a.redeemed_vault_collateral_wei);
            agent.pool_collateral_wei = agent.pool_collateral_wei.saturating_sub(a.redeemed_pool_collateral_wei);
        })
    }

    fn change_setting(&mut self, name: &str, value: SettingValue) -> Result<ApplyOutcome> {
        let setting = self.settings.set_raw(name, value)?;
        debug!("Setting {} updated", setting);
        Ok(ApplyOutcome::Applied)
    }

    fn add_collateral_type(&mut self, a: &args::CollateralTypeAdded, event: &str) -> Result<ApplyOutcome> {
        let class = collateral_class(a.collateral_class, event)?;
        let replaced = self.collaterals.add(CollateralType {
            class,
            token: a.token,
            decimals: a.decimals,
            direct_price_pair: a.direct_price_pair,
            asset_ftso_symbol: a.asset_ftso_symbol.clone(),
            token_ftso_symbol: a.token_ftso_symbol.clone(),
            min_collateral_ratio_bips: a.min_collateral_ratio_bips,
            ccb_min_collateral_ratio_bips: a.ccb_min_collateral_ratio_bips,
            safety_min_collateral_ratio_bips: a.safety_min_collateral_ratio_bips,
            valid_until: None,
        });
        if replaced {
            warn!("Collateral type {:?}/{} added twice; replaced", class, a.token);
        }
        info!("Collateral type {:?}/{} ({}) added", class, a.token, a.token_ftso_symbol);
        Ok(ApplyOutcome::Applied)
    }

    fn change_collateral_ratios(&mut self, a: &args::CollateralRatiosChanged, event: &str) -> Result<ApplyOutcome> {
        let class = collateral_class(a.collateral_class, event)?;
        let collateral = self
            .collaterals
            .get_mut(class, a.collateral_token)
            .ok_or_else(|| unknown_collateral(event, class, a.collateral_token))?;

        collateral.min_collateral_ratio_bips = a.min_collateral_ratio_bips;
        collateral.ccb_min_collateral_ratio_bips = a.ccb_min_collateral_ratio_bips;
        collateral.safety_min_collateral_ratio_bips = a.safety_min_collateral_ratio_bips;
        debug!("Collateral ratios changed for {:?}/{}", class, a.collateral_token);
        Ok(ApplyOutcome::Applied)
    }

    fn deprecate_collateral_type(&mut self, a: &args::CollateralTypeDeprecated, event: &str) -> Result<ApplyOutcome> {
        let class = collateral_class(a.collateral_class, event)?;
        let valid_until = DateTime::<Utc>::from_timestamp(a.valid_until, 0).ok_or_else(|| WatchError::InvalidEvent {
            event: event.to_string(),
            reason: format!("validUntil out of range: {}", a.valid_until),
        })?;
        let collateral = self
            .collaterals
            .get_mut(class, a.collateral_token)
            .ok_or_else(|| unknown_collateral(event, class, a.collateral_token))?;

        collateral.valid_until = Some(valid_until);
        info!("Collateral type {:?}/{} deprecated until {}", class, a.collateral_token, valid_until);
        Ok(ApplyOutcome::Applied)
    }

    fn transfer_to_core_vault_started(&mut self, a: &args::TransferToCoreVaultStarted, event: &str) -> ApplyOutcome {
        // The core vault side is applied even if the agent is unknown; the
        // reconstructed agent arrives with its post-transfer minted amount.
        self.core_vault_step(|cv| cv.start_transfer(a.value_uba));
        self.burn(a.agent_vault, a.value_uba, event, |_| {})
    }

    // ==================== Helpers ====================

    /// Run `f` on a tracked, not destroyed agent
    fn with_agent(&mut self, vault: Address, event: &str, f: impl FnOnce(&mut AgentRecord)) -> ApplyOutcome {
        match self.agents.get(&vault) {
            None => {
                if self.agents.is_tombstoned(&vault) {
                    debug!("{} for destroyed agent {} ignored", event, vault);
                } else {
                    warn!("{} for untracked agent {}; scheduling reconstruction", event, vault);
                    self.schedule_reconstruction(vault);
                }
                return ApplyOutcome::Skipped;
            }
            Some(agent) if agent.is_destroyed() => {
                debug!("{} for destroyed agent {} ignored", event, vault);
                return ApplyOutcome::Skipped;
            }
            Some(_) => {}
        }

        match self.agents.get_mut(&vault) {
            Some(agent) => {
                f(agent);
                ApplyOutcome::Applied
            }
            None => ApplyOutcome::Skipped,
        }
    }

    /// Pool events carry the pool address only; misses cannot be reconstructed
    fn with_pool(&mut self, pool: Address, event: &str, f: impl FnOnce(&mut AgentRecord)) -> ApplyOutcome {
        match self.agents.get_by_pool_mut(&pool) {
            Some(agent) if !agent.is_destroyed() => {
                f(agent);
                ApplyOutcome::Applied
            }
            _ => {
                debug!("{} for untracked pool {} ignored", event, pool);
                ApplyOutcome::Skipped
            }
        }
    }

    /// Apply a core vault update and move the backed supply by the change
    /// in the core vault's contribution
    fn core_vault_step(&mut self, f: impl FnOnce(&mut CoreVaultTotals)) {
        let before = self.core_vault.backed_contribution();
        f(&mut self.core_vault);
        let after = self.core_vault.backed_contribution();
        if after >= before {
            self.add_backed(after - before);
        } else {
            self.sub_backed(before - after);
        }
    }

    fn schedule_reconstruction(&self, vault: Address) {
        match &self.reconstructor {
            Some(reconstructor) => reconstructor.schedule(vault),
            None => debug!("No reconstructor configured; agent {} stays untracked", vault),
        }
    }

    fn add_backed(&mut self, value: Amount) {
        self.backed_supply_uba = self.backed_supply_uba.saturating_add(value);
    }

    fn sub_backed(&mut self, value: Amount) {
        match self.backed_supply_uba.checked_sub(value) {
            Some(rest) => self.backed_supply_uba = rest,
            None => {
                warn!(
                    "Backed supply {} would go negative by {}; clamping to zero",
                    self.backed_supply_uba, value
                );
                self.backed_supply_uba = 0;
            }
        }
    }
}

fn collateral_class(code: u8, event: &str) -> Result<CollateralClass> {
    CollateralClass::from_code(code).ok_or_else(|| WatchError::InvalidEvent {
        event: event.to_string(),
        reason: format!("unknown collateral class {code}"),
    })
}

fn unknown_collateral(event: &str, class: CollateralClass, token: Address) -> WatchError {
    WatchError::InvalidEvent {
        event: event.to_string(),
        reason: format!("unknown collateral type {:?}/{}", class, token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventPosition;

    fn vault(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn at(block: u64, kind: EventKind) -> LedgerEvent {
        LedgerEvent::new(EventPosition::new(block, 0), kind)
    }

    fn created(n: u8) -> LedgerEvent {
        at(
            1,
            EventKind::AgentVaultCreated(args::AgentVaultCreated {
                owner: Address::repeat_byte(0xee),
                agent_vault: vault(n),
                collateral_pool: Address::repeat_byte(n.wrapping_add(0x80)),
                underlying_address: format!("rAgent{n}"),
                vault_collateral_token: Address::repeat_byte(0xcc),
            }),
        )
    }

    fn minted(n: u8, amount: Amount) -> LedgerEvent {
        at(
            2,
            EventKind::MintingExecuted(args::MintingExecuted {
                agent_vault: vault(n),
                collateral_reservation_id: 1,
                minted_amount_uba: amount,
                agent_fee_uba: 0,
                pool_fee_uba: 0,
            }),
        )
    }

    fn state() -> TrackedState {
        TrackedState::new(&TrackerConfig::default())
    }

    #[test]
    fn test_mint_and_redeem_track_aggregate() {
        let mut state = state();
        state.apply_event(&created(1)).unwrap();
        state.apply_event(&minted(1, 1000)).unwrap();
        state
            .apply_event(&at(
                3,
                EventKind::RedemptionRequested(args::RedemptionRequested {
                    agent_vault: vault(1),
                    redeemer: Address::repeat_byte(0x55),
                    request_id: 7,
                    payment_address: "rRedeemer".into(),
                    value_uba: 400,
                    fee_uba: 4,
                }),
            ))
            .unwrap();

        let agent = state.agent(&vault(1)).unwrap();
        assert_eq!(agent.minted_uba, 600);
        assert_eq!(agent.redeeming_uba, 400);
        assert_eq!(state.backed_supply_uba(), 600);
        assert_eq!(state.computed_backed_supply_uba(), 600);
    }

    #[test]
    fn test_unknown_agent_event_is_skipped() {
        let mut state = state();
        let outcome = state.apply_event(&minted(9, 50)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped);
        assert_eq!(state.backed_supply_uba(), 0);
        assert!(state.agent_or_reconstruct(vault(9)).is_none());
    }

    #[test]
    fn test_unknown_setting_is_fatal() {
        let mut state = state();
        let err = state
            .apply_event(&at(
                1,
                EventKind::SettingChanged(args::SettingChanged {
                    name: "noSuchSetting".into(),
                    value: 1,
                }),
            ))
            .unwrap_err();
        assert!(err.is_fatal());

        let outcome = state
            .apply_event(&at(
                2,
                EventKind::SettingChanged(args::SettingChanged {
                    name: "lotSizeAMG".into(),
                    value: 20,
                }),
            ))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(state.settings().uint(crate::domain::SettingName::LotSizeAmg), Some(20));
    }

    #[test]
    fn test_collateral_catalogue_events() {
        let mut state = state();
        let token = Address::repeat_byte(0x10);
        state
            .apply_event(&at(
                1,
                EventKind::CollateralTypeAdded(args::CollateralTypeAdded {
                    collateral_class: 2,
                    token,
                    decimals: 6,
                    direct_price_pair: false,
                    asset_ftso_symbol: "XRP".into(),
                    token_ftso_symbol: "USDC".into(),
                    min_collateral_ratio_bips: 14_000,
                    ccb_min_collateral_ratio_bips: 13_000,
                    safety_min_collateral_ratio_bips: 15_000,
                }),
            ))
            .unwrap();
        state
            .apply_event(&at(
                2,
                EventKind::CollateralRatiosChanged(args::CollateralRatiosChanged {
                    collateral_class: 2,
                    collateral_token: token,
                    min_collateral_ratio_bips: 14_500,
                    ccb_min_collateral_ratio_bips: 13_500,
                    safety_min_collateral_ratio_bips: 16_000,
                }),
            ))
            .unwrap();
        state
            .apply_event(&at(
                3,
                EventKind::CollateralTypeDeprecated(args::CollateralTypeDeprecated {
                    collateral_class: 2,
                    collateral_token: token,
                    valid_until: 1_700_000_000,
                }),
            ))
            .unwrap();

        let collateral = state.collaterals().get(CollateralClass::Vault, token).unwrap();
        assert_eq!(collateral.min_collateral_ratio_bips, 14_500);
        assert_eq!(collateral.valid_until.unwrap().timestamp(), 1_700_000_000);

        let err = state
            .apply_event(&at(
                4,
                EventKind::CollateralRatiosChanged(args::CollateralRatiosChanged {
                    collateral_class: 1,
                    collateral_token: token,
                    min_collateral_ratio_bips: 1,
                    ccb_min_collateral_ratio_bips: 1,
                    safety_min_collateral_ratio_bips: 1,
                }),
            ))
            .unwrap_err();
        assert!(matches!(err, WatchError::InvalidEvent { .. }));
    }

    #[test]
    fn test_core_vault_transfers_are_zero_sum() {
        let mut state = state();
        state.apply_event(&created(1)).unwrap();
        state.apply_event(&minted(1, 500)).unwrap();

        state
            .apply_event(&at(
                3,
                EventKind::TransferToCoreVaultStarted(args::TransferToCoreVaultStarted {
                    agent_vault: vault(1),
                    transfer_redemption_request_id: 1,
                    value_uba: 200,
                }),
            ))
            .unwrap();
        assert_eq!(state.backed_supply_uba(), 500);
        assert_eq!(state.core_vault().in_transit(), 200);

        state
            .apply_event(&at(
                4,
                EventKind::TransferToCoreVaultSuccessful(args::TransferToCoreVaultSuccessful {
                    agent_vault: vault(1),
                    transfer_redemption_request_id: 1,
                    value_uba: 200,
                }),
            ))
            .unwrap();
        assert_eq!(state.core_vault().holdings(), 200);
        assert_eq!(state.backed_supply_uba(), 500);

        state
            .apply_event(&at(
                5,
                EventKind::CoreVaultRedemptionRequested(args::CoreVaultRedemptionRequested {
                    redeemer: Address::repeat_byte(0x55),
                    payment_address: "rRedeemer".into(),
                    value_uba: 50,
                    fee_uba: 0,
                }),
            ))
            .unwrap();
        assert_eq!(state.backed_supply_uba(), 450);
        assert_eq!(state.computed_backed_supply_uba(), 450);
    }

    #[test]
    fn test_destroy_with_retained_record() {
        let mut state = TrackedState::new(&TrackerConfig {
            hard_delete_on_destroy: false,
        });
        state.apply_event(&created(1)).unwrap();
        state.apply_event(&minted(1, 10)).unwrap();
        state
            .apply_event(&at(
                3,
                EventKind::AgentDestroyed(args::AgentDestroyed { agent_vault: vault(1) }),
            ))
            .unwrap();

        assert_eq!(state.agent(&vault(1)).unwrap().status, AgentStatus::Destroyed);
        assert_eq!(state.agents().iter_live().count(), 0);
        assert_eq!(state.backed_supply_uba(), 0);
        assert_eq!(state.computed_backed_supply_uba(), 0);

        // Later events for the retired agent change nothing
        assert_eq!(state.apply_event(&minted(1, 5)).unwrap(), ApplyOutcome::Skipped);
    }

    #[test]
    fn test_install_reconstructed_respects_tombstones() {
        let mut state = state();
        state.apply_event(&created(1)).unwrap();
        state
            .apply_event(&at(
                2,
                EventKind::AgentDestroyed(args::AgentDestroyed { agent_vault: vault(1) }),
            ))
            .unwrap();

        let info = AgentInfo {
            vault: vault(1),
            owner: Address::repeat_byte(0xee),
            underlying_address: "rAgent1".into(),
            collateral_pool: Address::repeat_byte(0x81),
            status: AgentStatus::Normal,
            publicly_available: true,
            vault_collateral_token: Address::repeat_byte(0xcc),
            vault_collateral_wei: 0,
            pool_collateral_wei: 0,
            minted_uba: 70,
            reserved_uba: 0,
            redeeming_uba: 0,
            dust_uba: 0,
            underlying_balance_uba: 0,
        };
        assert!(!state.install_reconstructed(info.clone()));
        assert!(state.agent(&vault(1)).is_none());

        let mut other = info;
        other.vault = vault(2);
        other.underlying_address = "rAgent2".into();
        other.collateral_pool = Address::repeat_byte(0x82);
        assert!(state.install_reconstructed(other));
        assert_eq!(state.backed_supply_uba(), 70);
    }

    #[test]
    fn test_status_events() {
        let mut state = state();
        state.apply_event(&created(1)).unwrap();
        state
            .apply_event(&at(
                2,
                EventKind::LiquidationStarted(args::LiquidationStarted {
                    agent_vault: vault(1),
                    timestamp: 0,
                }),
            ))
            .unwrap();
        assert_eq!(state.agent(&vault(1)).unwrap().status, AgentStatus::Liquidation);

        state
            .apply_event(&at(
                3,
                EventKind::LiquidationEnded(args::LiquidationEnded { agent_vault: vault(1) }),
            ))
            .unwrap();
        assert_eq!(state.agent(&vault(1)).unwrap().status, AgentStatus::Normal);
    }
}
