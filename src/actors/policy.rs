//! Liquidation policies
//!
//! A policy only decides; the trigger does the calling. The shipped
//! [`CollateralRatioPolicy`] compares collateral ratios with the catalogue's
//! thresholds and is a default, not protocol truth.

use chrono::Utc;
use rust_decimal::Decimal;
use std::fmt;

use crate::domain::{AgentRecord, AgentStatus, Amount, CollateralClass, CollateralType, PriceSnapshot, SettingName};
use crate::tracker::TrackedState;

const BIPS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationAction {
    None,
    Start,
    End,
}

impl fmt::Display for LiquidationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiquidationAction::None => write!(f, "none"),
            LiquidationAction::Start => write!(f, "start"),
            LiquidationAction::End => write!(f, "end"),
        }
    }
}

/// Decides whether an agent should enter or leave liquidation
pub trait LiquidationPolicy: Send + Sync {
    fn decide(&self, agent: &AgentRecord, state: &TrackedState) -> LiquidationAction;
}

/// Collateral ratios of one agent, in BIPS. `None` means nothing is owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollateralRatios {
    pub vault_bips: Option<Decimal>,
    pub pool_bips: Option<Decimal>,
}

/// Ratio-versus-threshold policy
///
/// Starts liquidation when either ratio is below its type's minimum and ends
/// it once both are back at or above the safety minimum. Does nothing when a
/// price, catalogue entry or the asset decimals are missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollateralRatioPolicy;

impl CollateralRatioPolicy {
    pub fn ratios<'a>(
        &self,
        agent: &AgentRecord,
        state: &'a TrackedState,
    ) -> Option<(CollateralRatios, &'a CollateralType, &'a CollateralType)> {
        let catalogue = state.collaterals();
        let vault_type = catalogue.get(CollateralClass::Vault, agent.vault_collateral_token)?;
        let pool_type = catalogue.active_pool_collateral(Utc::now())?;
        let asset_decimals = u32::try_from(state.settings().uint(SettingName::AssetDecimals)?).ok()?;
        let obligation = to_units(agent.backing_obligation_uba(), asset_decimals)?;
        let prices = state.trusted_prices();

        let ratios = CollateralRatios {
            vault_bips: ratio_bips(agent.vault_collateral_wei, vault_type, prices, obligation)?,
            pool_bips: ratio_bips(agent.pool_collateral_wei, pool_type, prices, obligation)?,
        };
        Some((ratios, vault_type, pool_type))
    }
}

impl LiquidationPolicy for CollateralRatioPolicy {
    fn decide(&self, agent: &AgentRecord, state: &TrackedState) -> LiquidationAction {
        if !agent.status.is_actionable() {
            return LiquidationAction::None;
        }
        let Some((ratios, vault_type, pool_type)) = self.ratios(agent, state) else {
            return LiquidationAction::None;
        };

        let below = |ratio: Option<Decimal>, threshold: u32| ratio.map_or(false, |r| r < Decimal::from(threshold));
        let at_or_above = |ratio: Option<Decimal>, threshold: u32| ratio.map_or(true, |r| r >= Decimal::from(threshold));

        let unhealthy = below(ratios.vault_bips, vault_type.min_collateral_ratio_bips)
            || below(ratios.pool_bips, pool_type.min_collateral_ratio_bips);
        let safe = at_or_above(ratios.vault_bips, vault_type.safety_min_collateral_ratio_bips)
            && at_or_above(ratios.pool_bips, pool_type.safety_min_collateral_ratio_bips);

        match agent.status {
            AgentStatus::Normal | AgentStatus::Ccb if unhealthy => LiquidationAction::Start,
            AgentStatus::Liquidation if safe => LiquidationAction::End,
            _ => LiquidationAction::None,
        }
    }
}

/// Integer amount with `decimals` implied decimals as a Decimal
fn to_units(amount: Amount, decimals: u32) -> Option<Decimal> {
    let raw = i128::try_from(amount).ok()?;
    Decimal::try_from_i128_with_scale(raw, decimals).ok()
}

/// `Some(None)` when nothing is owed, `None` when data is missing
fn ratio_bips(
    collateral_wei: Amount,
    collateral: &CollateralType,
    prices: &PriceSnapshot,
    obligation: Decimal,
) -> Option<Option<Decimal>> {
    if obligation.is_zero() {
        return Some(None);
    }
    let amount = to_units(collateral_wei, u32::from(collateral.decimals))?;
    let price = if collateral.direct_price_pair {
        prices.get(&collateral.token_ftso_symbol)?.value
    } else {
        prices.cross_rate(&collateral.token_ftso_symbol, &collateral.asset_ftso_symbol)?
    };

    let value = amount.checked_mul(price)?;
    let ratio = value.checked_div(obligation)?.checked_mul(Decimal::from(BIPS))?;
    Some(Some(ratio))
}
