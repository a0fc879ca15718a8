use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::amount::Amount;

/// Agent lifecycle status as reported by the ledger.
///
/// `Destroyed` never comes from the ledger; it marks records kept for audit
/// after an `AgentDestroyed` event when hard delete is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentStatus {
    Normal,
    /// Collateral call band
    Ccb,
    Liquidation,
    FullLiquidation,
    Destroying,
    Destroyed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Normal => "NORMAL",
            AgentStatus::Ccb => "CCB",
            AgentStatus::Liquidation => "LIQUIDATION",
            AgentStatus::FullLiquidation => "FULL_LIQUIDATION",
            AgentStatus::Destroying => "DESTROYING",
            AgentStatus::Destroyed => "DESTROYED",
        }
    }

    /// Ledger status code (`AgentInfo.status`)
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AgentStatus::Normal),
            1 => Some(AgentStatus::Ccb),
            2 => Some(AgentStatus::Liquidation),
            3 => Some(AgentStatus::FullLiquidation),
            4 => Some(AgentStatus::Destroying),
            _ => None,
        }
    }

    /// Transitions the ledger is known to perform. Anything else is logged
    /// by the reconciler but still applied, since the ledger is authoritative.
    pub fn can_transition_to(&self, target: AgentStatus) -> bool {
        use AgentStatus::*;

        match (self, target) {
            (Normal, Ccb | Liquidation | FullLiquidation | Destroying) => true,
            (Ccb, Normal | Liquidation | FullLiquidation | Destroying) => true,
            (Liquidation, Normal | FullLiquidation | Destroying) => true,
            (FullLiquidation, Destroying) => true,
            (Destroying, Destroyed) => true,
            (s, t) if *s == t => true,
            _ => false,
        }
    }

    /// In (partial) liquidation or collateral call band
    pub fn is_liquidating(&self) -> bool {
        matches!(self, AgentStatus::Ccb | AgentStatus::Liquidation)
    }

    /// Statuses the liquidation trigger may still move
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            AgentStatus::Normal | AgentStatus::Ccb | AgentStatus::Liquidation
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derived per-agent state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub vault: Address,
    pub owner: Address,
    pub underlying_address: String,
    pub collateral_pool: Address,
    pub status: AgentStatus,
    pub publicly_available: bool,

    // === Collateral ===
    pub vault_collateral_token: Address,
    pub vault_collateral_wei: Amount,
    pub pool_collateral_wei: Amount,

    // === Backing (UBA) ===
    pub minted_uba: Amount,
    pub reserved_uba: Amount,
    pub redeeming_uba: Amount,
    pub dust_uba: Amount,
    pub underlying_balance_uba: Amount,

    // === Counters ===
    pub mintings: u64,
    pub redemptions: u64,
    pub liquidations: u64,
}

impl AgentRecord {
    /// Fresh record for a just-created vault
    pub fn new(
        vault: Address,
        owner: Address,
        underlying_address: impl Into<String>,
        collateral_pool: Address,
        vault_collateral_token: Address,
    ) -> Self {
        Self {
            vault,
            owner,
            underlying_address: underlying_address.into(),
            collateral_pool,
            status: AgentStatus::Normal,
            publicly_available: false,
            vault_collateral_token,
            vault_collateral_wei: 0,
            pool_collateral_wei: 0,
            minted_uba: 0,
            reserved_uba: 0,
            redeeming_uba: 0,
            dust_uba: 0,
            underlying_balance_uba: 0,
            mintings: 0,
            redemptions: 0,
            liquidations: 0,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.status == AgentStatus::Destroyed
    }

    /// Minted plus in-flight amounts the agent's collateral must cover
    pub fn backing_obligation_uba(&self) -> Amount {
        self.minted_uba
            .saturating_add(self.reserved_uba)
            .saturating_add(self.redeeming_uba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AgentStatus::from_code(0), Some(AgentStatus::Normal));
        assert_eq!(AgentStatus::from_code(3), Some(AgentStatus::FullLiquidation));
        assert_eq!(AgentStatus::from_code(9), None);
    }

    #[test]
    fn test_status_transitions() {
        assert!(AgentStatus::Normal.can_transition_to(AgentStatus::Liquidation));
        assert!(AgentStatus::Liquidation.can_transition_to(AgentStatus::Normal));
        assert!(!AgentStatus::FullLiquidation.can_transition_to(AgentStatus::Normal));
        assert!(!AgentStatus::Destroyed.can_transition_to(AgentStatus::Normal));
        assert!(AgentStatus::Ccb.is_liquidating());
        assert!(!AgentStatus::FullLiquidation.is_actionable());
    }

    #[test]
    fn test_backing_obligation() {
        let mut rec = AgentRecord::new(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            "rUnderlying1",
            Address::repeat_byte(3),
            Address::repeat_byte(4),
        );
        rec.minted_uba = 600;
        rec.reserved_uba = 100;
        rec.redeeming_uba = 400;
        assert_eq!(rec.backing_obligation_uba(), 1100);
        assert_eq!(rec.status, AgentStatus::Normal);
    }
}
