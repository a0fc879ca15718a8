//! Ledger collaborator interfaces
//!
//! The contracts themselves live elsewhere; the observer only reads their
//! current view and issues a handful of calls.

pub mod source;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AgentRecord, AgentStatus, Amount, CollateralType, PriceSnapshot, SettingValue};
use crate::error::Result;

pub use source::{ChannelEventSource, EventSender, EventSource, ReplaySource};

/// Current ledger view of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub vault: Address,
    pub owner: Address,
    pub underlying_address: String,
    pub collateral_pool: Address,
    pub status: AgentStatus,
    pub publicly_available: bool,
    pub vault_collateral_token: Address,
    pub vault_collateral_wei: Amount,
    pub pool_collateral_wei: Amount,
    pub minted_uba: Amount,
    pub reserved_uba: Amount,
    pub redeeming_uba: Amount,
    pub dust_uba: Amount,
    pub underlying_balance_uba: Amount,
}

impl AgentInfo {
    /// Build a tracked record seeded from this view
    pub fn into_record(self) -> AgentRecord {
        let mut record = AgentRecord::new(
            self.vault,
            self.owner,
            self.underlying_address,
            self.collateral_pool,
            self.vault_collateral_token,
        );
        record.status = self.status;
        record.publicly_available = self.publicly_available;
        record.vault_collateral_wei = self.vault_collateral_wei;
        record.pool_collateral_wei = self.pool_collateral_wei;
        record.minted_uba = self.minted_uba;
        record.reserved_uba = self.reserved_uba;
        record.redeeming_uba = self.redeeming_uba;
        record.dust_uba = self.dust_uba;
        record.underlying_balance_uba = self.underlying_balance_uba;
        record
    }
}

/// Reads and calls against the asset manager and its satellites.
///
/// Implementations own retries and timeouts; failures come back as
/// `WatchError::Ledger` with a structured `LedgerError`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// All settings as (name, value) pairs, names as the contract spells them
    async fn settings(&self) -> Result<Vec<(String, SettingValue)>>;

    /// Full collateral catalogue including deprecated types
    async fn collateral_types(&self) -> Result<Vec<CollateralType>>;

    /// Amount currently held by the core vault (UBA)
    async fn core_vault_holdings(&self) -> Result<Amount>;

    /// Vault addresses of every agent that exists right now
    async fn all_agents(&self) -> Result<Vec<Address>>;

    async fn agent_info(&self, vault: Address) -> Result<AgentInfo>;

    async fn current_prices(&self) -> Result<PriceSnapshot>;

    async fn trusted_prices(&self) -> Result<PriceSnapshot>;

    async fn start_liquidation(&self, vault: Address) -> Result<()>;

    async fn end_liquidation(&self, vault: Address) -> Result<()>;
}
