#![allow(dead_code)]

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Mutex;

use synthwatch::domain::{AgentStatus, Amount, CollateralClass, CollateralType, PriceSnapshot, SettingValue};
use synthwatch::{AgentInfo, LedgerClient, LedgerError, Result};

pub fn vault(n: u8) -> Address {
    Address::repeat_byte(n)
}

pub fn pool(n: u8) -> Address {
    Address::repeat_byte(n.wrapping_add(0x80))
}

pub fn usdc() -> Address {
    Address::repeat_byte(0x10)
}

pub fn wnat() -> Address {
    Address::repeat_byte(0x20)
}

/// Lowercase 0x-prefixed hex, as event JSON carries addresses
pub fn hex(address: Address) -> String {
    let body: String = address.as_slice().iter().map(|b| format!("{b:02x}")).collect();
    format!("0x{body}")
}

pub fn agent(n: u8, minted_uba: Amount, vault_collateral_wei: Amount) -> AgentInfo {
    AgentInfo {
        vault: vault(n),
        owner: Address::repeat_byte(0xee),
        underlying_address: format!("rAgent{n}"),
        collateral_pool: pool(n),
        status: AgentStatus::Normal,
        publicly_available: true,
        vault_collateral_token: usdc(),
        vault_collateral_wei,
        pool_collateral_wei: 100_000_000,
        minted_uba,
        reserved_uba: 0,
        redeeming_uba: 0,
        dust_uba: 0,
        underlying_balance_uba: 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    StartLiquidation(Address),
    EndLiquidation(Address),
}

/// In-memory ledger: fixed reads, recorded calls, scripted reverts
#[derive(Default)]
pub struct FakeLedger {
    settings: Vec<(String, SettingValue)>,
    collaterals: Vec<CollateralType>,
    prices: PriceSnapshot,
    agents: Mutex<BTreeMap<Address, AgentInfo>>,
    reverts: Mutex<BTreeMap<Address, String>>,
    calls: Mutex<Vec<LedgerCall>>,
    agent_info_calls: Mutex<u32>,
}

impl FakeLedger {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 6-decimal asset priced at 2 USD, USDC vault collateral and a NAT pool,
    /// both 1 USD, thresholds 150% / 160%
    pub fn with_market() -> Self {
        let now = Utc::now();
        let collateral = |class, token, symbol: &str| CollateralType {
            class,
            token,
            decimals: 6,
            direct_price_pair: false,
            asset_ftso_symbol: "XRP".into(),
            token_ftso_symbol: symbol.into(),
            min_collateral_ratio_bips: 15_000,
            ccb_min_collateral_ratio_bips: 14_000,
            safety_min_collateral_ratio_bips: 16_000,
            valid_until: None,
        };

        Self {
            settings: vec![("assetDecimals".into(), SettingValue::Uint(6))],
            collaterals: vec![
                collateral(CollateralClass::Vault, usdc(), "USDC"),
                collateral(CollateralClass::Pool, wnat(), "NAT"),
            ],
            prices: PriceSnapshot::new()
                .with_price("XRP", dec!(2), now)
                .with_price("USDC", dec!(1), now)
                .with_price("NAT", dec!(1), now),
            ..Self::default()
        }
    }

    pub fn add_agent(&self, info: AgentInfo) {
        self.agents.lock().unwrap().insert(info.vault, info);
    }

    pub fn revert_for(&self, vault: Address, reason: &str) {
        self.reverts.lock().unwrap().insert(vault, reason.to_string());
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn agent_info_calls(&self) -> u32 {
        *self.agent_info_calls.lock().unwrap()
    }

    fn call(&self, method: &str, call: LedgerCall, vault: Address) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.reverts.lock().unwrap().get(&vault) {
            Some(reason) => Err(LedgerError::reverted(method, reason).into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn settings(&self) -> Result<Vec<(String, SettingValue)>> {
        Ok(self.settings.clone())
    }

    async fn collateral_types(&self) -> Result<Vec<CollateralType>> {
        Ok(self.collaterals.clone())
    }

    async fn core_vault_holdings(&self) -> Result<Amount> {
        Ok(0)
    }

    async fn all_agents(&self) -> Result<Vec<Address>> {
        Ok(self.agents.lock().unwrap().keys().copied().collect())
    }

    async fn agent_info(&self, vault: Address) -> Result<AgentInfo> {
        *self.agent_info_calls.lock().unwrap() += 1;
        self.agents
            .lock()
            .unwrap()
            .get(&vault)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(vault.to_string()).into())
    }

    async fn current_prices(&self) -> Result<PriceSnapshot> {
        Ok(self.prices.clone())
    }

    async fn trusted_prices(&self) -> Result<PriceSnapshot> {
        Ok(self.prices.clone())
    }

    async fn start_liquidation(&self, vault: Address) -> Result<()> {
        self.call("startLiquidation", LedgerCall::StartLiquidation(vault), vault)
    }

    async fn end_liquidation(&self, vault: Address) -> Result<()> {
        self.call("endLiquidation", LedgerCall::EndLiquidation(vault), vault)
    }
}
