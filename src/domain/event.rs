//! Ledger events
//!
//! Events arrive as `{name, args, position}` records. Known names decode into
//! typed argument structs; anything else becomes `EventKind::Unrecognized`
//! and is ignored downstream.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::amount::{self, Amount};
use crate::error::{Result, WatchError};

/// Position of an event in the ledger: (block number, log index in block)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPosition {
    pub block: u64,
    pub log_index: u32,
}

impl EventPosition {
    pub fn new(block: u64, log_index: u32) -> Self {
        Self { block, log_index }
    }
}

impl fmt::Display for EventPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.log_index)
    }
}

/// Undecoded event as delivered by the event source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLedgerEvent {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub position: EventPosition,
}

/// Access to the agent vault an event refers to, if any
pub trait EventArgs {
    fn agent_vault(&self) -> Option<Address> {
        None
    }
}

macro_rules! agent_scoped {
    ($($args:ident),* $(,)?) => {
        $(impl EventArgs for args::$args {
            fn agent_vault(&self) -> Option<Address> {
                Some(self.agent_vault)
            }
        })*
    };
}

macro_rules! unscoped {
    ($($args:ident),* $(,)?) => {
        $(impl EventArgs for args::$args {})*
    };
}

macro_rules! ledger_events {
    ($($name:ident),* $(,)?) => {
        /// Names of the ledger events the observer understands
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventName {
            $($name),*
        }

        impl EventName {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventName::$name => stringify!($name)),*
                }
            }
        }

        impl FromStr for EventName {
            type Err = WatchError;

            fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
                match raw {
                    $(stringify!($name) => Ok(EventName::$name),)*
                    _ => Err(WatchError::InvalidEvent {
                        event: raw.to_string(),
                        reason: "unknown event name".to_string(),
                    }),
                }
            }
        }

        /// Decoded event payload
        #[derive(Debug, Clone, PartialEq)]
        pub enum EventKind {
            $($name(args::$name),)*
            Unrecognized(String),
        }

        impl EventKind {
            pub fn name(&self) -> Option<EventName> {
                match self {
                    $(EventKind::$name(_) => Some(EventName::$name),)*
                    EventKind::Unrecognized(_) => None,
                }
            }

            pub fn name_str(&self) -> &str {
                match self {
                    $(EventKind::$name(_) => stringify!($name),)*
                    EventKind::Unrecognized(name) => name.as_str(),
                }
            }

            pub fn agent_vault(&self) -> Option<Address> {
                match self {
                    $(EventKind::$name(a) => a.agent_vault(),)*
                    EventKind::Unrecognized(_) => None,
                }
            }

            fn decode(name: EventName, args: serde_json::Value) -> serde_json::Result<Self> {
                match name {
                    $(EventName::$name => Ok(EventKind::$name(serde_json::from_value(args)?)),)*
                }
            }
        }
    };
}

ledger_events! {
    // Agent lifecycle
    AgentVaultCreated,
    AgentDestroyAnnounced,
    AgentDestroyed,
    AgentInCCB,
    LiquidationStarted,
    FullLiquidationStarted,
    LiquidationEnded,
    AgentAvailable,
    AvailableAgentExited,
    // Collateral movement
    VaultCollateralDeposited,
    VaultCollateralWithdrawn,
    CollateralPoolEntered,
    CollateralPoolExited,
    UnderlyingBalanceChanged,
    DustChanged,
    // Minting
    CollateralReserved,
    CollateralReservationDeleted,
    MintingExecuted,
    SelfMint,
    // Redemption and liquidation
    RedemptionRequested,
    RedemptionPerformed,
    RedemptionDefault,
    RedemptionPaymentBlocked,
    RedemptionPaymentFailed,
    RedeemedInCollateral,
    SelfClose,
    LiquidationPerformed,
    // Settings
    SettingChanged,
    SettingArrayChanged,
    ContractChanged,
    // Collateral catalogue
    CollateralTypeAdded,
    CollateralRatiosChanged,
    CollateralTypeDeprecated,
    // Core vault
    TransferToCoreVaultStarted,
    TransferToCoreVaultSuccessful,
    TransferToCoreVaultDefaulted,
    ReturnFromCoreVaultRequested,
    ReturnFromCoreVaultConfirmed,
    ReturnFromCoreVaultCancelled,
    CoreVaultRedemptionRequested,
    // Prices
    PricesPublished,
}

agent_scoped! {
    AgentVaultCreated,
    AgentDestroyAnnounced,
    AgentDestroyed,
    AgentInCCB,
    LiquidationStarted,
    FullLiquidationStarted,
    LiquidationEnded,
    AgentAvailable,
    AvailableAgentExited,
    VaultCollateralDeposited,
    VaultCollateralWithdrawn,
    UnderlyingBalanceChanged,
    DustChanged,
    CollateralReserved,
    CollateralReservationDeleted,
    MintingExecuted,
    SelfMint,
    RedemptionRequested,
    RedemptionPerformed,
    RedemptionDefault,
    RedemptionPaymentBlocked,
    RedemptionPaymentFailed,
    RedeemedInCollateral,
    SelfClose,
    LiquidationPerformed,
    TransferToCoreVaultStarted,
    TransferToCoreVaultSuccessful,
    TransferToCoreVaultDefaulted,
    ReturnFromCoreVaultRequested,
    ReturnFromCoreVaultConfirmed,
    ReturnFromCoreVaultCancelled,
}

// Not keyed by agent vault (pool events carry the pool address)
unscoped! {
    CollateralPoolEntered,
    CollateralPoolExited,
    SettingChanged,
    SettingArrayChanged,
    ContractChanged,
    CollateralTypeAdded,
    CollateralRatiosChanged,
    CollateralTypeDeprecated,
    CoreVaultRedemptionRequested,
    PricesPublished,
}

/// A decoded ledger event
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEvent {
    pub position: EventPosition,
    pub kind: EventKind,
}

impl LedgerEvent {
    pub fn new(position: EventPosition, kind: EventKind) -> Self {
        Self { position, kind }
    }

    /// Decode a raw record. Unknown names are not an error.
    pub fn from_raw(raw: RawLedgerEvent) -> Result<Self> {
        let kind = match raw.name.parse::<EventName>() {
            Ok(name) => EventKind::decode(name, raw.args).map_err(|e| WatchError::InvalidEvent {
                event: raw.name.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => EventKind::Unrecognized(raw.name),
        };
        Ok(Self {
            position: raw.position,
            kind,
        })
    }

    pub fn name(&self) -> Option<EventName> {
        self.kind.name()
    }

    pub fn agent_vault(&self) -> Option<Address> {
        self.kind.agent_vault()
    }
}

/// Argument structs, one per event, field names as emitted by the contracts
pub mod args {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AgentVaultCreated {
        pub owner: Address,
        pub agent_vault: Address,
        pub collateral_pool: Address,
        pub underlying_address: String,
        pub vault_collateral_token: Address,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AgentDestroyAnnounced {
        pub agent_vault: Address,
        #[serde(default)]
        pub destroy_allowed_at: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AgentDestroyed {
        pub agent_vault: Address,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AgentInCCB {
        pub agent_vault: Address,
        #[serde(default)]
        pub timestamp: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LiquidationStarted {
        pub agent_vault: Address,
        #[serde(default)]
        pub timestamp: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FullLiquidationStarted {
        pub agent_vault: Address,
        #[serde(default)]
        pub timestamp: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LiquidationEnded {
        pub agent_vault: Address,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AgentAvailable {
        pub agent_vault: Address,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AvailableAgentExited {
        pub agent_vault: Address,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct VaultCollateralDeposited {
        pub agent_vault: Address,
        pub token: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        pub amount_wei: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct VaultCollateralWithdrawn {
        pub agent_vault: Address,
        pub token: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        pub amount_wei: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CollateralPoolEntered {
        pub collateral_pool: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        pub amount_nat_wei: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CollateralPoolExited {
        pub collateral_pool: Address,
        #[serde(deserialize_with = "amount::deserialize")]
        pub amount_nat_wei: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct UnderlyingBalanceChanged {
        pub agent_vault: Address,
        #[serde(rename = "underlyingBalanceUBA", deserialize_with = "amount::deserialize")]
        pub underlying_balance_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DustChanged {
        pub agent_vault: Address,
        #[serde(rename = "dustUBA", deserialize_with = "amount::deserialize")]
        pub dust_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CollateralReserved {
        pub agent_vault: Address,
        pub minter: Address,
        pub collateral_reservation_id: u64,
        #[serde(rename = "valueUBA", deserialize_with = "amount::deserialize")]
        pub value_uba: Amount,
        #[serde(rename = "feeUBA", deserialize_with = "amount::deserialize")]
        pub fee_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CollateralReservationDeleted {
        pub agent_vault: Address,
        pub minter: Address,
        pub collateral_reservation_id: u64,
        #[serde(rename = "reservedAmountUBA", deserialize_with = "amount::deserialize")]
        pub reserved_amount_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MintingExecuted {
        pub agent_vault: Address,
        pub collateral_reservation_id: u64,
        #[serde(rename = "mintedAmountUBA", deserialize_with = "amount::deserialize")]
        pub minted_amount_uba: Amount,
        #[serde(rename = "agentFeeUBA", deserialize_with = "amount::deserialize")]
        pub agent_fee_uba: Amount,
        #[serde(rename = "poolFeeUBA", deserialize_with = "amount::deserialize")]
        pub pool_fee_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SelfMint {
        pub agent_vault: Address,
        #[serde(default)]
        pub mint_from_free_underlying: bool,
        #[serde(rename = "mintedAmountUBA", deserialize_with = "amount::deserialize")]
        pub minted_amount_uba: Amount,
        #[serde(rename = "depositedAmountUBA", deserialize_with = "amount::deserialize")]
        pub deposited_amount_uba: Amount,
        #[serde(rename = "poolFeeUBA", deserialize_with = "amount::deserialize")]
        pub pool_fee_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RedemptionRequested {
        pub agent_vault: Address,
        pub redeemer: Address,
        pub request_id: u64,
        pub payment_address: String,
        #[serde(rename = "valueUBA", deserialize_with = "amount::deserialize")]
        pub value_uba: Amount,
        #[serde(rename = "feeUBA", deserialize_with = "amount::deserialize")]
        pub fee_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RedemptionPerformed {
        pub agent_vault: Address,
        pub redeemer: Address,
        pub request_id: u64,
        #[serde(rename = "redemptionAmountUBA", deserialize_with = "amount::deserialize")]
        pub redemption_amount_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RedemptionDefault {
        pub agent_vault: Address,
        pub redeemer: Address,
        pub request_id: u64,
        #[serde(rename = "redemptionAmountUBA", deserialize_with = "amount::deserialize")]
        pub redemption_amount_uba: Amount,
        #[serde(deserialize_with = "amount::deserialize")]
        pub redeemed_vault_collateral_wei: Amount,
        #[serde(deserialize_with = "amount::deserialize")]
        pub redeemed_pool_collateral_wei: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RedemptionPaymentBlocked {
        pub agent_vault: Address,
        pub redeemer: Address,
        pub request_id: u64,
        #[serde(rename = "redemptionAmountUBA", deserialize_with = "amount::deserialize")]
        pub redemption_amount_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RedemptionPaymentFailed {
        pub agent_vault: Address,
        pub redeemer: Address,
        pub request_id: u64,
        #[serde(rename = "redemptionAmountUBA", deserialize_with = "amount::deserialize")]
        pub redemption_amount_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RedeemedInCollateral {
        pub agent_vault: Address,
        pub redeemer: Address,
        #[serde(rename = "redemptionAmountUBA", deserialize_with = "amount::deserialize")]
        pub redemption_amount_uba: Amount,
        #[serde(deserialize_with = "amount::deserialize")]
        pub paid_vault_collateral_wei: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SelfClose {
        pub agent_vault: Address,
        #[serde(rename = "valueUBA", deserialize_with = "amount::deserialize")]
        pub value_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LiquidationPerformed {
        pub agent_vault: Address,
        pub liquidator: Address,
        #[serde(rename = "valueUBA", deserialize_with = "amount::deserialize")]
        pub value_uba: Amount,
        #[serde(default, deserialize_with = "amount::deserialize")]
        pub paid_vault_collateral_wei: Amount,
        #[serde(default, deserialize_with = "amount::deserialize")]
        pub paid_pool_collateral_wei: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SettingChanged {
        pub name: String,
        #[serde(deserialize_with = "amount::deserialize")]
        pub value: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SettingArrayChanged {
        pub name: String,
        #[serde(deserialize_with = "amount::deserialize_vec")]
        pub value: Vec<Amount>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ContractChanged {
        pub name: String,
        pub value: Address,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CollateralTypeAdded {
        pub collateral_class: u8,
        pub token: Address,
        pub decimals: u8,
        #[serde(default)]
        pub direct_price_pair: bool,
        pub asset_ftso_symbol: String,
        pub token_ftso_symbol: String,
        #[serde(rename = "minCollateralRatioBIPS")]
        pub min_collateral_ratio_bips: u32,
        #[serde(rename = "ccbMinCollateralRatioBIPS")]
        pub ccb_min_collateral_ratio_bips: u32,
        #[serde(rename = "safetyMinCollateralRatioBIPS")]
        pub safety_min_collateral_ratio_bips: u32,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CollateralRatiosChanged {
        pub collateral_class: u8,
        pub collateral_token: Address,
        #[serde(rename = "minCollateralRatioBIPS")]
        pub min_collateral_ratio_bips: u32,
        #[serde(rename = "ccbMinCollateralRatioBIPS")]
        pub ccb_min_collateral_ratio_bips: u32,
        #[serde(rename = "safetyMinCollateralRatioBIPS")]
        pub safety_min_collateral_ratio_bips: u32,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CollateralTypeDeprecated {
        pub collateral_class: u8,
        pub collateral_token: Address,
        /// Unix seconds
        pub valid_until: i64,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TransferToCoreVaultStarted {
        pub agent_vault: Address,
        pub transfer_redemption_request_id: u64,
        #[serde(rename = "valueUBA", deserialize_with = "amount::deserialize")]
        pub value_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TransferToCoreVaultSuccessful {
        pub agent_vault: Address,
        pub transfer_redemption_request_id: u64,
        #[serde(rename = "valueUBA", deserialize_with = "amount::deserialize")]
        pub value_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TransferToCoreVaultDefaulted {
        pub agent_vault: Address,
        pub transfer_redemption_request_id: u64,
        #[serde(rename = "remintedUBA", deserialize_with = "amount::deserialize")]
        pub reminted_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ReturnFromCoreVaultRequested {
        pub agent_vault: Address,
        pub request_id: u64,
        #[serde(rename = "valueUBA", deserialize_with = "amount::deserialize")]
        pub value_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ReturnFromCoreVaultConfirmed {
        pub agent_vault: Address,
        pub request_id: u64,
        #[serde(rename = "receivedUnderlyingUBA", deserialize_with = "amount::deserialize")]
        pub received_underlying_uba: Amount,
        #[serde(rename = "remintedUBA", deserialize_with = "amount::deserialize")]
        pub reminted_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ReturnFromCoreVaultCancelled {
        pub agent_vault: Address,
        pub request_id: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CoreVaultRedemptionRequested {
        pub redeemer: Address,
        pub payment_address: String,
        #[serde(rename = "valueUBA", deserialize_with = "amount::deserialize")]
        pub value_uba: Amount,
        #[serde(rename = "feeUBA", deserialize_with = "amount::deserialize")]
        pub fee_uba: Amount,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PricesPublished {
        pub voting_round_id: u64,
    }
}
