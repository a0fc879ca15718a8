//! Settings schema mirrored from the asset manager
//!
//! Every setting-change event must name one of these; an unknown name means the
//! local schema and the deployed contracts disagree.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::amount::Amount;
use crate::error::WatchError;

macro_rules! setting_names {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Known setting names
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum SettingName {
            $($variant),*
        }

        impl SettingName {
            pub const ALL: &'static [SettingName] = &[$(SettingName::$variant),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(SettingName::$variant => $name),*
                }
            }
        }

        impl FromStr for SettingName {
            type Err = WatchError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw {
                    $($name => Ok(SettingName::$variant),)*
                    _ => Err(WatchError::UnknownSetting(raw.to_string())),
                }
            }
        }
    };
}

setting_names! {
    // Contracts
    AssetManagerController => "assetManagerController",
    FAsset => "fAsset",
    AgentVaultFactory => "agentVaultFactory",
    CollateralPoolFactory => "collateralPoolFactory",
    CollateralPoolTokenFactory => "collateralPoolTokenFactory",
    FdcVerification => "fdcVerification",
    PriceReader => "priceReader",
    AgentOwnerRegistry => "agentOwnerRegistry",
    BurnAddress => "burnAddress",
    // Asset
    AssetDecimals => "assetDecimals",
    AssetMintingDecimals => "assetMintingDecimals",
    AssetUnitUba => "assetUnitUBA",
    AssetMintingGranularityUba => "assetMintingGranularityUBA",
    LotSizeAmg => "lotSizeAMG",
    MintingCapAmg => "mintingCapAMG",
    MinUnderlyingBackingBips => "minUnderlyingBackingBIPS",
    RequireEoaAddressProof => "requireEOAAddressProof",
    // Minting and redemption
    CollateralReservationFeeBips => "collateralReservationFeeBIPS",
    UnderlyingBlocksForPayment => "underlyingBlocksForPayment",
    UnderlyingSecondsForPayment => "underlyingSecondsForPayment",
    RedemptionFeeBips => "redemptionFeeBIPS",
    RedemptionDefaultFactorVaultCollateralBips => "redemptionDefaultFactorVaultCollateralBIPS",
    ConfirmationByOthersAfterSeconds => "confirmationByOthersAfterSeconds",
    ConfirmationByOthersRewardUsd5 => "confirmationByOthersRewardUSD5",
    MaxRedeemedTickets => "maxRedeemedTickets",
    // Challenges and liquidation
    PaymentChallengeRewardBips => "paymentChallengeRewardBIPS",
    PaymentChallengeRewardUsd5 => "paymentChallengeRewardUSD5",
    CcbTimeSeconds => "ccbTimeSeconds",
    LiquidationStepSeconds => "liquidationStepSeconds",
    LiquidationCollateralFactorBips => "liquidationCollateralFactorBIPS",
    LiquidationFactorVaultCollateralBips => "liquidationFactorVaultCollateralBIPS",
    // Timing
    MaxTrustedPriceAgeSeconds => "maxTrustedPriceAgeSeconds",
    WithdrawalWaitMinSeconds => "withdrawalWaitMinSeconds",
    AttestationWindowSeconds => "attestationWindowSeconds",
    MinUpdateRepeatTimeSeconds => "minUpdateRepeatTimeSeconds",
    AnnouncedUnderlyingConfirmationMinSeconds => "announcedUnderlyingConfirmationMinSeconds",
    AgentFeeChangeTimelockSeconds => "agentFeeChangeTimelockSeconds",
    AgentMintingCrChangeTimelockSeconds => "agentMintingCRChangeTimelockSeconds",
    PoolExitAndTopupChangeTimelockSeconds => "poolExitAndTopupChangeTimelockSeconds",
    AgentTimelockedOperationWindowSeconds => "agentTimelockedOperationWindowSeconds",
    CollateralPoolTokenTimelockSeconds => "collateralPoolTokenTimelockSeconds",
    AgentExitAvailableTimelockSeconds => "agentExitAvailableTimelockSeconds",
    TokenInvalidationTimeMinSeconds => "tokenInvalidationTimeMinSeconds",
    VaultCollateralBuyForFlareFactorBips => "vaultCollateralBuyForFlareFactorBIPS",
    MintingPoolHoldingsRequiredBips => "mintingPoolHoldingsRequiredBIPS",
    // Core vault
    CoreVaultTransferTimeExtensionSeconds => "coreVaultTransferTimeExtensionSeconds",
    CoreVaultRedemptionFeeBips => "coreVaultRedemptionFeeBIPS",
    CoreVaultMinimumAmountLeftBips => "coreVaultMinimumAmountLeftBIPS",
    CoreVaultMinimumRedeemLots => "coreVaultMinimumRedeemLots",
}

impl fmt::Display for SettingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a mirrored setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingValue {
    Uint(Amount),
    UintArray(Vec<Amount>),
    Address(Address),
}

impl SettingValue {
    pub fn as_uint(&self) -> Option<Amount> {
        match self {
            SettingValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            SettingValue::Address(a) => Some(*a),
            _ => None,
        }
    }
}

/// Local mirror of ledger settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsMirror {
    values: BTreeMap<SettingName, SettingValue>,
}

impl SettingsMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the raw name against the schema and store the value
    pub fn set_raw(&mut self, name: &str, value: SettingValue) -> crate::error::Result<SettingName> {
        let name: SettingName = name.parse()?;
        self.values.insert(name, value);
        Ok(name)
    }

    pub fn set(&mut self, name: SettingName, value: SettingValue) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: SettingName) -> Option<&SettingValue> {
        self.values.get(&name)
    }

    pub fn uint(&self, name: SettingName) -> Option<Amount> {
        self.get(name).and_then(SettingValue::as_uint)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SettingName, &SettingValue)> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_round_trips() {
        for name in SettingName::ALL {
            assert_eq!(name.as_str().parse::<SettingName>().unwrap(), *name);
        }
    }

    #[test]
    fn test_unknown_name_is_fatal() {
        let mut mirror = SettingsMirror::new();
        let err = mirror
            .set_raw("lotSizeWithTypo", SettingValue::Uint(1))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_set_and_read_back() {
        let mut mirror = SettingsMirror::new();
        mirror.set_raw("lotSizeAMG", SettingValue::Uint(20)).unwrap();
        mirror
            .set_raw("liquidationCollateralFactorBIPS", SettingValue::UintArray(vec![12_000, 16_000]))
            .unwrap();
        assert_eq!(mirror.uint(SettingName::LotSizeAmg), Some(20));
        assert_eq!(mirror.uint(SettingName::LiquidationCollateralFactorBips), None);
        assert_eq!(mirror.len(), 2);
    }
}
