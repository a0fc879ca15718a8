use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Collateral class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollateralClass {
    /// Pool collateral (wrapped native token)
    Pool,
    /// Vault collateral (stablecoins etc.)
    Vault,
}

impl CollateralClass {
    /// Ledger class code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(CollateralClass::Pool),
            2 => Some(CollateralClass::Vault),
            _ => None,
        }
    }
}

/// One entry of the collateral catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralType {
    pub class: CollateralClass,
    pub token: Address,
    pub decimals: u8,
    pub direct_price_pair: bool,
    pub asset_ftso_symbol: String,
    pub token_ftso_symbol: String,
    pub min_collateral_ratio_bips: u32,
    pub ccb_min_collateral_ratio_bips: u32,
    pub safety_min_collateral_ratio_bips: u32,
    /// Set on deprecation; the type stays in the catalogue
    pub valid_until: Option<DateTime<Utc>>,
}

impl CollateralType {
    pub fn key(&self) -> (CollateralClass, Address) {
        (self.class, self.token)
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_until.map_or(true, |until| at < until)
    }
}

/// Versioned collateral catalogue keyed by (class, token)
#[derive(Debug, Clone, Default)]
pub struct CollateralCatalogue {
    types: HashMap<(CollateralClass, Address), CollateralType>,
}

impl CollateralCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a type. Returns true if it was already known.
    pub fn add(&mut self, collateral: CollateralType) -> bool {
        self.types.insert(collateral.key(), collateral).is_some()
    }

    pub fn get(&self, class: CollateralClass, token: Address) -> Option<&CollateralType> {
        self.types.get(&(class, token))
    }

    pub fn get_mut(&mut self, class: CollateralClass, token: Address) -> Option<&mut CollateralType> {
        self.types.get_mut(&(class, token))
    }

    /// The pool collateral type currently in force
    pub fn active_pool_collateral(&self, at: DateTime<Utc>) -> Option<&CollateralType> {
        self.types
            .values()
            .filter(|c| c.class == CollateralClass::Pool && c.is_valid_at(at))
            .max_by_key(|c| c.valid_until.unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollateralType> {
        self.types.values()
    }
}
