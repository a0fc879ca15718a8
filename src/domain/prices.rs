use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One price as read from the price reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// USD price, already scaled by the feed decimals
    pub value: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Price view keyed by FTSO symbol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    prices: HashMap<String, Price>,
}

impl PriceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, symbol: &str, value: Decimal, timestamp: DateTime<Utc>) -> Self {
        self.insert(symbol, Price { value, timestamp });
        self
    }

    pub fn insert(&mut self, symbol: &str, price: Price) {
        self.prices.insert(symbol.to_string(), price);
    }

    pub fn get(&self, symbol: &str) -> Option<&Price> {
        self.prices.get(symbol)
    }

    /// Price of one `token_symbol` unit in `asset_symbol` units
    pub fn cross_rate(&self, token_symbol: &str, asset_symbol: &str) -> Option<Decimal> {
        let token = self.get(token_symbol)?;
        let asset = self.get(asset_symbol)?;
        if asset.value.is_zero() {
            return None;
        }
        token.value.checked_div(asset.value)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
