//! Ledger amounts
//!
//! Amounts travel as JSON numbers for small values and as decimal strings once
//! they no longer fit in 53 bits, so both forms are accepted.

use serde::de::{self, Deserializer, Visitor};
use std::fmt;

/// Amount in underlying base units (UBA) or wei
pub type Amount = u128;

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative integer or a decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(v as Amount)
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        u128::try_from(v).map_err(|_| E::custom(format!("negative amount: {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        v.trim()
            .parse::<u128>()
            .map_err(|e| E::custom(format!("invalid amount {v:?}: {e}")))
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
    deserializer.deserialize_any(AmountVisitor)
}

/// For `#[serde(deserialize_with)]` on `Vec<Amount>` fields
pub fn deserialize_vec<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Amount>, D::Error> {
    #[derive(serde::Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "deserialize")] Amount);

    let items: Vec<Wrapped> = serde::Deserialize::deserialize(deserializer)?;
    Ok(items.into_iter().map(|w| w.0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "deserialize")]
        value: Amount,
    }

    #[test]
    fn test_number_and_string_forms() {
        let h: Holder = serde_json::from_str(r#"{"value": 1000}"#).unwrap();
        assert_eq!(h.value, 1000);

        let h: Holder =
            serde_json::from_str(r#"{"value": "340282366920938463463374607431768211455"}"#).unwrap();
        assert_eq!(h.value, u128::MAX);
    }

    #[test]
    fn test_rejects_negative_and_garbage() {
        assert!(serde_json::from_str::<Holder>(r#"{"value": -1}"#).is_err());
        assert!(serde_json::from_str::<Holder>(r#"{"value": "12abc"}"#).is_err());
    }
}
