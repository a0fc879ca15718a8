//! Reactive actors driven by the event bus

pub mod liquidation;
pub mod policy;

pub use liquidation::{LiquidationTrigger, TriggerStats};
pub use policy::{CollateralRatioPolicy, CollateralRatios, LiquidationAction, LiquidationPolicy};
