//! Core vault accounting
//!
//! Four monotone counters; everything else is derived. Each update clamps its
//! increment so that neither `in_transit` nor `holdings` can go negative and
//! reports how much was actually applied.

use serde::Serialize;
use tracing::warn;

use crate::domain::Amount;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoreVaultTotals {
    pub transferring: Amount,
    pub transferred: Amount,
    pub returned: Amount,
    pub redemption_requested: Amount,
}

impl CoreVaultTotals {
    /// Started but not yet confirmed transfers
    pub fn in_transit(&self) -> Amount {
        self.transferring.saturating_sub(self.transferred)
    }

    /// Held by the core vault
    pub fn holdings(&self) -> Amount {
        self.transferred
            .saturating_sub(self.returned.saturating_add(self.redemption_requested))
    }

    /// Share of the backed supply the core vault accounts for
    pub fn backed_contribution(&self) -> Amount {
        self.in_transit().saturating_add(self.holdings())
    }

    /// Holdings present before the observer started
    pub fn seed_holdings(&mut self, amount: Amount) {
        self.transferring = self.transferring.saturating_add(amount);
        self.transferred = self.transferred.saturating_add(amount);
    }

    pub fn start_transfer(&mut self, value: Amount) {
        self.transferring = self.transferring.saturating_add(value);
    }

    pub fn transfer_succeeded(&mut self, value: Amount) -> Amount {
        let applied = clamp("transfer success", value, self.in_transit());
        self.transferred += applied;
        applied
    }

    /// The transfer failed and the agent got its backing back
    pub fn transfer_defaulted(&mut self, reminted: Amount) -> Amount {
        let applied = clamp("transfer default", reminted, self.in_transit());
        self.transferred += applied;
        self.returned += applied;
        applied
    }

    pub fn return_confirmed(&mut self, reminted: Amount) -> Amount {
        let applied = clamp("return confirmation", reminted, self.holdings());
        self.returned += applied;
        applied
    }

    pub fn redemption_requested(&mut self, value: Amount) -> Amount {
        let applied = clamp("redemption request", value, self.holdings());
        self.redemption_requested += applied;
        applied
    }
}

fn clamp(what: &str, value: Amount, available: Amount) -> Amount {
    if value > available {
        warn!(
            "Core vault {} of {} exceeds available {}; clamping",
            what, value, available
        );
        available
    } else {
        value
    }
}
