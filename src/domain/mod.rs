pub mod agent;
pub mod amount;
pub mod collateral;
pub mod event;
pub mod prices;
pub mod settings;

pub use agent::*;
pub use amount::Amount;
pub use collateral::*;
pub use event::{EventKind, EventName, EventPosition, LedgerEvent, RawLedgerEvent};
pub use prices::*;
pub use settings::*;
