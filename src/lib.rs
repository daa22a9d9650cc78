pub mod amount;
pub mod clock;
pub mod config;
pub mod csv;
pub mod engine;
pub mod gateway;
pub mod journal;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod payment_method;
pub mod replay;
pub mod sweep;
pub mod sync;

pub use amount::{Amount, FeeRate};
pub use engine::{Engine, EngineError, PayoutError, SettlementDisposition};
pub use model::{
    DisputeOutcome, Earning, EarningStatus, Event, LedgerEntry, PaymentMethod, PayoutRequest,
    PayoutStatus, SettlementOutcome, WalletSnapshot,
};
