pub mod clock;
pub mod config;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod reaper;
pub mod wal;

pub use ledger::{Ledger, LedgerBuilder, LedgerError};
