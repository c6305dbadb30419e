//! A single-asset fungible token ledger.
//!
//! Balances and allowances live in Hamts inside a caller-supplied blockstore. The [`Ledger`] owns
//! that state and applies each operation atomically, [`TokenHandle`] binds it to an authenticated
//! caller, and [`SharedLedger`] serializes access from concurrent callers.

pub mod config;
pub mod ledger;
pub mod shared;

pub use config::LedgerConfig;
pub use ledger::types::FungibleToken;
pub use ledger::{Ledger, LedgerError, TokenHandle};
pub use shared::SharedLedger;
