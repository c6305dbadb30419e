use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use thiserror::Error;

use crate::ledger::state::StateError as LedgerStateError;
use crate::ledger::state::StateInvariantError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid ledger initialization: {reason}")]
    InvalidInitialization { reason: String },
    #[error("value {amount:?} for {name:?} must be non-negative")]
    InvalidAmount { name: &'static str, amount: TokenAmount },
    #[error("error in underlying state {0}")]
    LedgerState(#[from] LedgerStateError),
    #[error("error in state invariants {0}")]
    StateInvariant(#[from] StateInvariantError),
}

impl LedgerError {
    /// True when a debit would have driven a balance below zero
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, LedgerError::LedgerState(LedgerStateError::InsufficientBalance { .. }))
    }

    /// True when a spender asked for more than its remaining allowance
    pub fn is_insufficient_allowance(&self) -> bool {
        matches!(self, LedgerError::LedgerState(LedgerStateError::InsufficientAllowance { .. }))
    }
}

impl From<&LedgerError> for ExitCode {
    fn from(error: &LedgerError) -> Self {
        match error {
            LedgerError::InvalidInitialization { reason: _ }
            | LedgerError::InvalidAmount { name: _, amount: _ } => ExitCode::USR_ILLEGAL_ARGUMENT,
            LedgerError::StateInvariant(_) => ExitCode::USR_ILLEGAL_STATE,
            LedgerError::LedgerState(state_error) => match state_error {
                LedgerStateError::IpldHamt(_) => ExitCode::USR_SERIALIZATION,
                LedgerStateError::NegativeBalance { amount: _, owner: _ }
                | LedgerStateError::NegativeAllowance { amount: _, owner: _, spender: _ } => {
                    ExitCode::USR_ILLEGAL_ARGUMENT
                }
                LedgerStateError::InsufficientBalance { owner: _, balance: _, delta: _ }
                | LedgerStateError::InsufficientAllowance {
                    owner: _,
                    spender: _,
                    allowance: _,
                    delta: _,
                } => ExitCode::USR_INSUFFICIENT_FUNDS,
            },
        }
    }
}
