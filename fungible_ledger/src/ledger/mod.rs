use std::ops::Neg;

use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use tracing::debug;

use self::state::{LedgerState, StateInvariantError, StateSummary};
use self::types::{TransferFromReturn, TransferReturn};
use crate::config::LedgerConfig;

mod error;
mod handle;
pub mod state;
pub mod types;

pub use error::LedgerError;
pub use handle::TokenHandle;

type Result<T> = std::result::Result<T, LedgerError>;

/// A single-asset fungible token ledger
///
/// Owns the balance and allowance state together with the blockstore backing it. Every mutating
/// operation validates its arguments up front and then runs as one transaction: either all of its
/// changes become visible or none do.
pub struct Ledger<BS>
where
    BS: Blockstore,
{
    /// Blockstore holding the balance and allowance Hamts
    bs: BS,
    /// Committed ledger state
    state: LedgerState,
    /// Immutable descriptive metadata
    config: LedgerConfig,
}

impl<BS> Ledger<BS>
where
    BS: Blockstore,
{
    /// Creates a ledger crediting the entire supply to the initial owner
    ///
    /// Fails with [`LedgerError::InvalidInitialization`] if the supply is negative or the config
    /// is invalid.
    pub fn create(
        bs: BS,
        initial_owner: &Address,
        total_supply: &TokenAmount,
        config: LedgerConfig,
    ) -> Result<Self> {
        config.validate()?;
        if total_supply.is_negative() {
            return Err(LedgerError::InvalidInitialization {
                reason: format!("total supply {total_supply:?} must be non-negative"),
            });
        }

        let mut state = LedgerState::new_with_bit_width(&bs, config.hamt_bit_width)?;
        state.set_balance(&bs, initial_owner, total_supply)?;
        state.supply = total_supply.clone();

        debug!(
            name = %config.name,
            symbol = %config.symbol,
            decimals = config.decimals,
            owner = %initial_owner,
            supply = ?total_supply,
            "created ledger"
        );

        Ok(Self { bs, state, config })
    }

    /// Get a reference to the committed state tree
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Get a reference to the underlying blockstore
    pub fn store(&self) -> &BS {
        &self.bs
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Binds the ledger to an authenticated caller, exposing the [`types::FungibleToken`]
    /// interface
    pub fn handle(&mut self, caller: Address) -> TokenHandle<'_, BS> {
        TokenHandle::new(self, caller)
    }

    /// Opens an atomic transaction on LedgerState which allows a closure to make multiple
    /// modifications to the state tree.
    ///
    /// If the closure returns an error, the transaction is dropped atomically and no change is
    /// observed on ledger state.
    fn transaction<F, Res>(&mut self, f: F) -> Result<Res>
    where
        F: FnOnce(&mut LedgerState, &BS) -> Result<Res>,
    {
        let mut mutable_state = self.state.clone();
        let res = f(&mut mutable_state, &self.bs)?;
        // if closure didn't error, commit state
        self.state = mutable_state;
        Ok(res)
    }
}

impl<BS> Ledger<BS>
where
    BS: Blockstore,
{
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.config.decimals
    }

    /// Gets the total number of tokens in existence
    ///
    /// Fixed at creation and always equal to the sum of `balance_of` over all addresses
    pub fn total_supply(&self) -> TokenAmount {
        self.state.supply.clone()
    }

    /// Returns the balance associated with a particular address
    ///
    /// Accounts that have never received tokens implicitly have a zero balance
    pub fn balance_of(&self, owner: &Address) -> Result<TokenAmount> {
        Ok(self.state.get_balance(&self.bs, owner)?)
    }

    /// Gets the allowance between owner and spender
    ///
    /// An allowance is the amount that the spender can transfer out of the owner's account via
    /// `transfer_from`.
    pub fn allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        Ok(self.state.get_allowance_between(&self.bs, owner, spender)?)
    }

    /// Number of accounts currently holding a non-zero balance
    pub fn holder_count(&self) -> Result<usize> {
        Ok(self.state.count_balances(&self.bs)?)
    }

    /// Transfers an amount from one address to another
    ///
    /// The debited address is the authority for this operation, so no allowance is consulted.
    ///
    /// - The requested value MUST be non-negative
    /// - The requested value MUST NOT exceed the sender's balance
    ///
    /// Upon successful transfer:
    /// - The from balance decreases by the requested value
    /// - The to balance increases by the requested value
    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferReturn> {
        let ret = validate_amount(amount, "transfer")
            .and_then(|amount| {
                self.transaction(|state, bs| {
                    let (from_balance, to_balance) = move_balance(state, bs, from, to, amount)?;
                    Ok(TransferReturn { from_balance, to_balance })
                })
            })
            .inspect_err(|err| debug!(%from, %to, ?amount, %err, "transfer rejected"))?;

        debug!(%from, %to, ?amount, "transfer");
        Ok(ret)
    }

    /// Sets the allowance between owner and spender to an absolute amount
    ///
    /// The previous allowance is overwritten, not added to. Returns the previous allowance.
    pub fn approve(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        let old_allowance = validate_amount(amount, "approve")
            .and_then(|amount| {
                self.transaction(|state, bs| Ok(state.set_allowance(bs, owner, spender, amount)?))
            })
            .inspect_err(|err| debug!(%owner, %spender, ?amount, %err, "approve rejected"))?;

        debug!(%owner, %spender, ?amount, ?old_allowance, "approve");
        Ok(old_allowance)
    }

    /// Transfers an amount out of the owner's balance on behalf of a spender
    ///
    /// - The requested value MUST be non-negative
    /// - The spender MUST have an allowance not less than the requested value
    /// - The requested value MUST NOT exceed the owner's balance
    ///
    /// The allowance is checked before the balance, so an unapproved spender always sees an
    /// insufficient allowance error. A rejected call writes no blocks.
    ///
    /// Upon successful transfer:
    /// - The owner balance decreases by the requested value
    /// - The to balance increases by the requested value
    /// - The owner-spender allowance decreases by the requested value
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferFromReturn> {
        let ret = validate_amount(amount, "transfer_from")
            .and_then(|amount| {
                self.transaction(|state, bs| {
                    // both preconditions are read before anything is written
                    state.check_allowance(bs, spender, owner, amount)?;
                    state.check_balance(bs, owner, amount)?;
                    let allowance = state.attempt_use_allowance(bs, spender, owner, amount)?;
                    let (from_balance, to_balance) = move_balance(state, bs, owner, to, amount)?;
                    Ok(TransferFromReturn { from_balance, to_balance, allowance })
                })
            })
            .inspect_err(|err| {
                debug!(%spender, %owner, %to, ?amount, %err, "transfer_from rejected")
            })?;

        debug!(%spender, %owner, %to, ?amount, remaining = ?ret.allowance, "transfer_from");
        Ok(ret)
    }

    /// Increase the allowance that a spender can control of an owner's balance by the requested
    /// delta
    ///
    /// Returns the new allowance
    pub fn increase_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        let new_allowance = validate_amount(delta, "increase allowance delta")
            .and_then(|delta| {
                self.transaction(|state, bs| {
                    Ok(state.change_allowance_by(bs, owner, spender, delta)?)
                })
            })
            .inspect_err(|err| {
                debug!(%owner, %spender, ?delta, %err, "increase_allowance rejected")
            })?;

        debug!(%owner, %spender, ?delta, ?new_allowance, "increase_allowance");
        Ok(new_allowance)
    }

    /// Decrease the allowance that a spender controls of the owner's balance by the requested
    /// delta
    ///
    /// If the resulting allowance would be negative, it is set to zero. Returns the new allowance
    pub fn decrease_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        let new_allowance = validate_amount(delta, "decrease allowance delta")
            .and_then(|delta| {
                self.transaction(|state, bs| {
                    Ok(state.change_allowance_by(bs, owner, spender, &delta.neg())?)
                })
            })
            .inspect_err(|err| {
                debug!(%owner, %spender, ?delta, %err, "decrease_allowance rejected")
            })?;

        debug!(%owner, %spender, ?delta, ?new_allowance, "decrease_allowance");
        Ok(new_allowance)
    }

    /// Sets the allowance between owner and spender to zero, returning the old allowance
    pub fn revoke_allowance(&mut self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        let old_allowance = self
            .transaction(|state, bs| Ok(state.revoke_allowance(bs, owner, spender)?))
            .inspect_err(|err| debug!(%owner, %spender, %err, "revoke_allowance rejected"))?;

        debug!(%owner, %spender, ?old_allowance, "revoke_allowance");
        Ok(old_allowance)
    }

    /// Copies the live state into a fresh blockstore, returning the compacted ledger
    ///
    /// Every committed mutation writes new Hamt blocks and superseded blocks are never removed
    /// from the store. Moving to a new store drops them.
    pub fn compact_into<DS: Blockstore>(&self, dest: DS) -> Result<Ledger<DS>> {
        let state = self.state.copy_to(&self.bs, &dest)?;
        debug!(supply = ?state.supply, "compacted ledger");
        Ok(Ledger { bs: dest, state, config: self.config.clone() })
    }

    /// Replaces the blockstore with a fresh one holding only the live state
    pub fn compact(&mut self) -> Result<()>
    where
        BS: Default,
    {
        let dest = BS::default();
        let state = self.state.copy_to(&self.bs, &dest)?;
        self.bs = dest;
        self.state = state;
        debug!(supply = ?self.state.supply, "compacted ledger");
        Ok(())
    }

    /// Checks the state invariants, throwing an error if they are not met
    pub fn assert_invariants(&self) -> std::result::Result<StateSummary, Vec<StateInvariantError>> {
        let (summary, errors) = self.check_invariants();
        match errors.is_empty() {
            true => Ok(summary),
            false => Err(errors),
        }
    }

    /// Checks the state invariants, returning a state summary and list of errors
    pub fn check_invariants(&self) -> (StateSummary, Vec<StateInvariantError>) {
        self.state.check_invariants(&self.bs)
    }
}

/// Debits `from` and credits `to` inside an open transaction, returning both new balances
///
/// A self-transfer leaves the balance untouched but must still not exceed it.
fn move_balance<BS: Blockstore>(
    state: &mut LedgerState,
    bs: &BS,
    from: &Address,
    to: &Address,
    amount: &TokenAmount,
) -> Result<(TokenAmount, TokenAmount)> {
    if from == to {
        let balance = state.check_balance(bs, from, amount)?;
        return Ok((balance.clone(), balance));
    }

    let from_balance = state.change_balance_by(bs, from, &amount.neg())?;
    let to_balance = state.change_balance_by(bs, to, amount)?;
    Ok((from_balance, to_balance))
}

/// Validates that a token amount or allowance is non-negative
///
/// Returns the argument, or an error.
pub fn validate_amount<'a>(a: &'a TokenAmount, name: &'static str) -> Result<&'a TokenAmount> {
    if a.is_negative() {
        return Err(LedgerError::InvalidAmount { name, amount: a.clone() });
    }
    Ok(a)
}
