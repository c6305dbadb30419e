use std::sync::Arc;

use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use parking_lot::Mutex;

use crate::ledger::state::{StateInvariantError, StateSummary};
use crate::ledger::types::{TransferFromReturn, TransferReturn};
use crate::ledger::{Ledger, LedgerError, TokenHandle};

type Result<T> = std::result::Result<T, LedgerError>;

/// A shared, thread-safe wrapper around a [`Ledger`].
///
/// Clones reference the same ledger. Each call holds one lock for its whole check-and-mutate
/// sequence, so operations from different threads are applied one at a time.
pub struct SharedLedger<BS>
where
    BS: Blockstore,
{
    inner: Arc<Mutex<Ledger<BS>>>,
}

impl<BS> Clone for SharedLedger<BS>
where
    BS: Blockstore,
{
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<BS> From<Ledger<BS>> for SharedLedger<BS>
where
    BS: Blockstore,
{
    fn from(ledger: Ledger<BS>) -> Self {
        Self::new(ledger)
    }
}

impl<BS> SharedLedger<BS>
where
    BS: Blockstore,
{
    pub fn new(ledger: Ledger<BS>) -> Self {
        Self { inner: Arc::new(Mutex::new(ledger)) }
    }

    /// Runs a sequence of ledger calls under a single lock
    pub fn with_ledger<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Ledger<BS>) -> R,
    {
        let mut ledger = self.inner.lock();
        f(&mut ledger)
    }

    /// Runs a closure against a handle bound to `caller`, under a single lock
    pub fn handle<F, R>(&self, caller: Address, f: F) -> R
    where
        F: FnOnce(&mut TokenHandle<'_, BS>) -> R,
    {
        self.with_ledger(|ledger| f(&mut ledger.handle(caller)))
    }

    /// Recovers the ledger once this is the last reference to it
    pub fn into_inner(self) -> Option<Ledger<BS>> {
        Arc::try_unwrap(self.inner).ok().map(Mutex::into_inner)
    }

    pub fn total_supply(&self) -> TokenAmount {
        self.inner.lock().total_supply()
    }

    pub fn balance_of(&self, owner: &Address) -> Result<TokenAmount> {
        self.inner.lock().balance_of(owner)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        self.inner.lock().allowance(owner, spender)
    }

    pub fn transfer(
        &self,
        from: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferReturn> {
        self.inner.lock().transfer(from, to, amount)
    }

    pub fn approve(
        &self,
        owner: &Address,
        spender: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        self.inner.lock().approve(owner, spender, amount)
    }

    pub fn transfer_from(
        &self,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferFromReturn> {
        self.inner.lock().transfer_from(spender, owner, to, amount)
    }

    pub fn increase_allowance(
        &self,
        owner: &Address,
        spender: &Address,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        self.inner.lock().increase_allowance(owner, spender, delta)
    }

    pub fn decrease_allowance(
        &self,
        owner: &Address,
        spender: &Address,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        self.inner.lock().decrease_allowance(owner, spender, delta)
    }

    pub fn revoke_allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        self.inner.lock().revoke_allowance(owner, spender)
    }

    pub fn assert_invariants(&self) -> std::result::Result<StateSummary, Vec<StateInvariantError>> {
        self.inner.lock().assert_invariants()
    }
}
