use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::Address;

use super::types::{
    AllowanceReturn, ApproveParams, ApproveReturn, BalanceReturn, DecimalsReturn,
    DecreaseAllowanceParams, DecreaseAllowanceReturn, FungibleToken, GetAllowanceParams,
    IncreaseAllowanceParams, IncreaseAllowanceReturn, RevokeAllowanceParams,
    RevokeAllowanceReturn, TotalSupplyReturn, TransferFromParams, TransferFromReturn,
    TransferParams, TransferReturn,
};
use super::{Ledger, LedgerError};

/// A ledger bound to the caller of the current operation
///
/// The host is responsible for authenticating the caller before constructing a handle. The handle
/// marshals the parameter structs and passes them, together with the caller, to the ledger.
pub struct TokenHandle<'l, BS>
where
    BS: Blockstore,
{
    ledger: &'l mut Ledger<BS>,
    caller: Address,
}

impl<'l, BS> TokenHandle<'l, BS>
where
    BS: Blockstore,
{
    pub fn new(ledger: &'l mut Ledger<BS>, caller: Address) -> Self {
        Self { ledger, caller }
    }

    pub fn caller(&self) -> &Address {
        &self.caller
    }

    pub fn ledger(&self) -> &Ledger<BS> {
        &*self.ledger
    }
}

impl<'l, BS> FungibleToken for TokenHandle<'l, BS>
where
    BS: Blockstore,
{
    type TokenError = LedgerError;

    fn name(&self) -> String {
        self.ledger.name().to_owned()
    }

    fn symbol(&self) -> String {
        self.ledger.symbol().to_owned()
    }

    fn decimals(&self) -> DecimalsReturn {
        self.ledger.decimals()
    }

    fn total_supply(&mut self) -> TotalSupplyReturn {
        self.ledger.total_supply()
    }

    fn balance_of(&mut self, params: Address) -> Result<BalanceReturn, LedgerError> {
        self.ledger.balance_of(&params)
    }

    fn allowance(&mut self, params: GetAllowanceParams) -> Result<AllowanceReturn, LedgerError> {
        self.ledger.allowance(&params.owner, &params.spender)
    }

    fn transfer(&mut self, params: TransferParams) -> Result<TransferReturn, LedgerError> {
        self.ledger.transfer(&self.caller, &params.to, &params.amount)
    }

    fn approve(&mut self, params: ApproveParams) -> Result<ApproveReturn, LedgerError> {
        self.ledger.approve(&self.caller, &params.spender, &params.amount)
    }

    fn transfer_from(
        &mut self,
        params: TransferFromParams,
    ) -> Result<TransferFromReturn, LedgerError> {
        self.ledger.transfer_from(&self.caller, &params.from, &params.to, &params.amount)
    }

    fn increase_allowance(
        &mut self,
        params: IncreaseAllowanceParams,
    ) -> Result<IncreaseAllowanceReturn, LedgerError> {
        self.ledger.increase_allowance(&self.caller, &params.spender, &params.increase)
    }

    fn decrease_allowance(
        &mut self,
        params: DecreaseAllowanceParams,
    ) -> Result<DecreaseAllowanceReturn, LedgerError> {
        self.ledger.decrease_allowance(&self.caller, &params.spender, &params.decrease)
    }

    fn revoke_allowance(
        &mut self,
        params: RevokeAllowanceParams,
    ) -> Result<RevokeAllowanceReturn, LedgerError> {
        self.ledger.revoke_allowance(&self.caller, &params.spender)
    }
}
