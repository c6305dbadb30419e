use fvm_ipld_encoding::tuple::{Deserialize_tuple, Serialize_tuple};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;

/// The externally visible interface of a fungible token ledger.
///
/// Every mutating method acts on behalf of an authenticated caller supplied by the host: the caller
/// is the debited account for `transfer`, the owner for `approve` and the allowance adjusters, and
/// the spender for `transfer_from`. Hosts translate a returned error into their own rejection
/// mechanism, leaving state untouched.
pub trait FungibleToken {
    type TokenError;

    /// Returns the name of the token
    fn name(&self) -> String;

    /// Returns the ticker symbol of the token
    fn symbol(&self) -> String;

    /// Returns the number of decimals used for display purposes
    ///
    /// Amounts are always integers of the smallest unit; decimals never affect bookkeeping.
    fn decimals(&self) -> DecimalsReturn;

    /// Returns the total amount of the token in existence
    ///
    /// Fixed at creation and always equal to the sum of all balances.
    fn total_supply(&mut self) -> TotalSupplyReturn;

    /// Returns the balance of an address
    ///
    /// Balance is always non-negative. Unknown addresses have an implicit zero balance.
    fn balance_of(&mut self, params: Address) -> Result<BalanceReturn, Self::TokenError>;

    /// Returns the remaining amount a spender may move out of an owner's balance
    fn allowance(
        &mut self,
        params: GetAllowanceParams,
    ) -> Result<AllowanceReturn, Self::TokenError>;

    /// Transfers tokens from the caller to another address
    ///
    /// Amount must be non-negative (but can be zero). Transferring to the caller's own address is
    /// treated as a normal transfer with no net effect.
    fn transfer(&mut self, params: TransferParams) -> Result<TransferReturn, Self::TokenError>;

    /// Sets the amount a spender may move out of the caller's balance
    ///
    /// Overwrites any previous allowance rather than adding to it. Returns the previous
    /// allowance.
    fn approve(&mut self, params: ApproveParams) -> Result<ApproveReturn, Self::TokenError>;

    /// Transfers tokens from one address to another on behalf of the owner
    ///
    /// The caller must have previously been approved for at least the sent amount. If successful,
    /// the amount transferred is deducted from the caller's allowance.
    fn transfer_from(
        &mut self,
        params: TransferFromParams,
    ) -> Result<TransferFromReturn, Self::TokenError>;

    /// Atomically increases the allowance a spender has on the caller's balance
    ///
    /// Returns the new allowance.
    fn increase_allowance(
        &mut self,
        params: IncreaseAllowanceParams,
    ) -> Result<IncreaseAllowanceReturn, Self::TokenError>;

    /// Atomically decreases the allowance a spender has on the caller's balance
    ///
    /// Sets the allowance to zero if the decrease is greater than the current allowance. Returns
    /// the new allowance.
    fn decrease_allowance(
        &mut self,
        params: DecreaseAllowanceParams,
    ) -> Result<DecreaseAllowanceReturn, Self::TokenError>;

    /// Sets the allowance a spender has on the caller's balance to zero
    fn revoke_allowance(
        &mut self,
        params: RevokeAllowanceParams,
    ) -> Result<RevokeAllowanceReturn, Self::TokenError>;
}

pub type DecimalsReturn = u8;
pub type TotalSupplyReturn = TokenAmount;
pub type BalanceReturn = TokenAmount;
pub type AllowanceReturn = TokenAmount;
pub type ApproveReturn = TokenAmount;
pub type IncreaseAllowanceReturn = TokenAmount;
pub type DecreaseAllowanceReturn = TokenAmount;
pub type RevokeAllowanceReturn = TokenAmount;

/// Instruction to transfer tokens to another address
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct TransferParams {
    pub to: Address,
    /// A non-negative amount to transfer
    pub amount: TokenAmount,
}

/// Return value after a successful transfer
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct TransferReturn {
    /// The new balance of the `from` address
    pub from_balance: TokenAmount,
    /// The new balance of the `to` address
    pub to_balance: TokenAmount,
}

/// Instruction to transfer tokens between two addresses as a spender
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct TransferFromParams {
    pub from: Address,
    pub to: Address,
    /// A non-negative amount to transfer
    pub amount: TokenAmount,
}

/// Return value after a successful delegated transfer
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct TransferFromReturn {
    /// The new balance of the `from` address
    pub from_balance: TokenAmount,
    /// The new balance of the `to` address
    pub to_balance: TokenAmount,
    /// The remaining allowance between `from` and the spender (caller)
    pub allowance: TokenAmount,
}

/// Instruction to set an allowance to an absolute amount
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct ApproveParams {
    pub spender: Address,
    /// A non-negative allowance
    pub amount: TokenAmount,
}

/// Instruction to increase an allowance between two addresses
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct IncreaseAllowanceParams {
    pub spender: Address,
    /// A non-negative amount to increase the allowance by
    pub increase: TokenAmount,
}

/// Instruction to decrease an allowance between two addresses
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct DecreaseAllowanceParams {
    pub spender: Address,
    /// A non-negative amount to decrease the allowance by
    pub decrease: TokenAmount,
}

/// Instruction to revoke (set to 0) an allowance
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct RevokeAllowanceParams {
    pub spender: Address,
}

/// Params to get the allowance between two addresses
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct GetAllowanceParams {
    pub owner: Address,
    pub spender: Address,
}
