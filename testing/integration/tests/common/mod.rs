use fungible_ledger::{Ledger, LedgerConfig, LedgerError};
use fvm_ipld_blockstore::{Blockstore, MemoryBlockstore};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;

pub const A: &Address = &Address::new_id(1001);
pub const B: &Address = &Address::new_id(1002);
pub const C: &Address = &Address::new_id(1003);

/// Shorthand for whole-unit amounts of a token with zero decimals
pub fn tokens(amount: i64) -> TokenAmount {
    TokenAmount::from_atto(amount)
}

/// The reference token: 100 units held by A, named "Fun Token" with symbol "FUN"
pub fn fun_token() -> Ledger<MemoryBlockstore> {
    Ledger::create(
        MemoryBlockstore::default(),
        A,
        &tokens(100),
        LedgerConfig::new("Fun Token", "FUN", 0),
    )
    .unwrap()
}

/// Assertions over a ledger that keep scenario tests short
pub trait LedgerHelper {
    /// Check the balance of an address
    fn assert_balance(&self, owner: &Address, expected: TokenAmount);

    /// Check the remaining allowance between an owner and a spender
    fn assert_allowance(&self, owner: &Address, spender: &Address, expected: TokenAmount);

    /// Check that every invariant holds and the balances add up to the supply
    fn assert_consistent(&self);
}

impl<BS: Blockstore> LedgerHelper for Ledger<BS> {
    fn assert_balance(&self, owner: &Address, expected: TokenAmount) {
        let balance = self.balance_of(owner).unwrap();
        assert_eq!(balance, expected, "unexpected balance for {owner}");
    }

    fn assert_allowance(&self, owner: &Address, spender: &Address, expected: TokenAmount) {
        let allowance = self.allowance(owner, spender).unwrap();
        assert_eq!(allowance, expected, "unexpected allowance of {spender} over {owner}");
    }

    fn assert_consistent(&self) {
        let summary = match self.assert_invariants() {
            Ok(summary) => summary,
            Err(errors) => panic!("invariants violated: {errors:#?}"),
        };
        let total = summary
            .balance_map
            .unwrap_or_default()
            .values()
            .fold(TokenAmount::from_atto(0), |acc, balance| acc + balance.clone());
        assert_eq!(total, self.total_supply());
    }
}

/// Check that an error is the rejection a host would see as `expected`
#[allow(dead_code)]
pub fn assert_rejected(err: &LedgerError, expected: ExitCode) {
    assert_eq!(ExitCode::from(err), expected, "unexpected rejection: {err}");
}
