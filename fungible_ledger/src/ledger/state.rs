use std::collections::HashMap;
use std::ops::Neg;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_hamt::Hamt;
use fvm_ipld_hamt::{BytesKey, Error as HamtError};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use num_traits::Zero;
use thiserror::Error;
use tracing::trace;

/// Bit width of the balance and allowance Hamts when none is configured. Small maps stay shallow
/// with a narrow fan-out, larger holder sets may prefer a wider one.
pub const DEFAULT_HAMT_BIT_WIDTH: u32 = 3;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("ipld hamt error: {0}")]
    IpldHamt(#[from] HamtError),
    #[error(
        "negative balance caused by decreasing {owner:?}'s balance of {balance:?} by {delta:?}"
    )]
    InsufficientBalance { owner: Address, balance: TokenAmount, delta: TokenAmount },
    #[error(
        "{spender:?} attempted to utilise {delta:?} of allowance {allowance:?} set by {owner:?}"
    )]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: TokenAmount,
        delta: TokenAmount,
    },
    #[error("allowance cannot be negative, cannot set allowance between {owner:?} and {spender:?} to {amount:?}")]
    NegativeAllowance { amount: TokenAmount, owner: Address, spender: Address },
    #[error("balance cannot be negative, cannot set balance of {owner:?} to {amount:?}")]
    NegativeBalance { amount: TokenAmount, owner: Address },
}

#[derive(Error, Debug)]
pub enum StateInvariantError {
    #[error("total supply was negative: {0:?}")]
    SupplyNegative(TokenAmount),
    #[error("the account for {account:?} had a negative balance of {balance:?}")]
    BalanceNegative { account: Address, balance: TokenAmount },
    #[error("the total supply {supply:?} does not match the sum of all balances {balance_sum:?}")]
    BalanceSupplyMismatch { supply: TokenAmount, balance_sum: TokenAmount },
    #[error(
        "a negative allowance of {allowance:?} was specified between {owner:?} and {spender:?}"
    )]
    NegativeAllowance { owner: Address, spender: Address, allowance: TokenAmount },
    #[error("stored a zero balance which should have been removed for {0}")]
    ExplicitZeroBalance(Address),
    #[error(
        "stored a zero allowance which should have been removed between {owner:?} and {spender:?}"
    )]
    ExplicitZeroAllowance { owner: Address, spender: Address },
    #[error("stored an allowance map for {0} though they have specified no allowances")]
    ExplicitEmptyAllowance(Address),
    #[error("stored key {0:?} does not decode to an address")]
    InvalidKey(BytesKey),
    #[error("underlying state error {0}")]
    State(#[from] StateError),
}

type Result<T> = std::result::Result<T, StateError>;

type Map<'bs, BS, K, V> = Hamt<&'bs BS, V, K>;
type BalanceMap<'bs, BS> = Map<'bs, BS, BytesKey, TokenAmount>;
type AllowanceMap<'bs, BS> = Map<'bs, BS, BytesKey, Cid>;
type OwnerAllowanceMap<'bs, BS> = Map<'bs, BS, BytesKey, TokenAmount>;

/// Ledger state IPLD structure
///
/// Only the Hamt roots are held here, so cloning the state is cheap and a clone can be mutated
/// speculatively without touching the committed roots.
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct LedgerState {
    /// Total supply of the token, fixed once the ledger is created
    pub supply: TokenAmount,
    /// Map<Address, TokenAmount> of balances as a Hamt
    pub balances: Cid,
    /// Map<Address, Map<Address, TokenAmount>> as a Hamt. Allowances are stored
    /// allowances[owner][spender]
    pub allowances: Cid,
    /// Bit-width to use when loading Hamts
    hamt_bit_width: u32,
}

/// An abstraction over the IPLD layer to get and modify ledger state without dealing with HAMTs.
///
/// This layer does not enforce protocol level rules such as requiring an approval before a
/// delegated transfer; that is left to the caller. It does refuse to store negative balances and
/// allowances, and it never stores zero entries.
impl LedgerState {
    /// Create a new, empty state tree
    pub fn new<BS: Blockstore>(store: &BS) -> Result<Self> {
        Self::new_with_bit_width(store, DEFAULT_HAMT_BIT_WIDTH)
    }

    /// Create a new, empty state tree with an explicit Hamt bit width
    ///
    /// Caller must ensure 1 <= hamt_bit_width <= 8.
    pub fn new_with_bit_width<BS: Blockstore>(store: &BS, hamt_bit_width: u32) -> Result<Self> {
        // the blockstore is still needed to create valid Cids for the empty Hamts
        let empty_balance_map = BalanceMap::new_with_bit_width(store, hamt_bit_width).flush()?;
        let empty_allowances_map =
            AllowanceMap::new_with_bit_width(store, hamt_bit_width).flush()?;

        Ok(Self {
            supply: Default::default(),
            balances: empty_balance_map,
            allowances: empty_allowances_map,
            hamt_bit_width,
        })
    }

    pub fn hamt_bit_width(&self) -> u32 {
        self.hamt_bit_width
    }

    /// Get the balance of an account from the current state
    pub fn get_balance<BS: Blockstore>(&self, bs: &BS, owner: &Address) -> Result<TokenAmount> {
        let balances = self.get_balance_map(bs)?;

        let balance = match balances.get(&address_key(owner))? {
            Some(amount) => amount.clone(),
            None => TokenAmount::zero(),
        };

        trace!(%owner, ?balance, "read balance");
        Ok(balance)
    }

    /// Changes the balance of the specified account by the delta
    ///
    /// Caller must ensure that the sign of the delta is consistent with ledger rules. Returns the
    /// new balance of the account.
    pub fn change_balance_by<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: &Address,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        if delta.is_zero() {
            return self.get_balance(bs, owner);
        }

        let mut balance_map = self.get_balance_map(bs)?;
        let owner_key = address_key(owner);
        let balance = match balance_map.get(&owner_key)? {
            Some(amount) => amount.clone(),
            None => TokenAmount::zero(),
        };

        let new_balance = &balance + delta;
        if new_balance.is_negative() {
            return Err(StateError::InsufficientBalance {
                owner: *owner,
                balance,
                delta: delta.clone(),
            });
        }

        if new_balance.is_zero() {
            balance_map.delete(&owner_key)?;
        } else {
            balance_map.set(owner_key, new_balance.clone())?;
        }

        self.balances = balance_map.flush()?;

        Ok(new_balance)
    }

    /// Checks that the owner can cover a debit of `amount` without writing anything
    ///
    /// Returns the current balance.
    pub fn check_balance<BS: Blockstore>(
        &self,
        bs: &BS,
        owner: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        let balance = self.get_balance(bs, owner)?;
        if balance.lt(amount) {
            return Err(StateError::InsufficientBalance {
                owner: *owner,
                balance,
                delta: amount.neg(),
            });
        }
        Ok(balance)
    }

    /// Set the balance of the account returning the old balance
    pub fn set_balance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: &Address,
        new_balance: &TokenAmount,
    ) -> Result<TokenAmount> {
        if new_balance.is_negative() {
            return Err(StateError::NegativeBalance { amount: new_balance.clone(), owner: *owner });
        }

        let mut balance_map = self.get_balance_map(bs)?;
        let owner_key = address_key(owner);
        let old_balance = match balance_map.get(&owner_key)? {
            Some(amount) => amount.clone(),
            None => TokenAmount::zero(),
        };

        if new_balance.is_zero() {
            balance_map.delete(&owner_key)?;
        } else {
            balance_map.set(owner_key, new_balance.clone())?;
        }

        self.balances = balance_map.flush()?;
        Ok(old_balance)
    }

    /// Retrieve the balance map as a HAMT
    pub fn get_balance_map<'bs, BS: Blockstore>(&self, bs: &'bs BS) -> Result<BalanceMap<'bs, BS>> {
        Ok(BalanceMap::load_with_bit_width(&self.balances, bs, self.hamt_bit_width)?)
    }

    /// Retrieve the number of accounts holding a non-zero balance
    ///
    /// This involves iterating through the entire HAMT
    pub fn count_balances<BS: Blockstore>(&self, bs: &BS) -> Result<usize> {
        let balance_map = self.get_balance_map(bs)?;
        let mut count = 0;
        balance_map.for_each(|_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    /// Get the allowance that an owner has approved for a spender
    ///
    /// If an existing allowance cannot be found, it is implicitly assumed to be zero
    pub fn get_allowance_between<BS: Blockstore>(
        &self,
        bs: &BS,
        owner: &Address,
        spender: &Address,
    ) -> Result<TokenAmount> {
        let allowance = match self.get_owner_allowance_map(bs, owner)? {
            Some(map) => match map.get(&address_key(spender))? {
                Some(allowance) => allowance.clone(),
                None => TokenAmount::zero(),
            },
            None => TokenAmount::zero(),
        };

        trace!(%owner, %spender, ?allowance, "read allowance");
        Ok(allowance)
    }

    /// Change the allowance between owner and spender by the specified delta
    ///
    /// The resulting allowance is clamped at zero. Returns the new allowance.
    pub fn change_allowance_by<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: &Address,
        spender: &Address,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        if delta.is_zero() {
            return self.get_allowance_between(bs, owner, spender);
        }

        let mut root_allowances_map = self.get_allowances_map(bs)?;

        // get or create the owner's allowance map
        let owner_key = address_key(owner);
        let mut allowance_map = match root_allowances_map.get(&owner_key)? {
            Some(cid) => OwnerAllowanceMap::load_with_bit_width(cid, bs, self.hamt_bit_width)?,
            None => {
                // no allowances and a negative delta is a no-op
                if delta.is_negative() {
                    return Ok(TokenAmount::zero());
                }
                OwnerAllowanceMap::new_with_bit_width(bs, self.hamt_bit_width)
            }
        };

        let spender_key = address_key(spender);
        let new_allowance = match allowance_map.get(&spender_key)? {
            Some(existing_allowance) => existing_allowance + delta,
            None => delta.clone(),
        }
        .max(TokenAmount::zero());

        if new_allowance.is_zero() {
            allowance_map.delete(&spender_key)?;
        } else {
            allowance_map.set(spender_key, new_allowance.clone())?;
        }

        // empty owner maps are dropped from the root
        if allowance_map.is_empty() {
            root_allowances_map.delete(&owner_key)?;
        } else {
            root_allowances_map.set(owner_key, allowance_map.flush()?)?;
        }

        self.allowances = root_allowances_map.flush()?;

        Ok(new_allowance)
    }

    /// Revokes an approved allowance by removing the entry from the owner-spender map
    ///
    /// If that map becomes empty, it is removed from the root map. Returns the old allowance
    pub fn revoke_allowance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: &Address,
        spender: &Address,
    ) -> Result<TokenAmount> {
        let mut map = match self.get_owner_allowance_map(bs, owner)? {
            Some(map) => map,
            // nothing approved, nothing to revoke
            None => return Ok(TokenAmount::zero()),
        };

        let old_allowance = match map.delete(&address_key(spender))? {
            Some((_, amount)) => amount,
            None => TokenAmount::zero(),
        };

        let owner_key = address_key(owner);
        let mut root_allowances_map = self.get_allowances_map(bs)?;
        if map.is_empty() {
            root_allowances_map.delete(&owner_key)?;
        } else {
            root_allowances_map.set(owner_key, map.flush()?)?;
        }
        self.allowances = root_allowances_map.flush()?;

        Ok(old_allowance)
    }

    /// Set the allowance between owner and spender to a specific amount, returning the old
    /// allowance
    pub fn set_allowance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: &Address,
        spender: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        if amount.is_negative() {
            return Err(StateError::NegativeAllowance {
                owner: *owner,
                spender: *spender,
                amount: amount.clone(),
            });
        }

        if amount.is_zero() {
            return self.revoke_allowance(bs, owner, spender);
        }

        let mut root_allowances_map = self.get_allowances_map(bs)?;

        let owner_key = address_key(owner);
        let mut allowance_map = match root_allowances_map.get(&owner_key)? {
            Some(cid) => OwnerAllowanceMap::load_with_bit_width(cid, bs, self.hamt_bit_width)?,
            None => OwnerAllowanceMap::new_with_bit_width(bs, self.hamt_bit_width),
        };

        let old_allowance =
            allowance_map.set(address_key(spender), amount.clone())?.unwrap_or_default();

        root_allowances_map.set(owner_key, allowance_map.flush()?)?;
        self.allowances = root_allowances_map.flush()?;

        Ok(old_allowance)
    }

    /// Checks that the amount fits within the allowance and deducts it if so
    ///
    /// Returns the new allowance if successful, else returns an error and the allowance is
    /// unchanged. A zero amount always fits.
    pub fn attempt_use_allowance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        spender: &Address,
        owner: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        let current_allowance = self.check_allowance(bs, spender, owner, amount)?;

        if amount.is_zero() {
            return Ok(current_allowance);
        }

        self.change_allowance_by(bs, owner, spender, &amount.neg())
    }

    /// Checks that the amount fits within the allowance without writing anything
    ///
    /// Returns the current allowance. A zero amount always fits.
    pub fn check_allowance<BS: Blockstore>(
        &self,
        bs: &BS,
        spender: &Address,
        owner: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        let current_allowance = self.get_allowance_between(bs, owner, spender)?;

        if !amount.is_zero() && current_allowance.lt(amount) {
            return Err(StateError::InsufficientAllowance {
                owner: *owner,
                spender: *spender,
                allowance: current_allowance,
                delta: amount.clone(),
            });
        }

        Ok(current_allowance)
    }

    /// Get the allowances map of a specific owner, resolving the CID link to a Hamt
    ///
    /// Ok(None) if the owner has no current non-zero allowances to other accounts
    pub fn get_owner_allowance_map<'bs, BS: Blockstore>(
        &self,
        bs: &'bs BS,
        owner: &Address,
    ) -> Result<Option<OwnerAllowanceMap<'bs, BS>>> {
        let allowances_map = self.get_allowances_map(bs)?;
        let owner_allowances = match allowances_map.get(&address_key(owner))? {
            Some(cid) => {
                Some(OwnerAllowanceMap::load_with_bit_width(cid, bs, self.hamt_bit_width)?)
            }
            None => None,
        };
        Ok(owner_allowances)
    }

    /// Get the root allowances map, a HAMT of CIDs linking to the per-owner HAMTs
    pub fn get_allowances_map<'bs, BS: Blockstore>(
        &self,
        bs: &'bs BS,
    ) -> Result<AllowanceMap<'bs, BS>> {
        Ok(AllowanceMap::load_with_bit_width(&self.allowances, bs, self.hamt_bit_width)?)
    }

    /// Copies the live balance and allowance entries into another blockstore
    ///
    /// Each Hamt is rebuilt in memory and flushed once, so the destination only receives the
    /// blocks reachable from the returned roots. The roots are identical to the source roots.
    pub fn copy_to<BS: Blockstore, DS: Blockstore>(&self, bs: &BS, dest: &DS) -> Result<Self> {
        let mut balances = BalanceMap::new_with_bit_width(dest, self.hamt_bit_width);
        self.get_balance_map(bs)?.for_each(|owner_key, balance| {
            balances.set(owner_key.clone(), balance.clone())?;
            Ok(())
        })?;

        let mut allowances = AllowanceMap::new_with_bit_width(dest, self.hamt_bit_width);
        self.get_allowances_map(bs)?.for_each(|owner_key, owner_root| {
            let source =
                OwnerAllowanceMap::load_with_bit_width(owner_root, bs, self.hamt_bit_width)?;
            let mut owner_map = OwnerAllowanceMap::new_with_bit_width(dest, self.hamt_bit_width);
            source.for_each(|spender_key, allowance| {
                owner_map.set(spender_key.clone(), allowance.clone())?;
                Ok(())
            })?;
            allowances.set(owner_key.clone(), owner_map.flush()?)?;
            Ok(())
        })?;

        Ok(Self {
            supply: self.supply.clone(),
            balances: balances.flush()?,
            allowances: allowances.flush()?,
            hamt_bit_width: self.hamt_bit_width,
        })
    }

    /// Checks that the current state obeys all ledger invariants
    ///
    /// Balances and allowances must be non-negative, zero entries and empty owner maps must not be
    /// stored, every key must decode to an address and the balances must sum to the total supply.
    ///
    /// Every violation found is reported, alongside a summary that can be used to check
    /// application specific invariants.
    pub fn check_invariants<BS: Blockstore>(
        &self,
        bs: &BS,
    ) -> (StateSummary, Vec<StateInvariantError>) {
        let mut errors = vec![];

        if self.supply.is_negative() {
            errors.push(StateInvariantError::SupplyNegative(self.supply.clone()));
        }

        let balance_map = self.check_balances(bs, &mut errors);
        let allowance_map = self.check_allowances(bs, &mut errors);

        (StateSummary { balance_map, allowance_map, total_supply: self.supply.clone() }, errors)
    }

    fn check_balances<BS: Blockstore>(
        &self,
        bs: &BS,
        errors: &mut Vec<StateInvariantError>,
    ) -> Option<HashMap<Address, TokenAmount>> {
        let balances = match self.get_balance_map(bs) {
            Ok(map) => map,
            Err(e) => {
                errors.push(e.into());
                return None;
            }
        };

        let mut balance_sum = TokenAmount::zero();
        let mut balance_map = HashMap::new();
        let res = balances.for_each(|owner_key, balance| {
            let owner = match decode_address(owner_key) {
                Some(owner) => owner,
                None => {
                    errors.push(StateInvariantError::InvalidKey(owner_key.clone()));
                    return Ok(());
                }
            };
            if balance.is_negative() {
                errors.push(StateInvariantError::BalanceNegative {
                    account: owner,
                    balance: balance.clone(),
                });
            }
            if balance.is_zero() {
                errors.push(StateInvariantError::ExplicitZeroBalance(owner));
            }

            balance_sum = &balance_sum + balance;
            balance_map.insert(owner, balance.clone());
            Ok(())
        });

        if let Err(e) = res {
            errors.push(StateError::from(e).into());
            return None;
        }

        if balance_sum != self.supply {
            errors.push(StateInvariantError::BalanceSupplyMismatch {
                supply: self.supply.clone(),
                balance_sum,
            });
        }

        Some(balance_map)
    }

    fn check_allowances<BS: Blockstore>(
        &self,
        bs: &BS,
        errors: &mut Vec<StateInvariantError>,
    ) -> Option<HashMap<Address, HashMap<Address, TokenAmount>>> {
        let allowances = match self.get_allowances_map(bs) {
            Ok(map) => map,
            Err(e) => {
                errors.push(e.into());
                return None;
            }
        };

        let mut allowance_map = HashMap::new();
        let res = allowances.for_each(|owner_key, owner_root| {
            let owner = match decode_address(owner_key) {
                Some(owner) => owner,
                None => {
                    errors.push(StateInvariantError::InvalidKey(owner_key.clone()));
                    return Ok(());
                }
            };

            let owner_map =
                OwnerAllowanceMap::load_with_bit_width(owner_root, bs, self.hamt_bit_width)?;
            if owner_map.is_empty() {
                errors.push(StateInvariantError::ExplicitEmptyAllowance(owner));
            }

            let mut spenders = HashMap::new();
            owner_map.for_each(|spender_key, allowance| {
                let spender = match decode_address(spender_key) {
                    Some(spender) => spender,
                    None => {
                        errors.push(StateInvariantError::InvalidKey(spender_key.clone()));
                        return Ok(());
                    }
                };
                if allowance.is_negative() {
                    errors.push(StateInvariantError::NegativeAllowance {
                        owner,
                        spender,
                        allowance: allowance.clone(),
                    });
                }
                if allowance.is_zero() {
                    errors.push(StateInvariantError::ExplicitZeroAllowance { owner, spender });
                }
                spenders.insert(spender, allowance.clone());
                Ok(())
            })?;

            allowance_map.insert(owner, spenders);
            Ok(())
        });

        if let Err(e) = res {
            errors.push(StateError::from(e).into());
            return None;
        }

        Some(allowance_map)
    }
}

pub fn address_key(a: &Address) -> BytesKey {
    a.to_bytes().into()
}

pub fn decode_address(key: &BytesKey) -> Option<Address> {
    Address::from_bytes(&key.0).ok()
}

/// A decoded snapshot of the ledger state, for checking application specific invariants
///
/// The maps are `None` when the underlying Hamt could not be traversed.
#[derive(Clone, Debug)]
pub struct StateSummary {
    pub balance_map: Option<HashMap<Address, TokenAmount>>,
    pub allowance_map: Option<HashMap<Address, HashMap<Address, TokenAmount>>>,
    pub total_supply: TokenAmount,
}
