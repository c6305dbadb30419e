use std::thread;

use fungible_ledger::ledger::types::{FungibleToken, TransferParams};
use fungible_ledger::SharedLedger;
use fvm_shared::address::Address;

mod common;
use common::{fun_token, tokens, LedgerHelper, A, B, C};

/// Many callers race to spend the same allowance and balance; every unit is accounted for
#[test]
fn it_never_overspends_a_shared_allowance() {
    let ledger = SharedLedger::new(fun_token());
    ledger.approve(A, B, &tokens(60)).unwrap();

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                let mut moved = 0i64;
                for _ in 0..20 {
                    match ledger.transfer_from(B, A, C, &tokens(1)) {
                        Ok(_) => moved += 1,
                        Err(err) => assert!(err.is_insufficient_allowance(), "{err:?}"),
                    }
                }
                moved
            })
        })
        .collect();
    let moved: i64 = workers.into_iter().map(|w| w.join().unwrap()).sum();

    assert_eq!(moved, 60);
    let ledger = ledger.into_inner().unwrap();
    ledger.assert_balance(A, tokens(40));
    ledger.assert_balance(C, tokens(60));
    ledger.assert_allowance(A, B, tokens(0));
    ledger.assert_consistent();
}

/// Holders pass tokens around a ring while the owner keeps draining its own balance
#[test]
fn it_keeps_balances_consistent_across_threads() {
    let ring = [*A, *B, *C, Address::new_id(1004)];
    let ledger = SharedLedger::new(fun_token());

    let workers: Vec<_> = ring
        .iter()
        .enumerate()
        .map(|(i, caller)| {
            let ledger = ledger.clone();
            let caller = *caller;
            let next = ring[(i + 1) % ring.len()];
            thread::spawn(move || {
                for _ in 0..50 {
                    let res = ledger.handle(caller, |handle| {
                        handle.transfer(TransferParams { to: next, amount: tokens(3) })
                    });
                    if let Err(err) = res {
                        assert!(err.is_insufficient_balance(), "{err:?}");
                    }
                    // observers never see a partially applied transfer
                    let total = ledger.with_ledger(|ledger| {
                        ring.iter().fold(tokens(0), |acc, owner| {
                            acc + ledger.balance_of(owner).unwrap()
                        })
                    });
                    assert_eq!(total, tokens(100));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(!ledger.total_supply().is_zero());
    let summary = ledger.assert_invariants().unwrap();
    assert_eq!(summary.total_supply, tokens(100));
}
