//! Races between settlement requests for the same point

mod common;

use std::sync::Arc;
use std::thread;

use common::{keys, pending, pool, UNIT};
use gravity_pool::{
    build_transfer, config::WITHDRAWAL_TIMELOCK_SECS, DepositRequest, FieldElement, Payout, PointNote,
    PoolError, SelectionSeed, SpendOutcome,
};

#[test]
fn test_concurrent_double_spend_single_winner() {
    let mut p = pool(8, 3, 11);
    let spender = p.notes[0].clone();
    let output = p.new_note();
    let request = p.transfer(&spender, &output);

    let gate = Arc::new(p.gate);
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let request = request.clone();
            thread::spawn(move || gate.spend(request))
        })
        .collect();
    let outcomes: Vec<SpendOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let committed = outcomes.iter().filter(|o| o.is_committed()).count();
    assert_eq!(committed, 1, "{:?}", outcomes);
    assert!(outcomes.contains(&SpendOutcome::Rejected(PoolError::AlreadySpent)));
    assert_eq!(gate.outstanding_points(), 8);
    assert_eq!(gate.collateral_held(), 8 * UNIT as u128);
}

#[test]
fn test_conflicting_spends_of_one_point() {
    let mut p = pool(8, 3, 12);
    let spender = p.notes[1].clone();
    let a = p.new_note();
    let b = p.new_note();
    let first = p.transfer(&spender, &a);
    let second = p.transfer(&spender, &b);

    let outcomes = thread::scope(|s| {
        let h1 = s.spawn(|| p.gate.spend(first));
        let h2 = s.spawn(|| p.gate.spend(second));
        [h1.join().unwrap(), h2.join().unwrap()]
    });

    assert_eq!(outcomes.iter().filter(|o| o.is_committed()).count(), 1, "{:?}", outcomes);
    let loser = outcomes.iter().find(|o| !o.is_committed()).unwrap();
    assert!(matches!(
        loser,
        SpendOutcome::Rejected(PoolError::LinkedSignature | PoolError::AlreadySpent)
    ));
    // exactly one of the outputs was minted
    let minted = [a.id(UNIT), b.id(UNIT)]
        .iter()
        .filter(|id| p.gate.point(id).is_some())
        .count();
    assert_eq!(minted, 1);
    p.assert_backed();
}

#[test]
fn test_batch_commits_in_order() {
    let mut p = pool(8, 3, 13);
    let (n0, n1) = (p.notes[2].clone(), p.notes[3].clone());
    let (o0, o1) = (p.new_note(), p.new_note());
    let r0 = p.transfer(&n0, &o0);
    let r1 = p.transfer(&n1, &o1);

    let outcomes = p.gate.spend_batch(&[r0.clone(), r1, r0]);
    assert!(outcomes[0].is_committed());
    assert!(outcomes[1].is_committed());
    assert_eq!(outcomes[2], SpendOutcome::Rejected(PoolError::AlreadySpent));
    assert_eq!(p.gate.point_count(), 10);
    p.assert_backed();
}

#[test]
fn test_cancel_complete_race_single_winner() {
    let mut p = pool(8, 3, 14);
    let note = p.notes[4].clone();
    let recipient = FieldElement::from_u64(0xcafe);
    let request = p.withdrawal(
        &note,
        Payout {
            recipient,
            ..Payout::default()
        },
    );
    let id = pending(p.gate.request_withdrawal(request));
    let signature = p.cancel(&note, &id);
    p.clock.advance(WITHDRAWAL_TIMELOCK_SECS);

    let (cancelled, completed) = thread::scope(|s| {
        let cancel = s.spawn(|| p.gate.cancel_withdrawal(&id, &signature));
        let complete = s.spawn(|| p.gate.complete_withdrawal(&id));
        (cancel.join().unwrap(), complete.join().unwrap())
    });

    match (&cancelled, &completed) {
        (Ok(()), Err(PoolError::AlreadyResolved)) => {
            assert!(!p.gate.is_spent(&note.nullifier_hash(UNIT)));
            assert_eq!(p.gate.outstanding_points(), 8);
            assert_eq!(p.gate.ledger().paid_to(&recipient), 0);
        }
        (Err(PoolError::AlreadyResolved), Ok(receipt)) => {
            assert_eq!(receipt.paid_to_recipient, UNIT);
            assert!(p.gate.is_spent(&note.nullifier_hash(UNIT)));
            assert_eq!(p.gate.outstanding_points(), 7);
        }
        other => panic!("expected exactly one resolution, got {:?}", other),
    }
    assert!(p.gate.withdrawal(&id).unwrap().is_resolved());
    p.assert_backed();
}

#[test]
fn test_transfer_built_during_deposits() {
    let mut p = pool(8, 3, 15);
    let spender = p.notes[6].clone();
    let output = p.new_note();
    let incoming: Vec<PointNote> = (0..20).map(|_| p.new_note()).collect();
    let seed = SelectionSeed::from_bytes([7; 32]);

    let request = thread::scope(|s| {
        s.spawn(|| {
            for note in &incoming {
                p.gate
                    .deposit(DepositRequest {
                        commitment: note.commitment(UNIT),
                        owner: note.owner_key(),
                    })
                    .unwrap();
            }
        });
        build_transfer(&p.gate, &keys().0, &spender, &output, &p.spent, &seed, &mut p.rng).unwrap()
    });

    assert_eq!(p.gate.point_count(), 28);
    assert!(p.gate.spend(request).is_committed());
    p.assert_backed();
}
