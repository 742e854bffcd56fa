//! Shared fixtures: real groth16 keys and an in-memory gate

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use ark_bn254::Bn254;
use ark_groth16::{ProvingKey, VerifyingKey};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use gravity_pool::{
    build_transfer, build_withdrawal, circuit, sign_cancel, DepositRequest, Groth16Verifier, Lsag, ManualClock,
    MemoryLedger, Payout, PointId, PointNote, PoolConfig, SelectionSeed, SettlementGate, SpendRequest,
    WithdrawalId, WithdrawalOutcome, WithdrawalRequest,
};

pub const DEPTH: usize = 7;
pub const UNIT: u64 = 10;

pub type Gate = SettlementGate<Groth16Verifier, Lsag, MemoryLedger>;

/// one setup per test binary
pub fn keys() -> &'static (ProvingKey<Bn254>, VerifyingKey<Bn254>) {
    static KEYS: OnceLock<(ProvingKey<Bn254>, VerifyingKey<Bn254>)> = OnceLock::new();
    KEYS.get_or_init(|| {
        let mut rng = ChaCha20Rng::seed_from_u64(0x5eed);
        circuit::setup(DEPTH, UNIT, &mut rng).unwrap()
    })
}

pub struct Pool {
    pub gate: Gate,
    pub clock: Arc<ManualClock>,
    pub notes: Vec<PointNote>,
    pub spent: HashSet<PointId>,
    pub rng: ChaCha20Rng,
}

/// gate with `points` deposits made at t=0
pub fn pool(points: usize, ring_size: usize, seed: u64) -> Pool {
    pool_with(
        PoolConfig {
            tree_depth: DEPTH,
            unit_value: UNIT,
            ring_size,
            ..PoolConfig::default()
        },
        points,
        seed,
    )
}

pub fn pool_with(config: PoolConfig, points: usize, seed: u64) -> Pool {
    let clock = Arc::new(ManualClock::new(0));
    let verifier = Groth16Verifier::new(&keys().1).unwrap();
    let gate = SettlementGate::new(config, verifier, Lsag, MemoryLedger::new(), clock.clone()).unwrap();
    let mut rng = ChaCha20Rng::seed_from_u64(seed);

    let notes: Vec<PointNote> = (0..points).map(|_| PointNote::random(&mut rng)).collect();
    for note in &notes {
        gate.deposit(DepositRequest {
            commitment: note.commitment(UNIT),
            owner: note.owner_key(),
        })
        .unwrap();
    }

    Pool {
        gate,
        clock,
        notes,
        spent: HashSet::new(),
        rng,
    }
}

impl Pool {
    fn seed(&mut self) -> SelectionSeed {
        SelectionSeed::from_bytes(self.rng.gen())
    }

    pub fn new_note(&mut self) -> PointNote {
        PointNote::random(&mut self.rng)
    }

    pub fn transfer(&mut self, note: &PointNote, output: &PointNote) -> SpendRequest {
        let seed = self.seed();
        build_transfer(&self.gate, &keys().0, note, output, &self.spent, &seed, &mut self.rng).unwrap()
    }

    pub fn withdrawal(&mut self, note: &PointNote, payout: Payout) -> WithdrawalRequest {
        let seed = self.seed();
        build_withdrawal(&self.gate, &keys().0, note, payout, &self.spent, &seed, &mut self.rng).unwrap()
    }

    /// requester's signature over the cancel of `id`
    pub fn cancel(&mut self, note: &PointNote, id: &WithdrawalId) -> Vec<u8> {
        sign_cancel(&self.gate, note, id, &mut self.rng).unwrap()
    }

    /// collateral matches supply
    pub fn assert_backed(&self) {
        assert_eq!(
            self.gate.collateral_held(),
            self.gate.outstanding_points() as u128 * UNIT as u128
        );
    }
}

pub fn pending(outcome: WithdrawalOutcome) -> WithdrawalId {
    match outcome {
        WithdrawalOutcome::PendingTimelock { id, .. } => id,
        other => panic!("expected pending withdrawal, got {:?}", other),
    }
}
