//! settlement gate
//!
//! ```text
//!                 ┌──────────── outside any lock ────────────┐
//!  request ──▶ Received ──▶ proof gate + ring check ──▶ ProofVerified
//!                 │                  │ fail                    │
//!                 │                  ▼                         ▼
//!                 │              Rejected        ┌──── state mutex ─────┐
//!                 │                              │ key image record     │
//!                 │                              │ nullifier reserve    │
//!                 │                              │ tree insert + root   │
//!                 │                              │ treasury check       │
//!                 │                              └──────────────────────┘
//!                 │                                  │             │
//!                 │                         transfer ▼   withdraw  ▼
//!                 │                            Committed     PendingTimelock
//!                 │                                          │  24h  │ cancel
//!                 │                                          ▼       ▼
//!                 └───────────────────────────────────── Committed  Rejected
//! ```
//!
//! every write goes through one mutex, so two requests for the same
//! nullifier can never both reserve it and leaves enter the tree in one
//! global order. proof and ring verification are pure and run before the
//! lock is taken. the point arena has its own rwlock and snapshots never
//! wait on the state mutex.
//!
//! a treasury invariant failure halts the gate: nothing settles until an
//! operator fixes the ledger and calls [`SettlementGate::reconcile`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::codec::{self, Commitment, NullifierHash, PointId, Root};
use crate::config::{PoolConfig, MAX_FEE_BPS, WITHDRAWAL_TIMELOCK_SECS};
use crate::error::{PoolError, Result};
use crate::field::FieldElement;
use crate::merkle::{MerkleProof, MerkleTree};
use crate::nullifier::NullifierSet;
use crate::pool::{PointArena, PointRecord, PoolSnapshot};
use crate::ring::{KeyImage, KeyImageRegistry, OwnerKey, RingScheme};
use crate::selector::{GravitySelector, RingSelection, SelectionSeed};
use crate::treasury::{fee_for, CollateralLedger, Treasury};
use crate::verifier::{ProofGate, ProofVerifier, PublicInputs};

const SPEND_MESSAGE_CONTEXT: &str = "gravity-pool 2024 spend message v1";
const WITHDRAW_MESSAGE_CONTEXT: &str = "gravity-pool 2024 withdrawal message v1";
const WITHDRAWAL_ID_CONTEXT: &str = "gravity-pool 2024 withdrawal id v1";
const CANCEL_MESSAGE_CONTEXT: &str = "gravity-pool 2024 cancel message v1";

/// per-request state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpendStage {
    Received,
    ProofVerified,
    NullifierReserved,
    PendingTimelock,
    Committed,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateStatus {
    Active,
    /// operator pause, pending withdrawals can still be cancelled
    Paused,
    /// treasury drift, only reconcile leaves this state
    Halted { expected: u128, held: u128 },
}

/// mint request: the depositor's commitment and one-time ring key
#[derive(Clone, Copy, Debug)]
pub struct DepositRequest {
    pub commitment: Commitment,
    pub owner: OwnerKey,
}

/// private transfer: consume one point, mint `inputs.recipient` as a new one
#[derive(Clone, Debug)]
pub struct SpendRequest {
    pub proof: Vec<u8>,
    pub signature: Vec<u8>,
    pub ring: Vec<OwnerKey>,
    pub inputs: PublicInputs,
    pub output_owner: OwnerKey,
}

impl SpendRequest {
    pub fn message(&self) -> [u8; 32] {
        spend_message(&self.inputs, &self.output_owner)
    }
}

/// redemption: consume one point, release collateral after the timelock
#[derive(Clone, Debug)]
pub struct WithdrawalRequest {
    pub proof: Vec<u8>,
    pub signature: Vec<u8>,
    pub ring: Vec<OwnerKey>,
    pub inputs: PublicInputs,
}

impl WithdrawalRequest {
    pub fn message(&self) -> [u8; 32] {
        withdrawal_message(&self.inputs)
    }
}

/// what a ring signature on a transfer signs
pub fn spend_message(inputs: &PublicInputs, output_owner: &OwnerKey) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(SPEND_MESSAGE_CONTEXT);
    hasher.update(&inputs.to_bytes());
    hasher.update(&output_owner.0);
    *hasher.finalize().as_bytes()
}

/// what a ring signature on a withdrawal signs
pub fn withdrawal_message(inputs: &PublicInputs) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(WITHDRAW_MESSAGE_CONTEXT);
    hasher.update(&inputs.to_bytes());
    *hasher.finalize().as_bytes()
}

/// what the requester signs, over the stored ring, to cancel a withdrawal
pub fn cancel_message(id: &WithdrawalId) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(CANCEL_MESSAGE_CONTEXT);
    hasher.update(&id.0);
    *hasher.finalize().as_bytes()
}

#[derive(Debug, PartialEq)]
pub enum SpendOutcome {
    Committed(Vec<PointId>),
    Rejected(PoolError),
}

impl SpendOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

#[derive(Debug, PartialEq)]
pub enum WithdrawalOutcome {
    PendingTimelock { id: WithdrawalId, unlock_at: u64 },
    Rejected(PoolError),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WithdrawalId(pub [u8; 32]);

impl core::fmt::Debug for WithdrawalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "WithdrawalId({}..)", hex::encode(&self.0[..6]))
    }
}

impl core::fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// pending or resolved withdrawal
#[derive(Clone, Debug, PartialEq)]
pub struct WithdrawalRecord {
    pub id: WithdrawalId,
    pub nullifier_hash: NullifierHash,
    pub key_image: KeyImage,
    /// ring the request was signed over; a cancel must link to it
    pub ring: Vec<OwnerKey>,
    pub recipient: FieldElement,
    pub relayer: FieldElement,
    /// denomination being redeemed
    pub amount: u64,
    pub payout: u64,
    pub relayer_fee: u64,
    pub refund: u64,
    pub protocol_fee: u64,
    pub request_time: u64,
    pub unlock_time: u64,
    pub completed: bool,
    pub cancelled: bool,
    /// paused by an external monitor
    pub flagged: bool,
}

impl WithdrawalRecord {
    pub fn stage(&self) -> SpendStage {
        if self.completed {
            SpendStage::Committed
        } else if self.cancelled {
            SpendStage::Rejected
        } else {
            SpendStage::PendingTimelock
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.completed || self.cancelled
    }
}

/// collateral movements of a completed withdrawal
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawalReceipt {
    pub id: WithdrawalId,
    pub recipient: FieldElement,
    /// payout plus refund
    pub paid_to_recipient: u64,
    pub relayer: FieldElement,
    pub relayer_fee: u64,
    pub protocol_fee: u64,
    pub completed_at: u64,
}

/// fee rates in basis points, adjustable while the gate runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeRates {
    pub deposit_bps: u16,
    pub withdrawal_bps: u16,
}

struct GateState {
    tree: MerkleTree,
    nullifiers: NullifierSet,
    key_images: KeyImageRegistry,
    treasury: Treasury,
    withdrawals: HashMap<WithdrawalId, WithdrawalRecord>,
    withdrawal_seq: u64,
    status: GateStatus,
    fees: FeeRates,
}

impl GateState {
    fn ensure_active(&self) -> Result<()> {
        match self.status {
            GateStatus::Active => Ok(()),
            GateStatus::Paused => Err(PoolError::Paused),
            GateStatus::Halted { .. } => Err(PoolError::Halted),
        }
    }

    fn ensure_not_halted(&self) -> Result<()> {
        match self.status {
            GateStatus::Halted { .. } => Err(PoolError::Halted),
            _ => Ok(()),
        }
    }

    /// re-check the invariant, halting on drift
    fn check_treasury(&mut self, ledger: &dyn CollateralLedger) -> Result<()> {
        if let Err(e) = self.treasury.check(ledger) {
            if let PoolError::InvariantViolation { expected, held } = e {
                error!(expected, held, "treasury invariant violated, halting settlement");
                self.status = GateStatus::Halted { expected, held };
            }
            return Err(e);
        }
        Ok(())
    }

    /// post-commit check: the request already settled, so a failure only halts
    fn recheck_treasury(&mut self, ledger: &dyn CollateralLedger) {
        if self.check_treasury(ledger).is_err() {
            warn!("request settled but the ledger drifted under it");
        }
    }

    fn withdrawal_mut(&mut self, id: &WithdrawalId) -> Result<&mut WithdrawalRecord> {
        self.withdrawals.get_mut(id).ok_or(PoolError::UnknownWithdrawal)
    }
}

pub struct SettlementGate<V, R, L> {
    config: PoolConfig,
    proofs: ProofGate<V>,
    rings: R,
    ledger: L,
    clock: Arc<dyn Clock>,
    selector: GravitySelector,
    state: Mutex<GateState>,
    arena: PointArena,
}

impl<V, R, L> SettlementGate<V, R, L>
where
    V: ProofVerifier,
    R: RingScheme,
    L: CollateralLedger,
{
    pub fn new(config: PoolConfig, verifier: V, rings: R, ledger: L, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let tree = MerkleTree::new(config.tree_depth, config.root_history_size)?;
        let selector = GravitySelector::new(config.ring_size, config.gravity_constant)?;
        let treasury = Treasury::new(config.unit_value);

        let gate = Self {
            proofs: ProofGate::new(verifier),
            rings,
            ledger,
            clock,
            selector,
            state: Mutex::new(GateState {
                tree,
                nullifiers: NullifierSet::new(),
                key_images: KeyImageRegistry::new(),
                treasury,
                withdrawals: HashMap::new(),
                withdrawal_seq: 0,
                status: GateStatus::Active,
                fees: FeeRates {
                    deposit_bps: config.deposit_fee_bps,
                    withdrawal_bps: config.withdrawal_fee_bps,
                },
            }),
            arena: PointArena::new(),
            config,
        };

        // a ledger that already holds collateral cannot back an empty pool
        gate.state.lock().check_treasury(&gate.ledger)?;
        info!(
            depth = gate.config.tree_depth,
            ring_size = gate.config.ring_size,
            unit = gate.config.unit_value,
            "settlement gate ready"
        );
        Ok(gate)
    }

    // === deposit ===

    /// mint one point against `unit_value` of fresh collateral
    pub fn deposit(&self, request: DepositRequest) -> Result<PointId> {
        let unit = self.config.unit_value;
        let now = self.clock.now();

        let mut state = self.state.lock();
        state.ensure_active()?;
        state.check_treasury(&self.ledger)?;
        let fee = fee_for(unit, state.fees.deposit_bps);
        if self.arena.contains_commitment(&request.commitment) {
            return Err(PoolError::DuplicateCommitment);
        }
        if self.arena.contains_owner(&request.owner) {
            return Err(PoolError::DuplicateOwner);
        }
        if state.tree.is_full() {
            return Err(PoolError::TreeFull {
                capacity: state.tree.capacity(),
            });
        }

        let total = unit
            .checked_add(fee)
            .ok_or_else(|| PoolError::Ledger("deposit amount overflows".into()))?;
        self.ledger.lock(total)?;
        if fee > 0 {
            self.ledger.collect_fee(fee)?;
        }

        let leaf_index = state.tree.insert(request.commitment)?;
        state.treasury.mint();

        let id = codec::point_id(&request.commitment);
        self.arena.push(PointRecord {
            id,
            commitment: request.commitment,
            owner: request.owner,
            mass: self.config.default_mass,
            created_at: now,
            leaf_index,
        })?;

        state.recheck_treasury(&self.ledger);
        info!(point = %id, leaf_index, fee, "deposit committed");
        Ok(id)
    }

    // === transfer ===

    pub fn spend(&self, request: SpendRequest) -> SpendOutcome {
        let nullifier = request.inputs.nullifier_hash;
        debug!(stage = ?SpendStage::Received, %nullifier, "spend");

        let verified = self.known_roots_if_active().and_then(|roots| {
            Self::check_transfer_inputs(&request.inputs)?;
            self.verify_authorization(
                &request.proof,
                &request.signature,
                &request.ring,
                &request.inputs,
                &request.message(),
                &roots,
            )
        });

        self.finish_spend(&request, verified)
    }

    /// verify every request in parallel, then commit them one by one in order
    pub fn spend_batch(&self, requests: &[SpendRequest]) -> Vec<SpendOutcome> {
        let roots = match self.known_roots_if_active() {
            Ok(roots) => roots,
            Err(e) => return requests.iter().map(|_| SpendOutcome::Rejected(e.clone())).collect(),
        };

        #[cfg(feature = "parallel")]
        let iter = requests.par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = requests.iter();

        let verified: Vec<Result<KeyImage>> = iter
            .map(|r| {
                Self::check_transfer_inputs(&r.inputs)?;
                self.verify_authorization(&r.proof, &r.signature, &r.ring, &r.inputs, &r.message(), &roots)
            })
            .collect();

        requests
            .iter()
            .zip(verified)
            .map(|(request, verified)| self.finish_spend(request, verified))
            .collect()
    }

    fn finish_spend(&self, request: &SpendRequest, verified: Result<KeyImage>) -> SpendOutcome {
        let nullifier = request.inputs.nullifier_hash;
        let outcome = verified.and_then(|image| {
            debug!(stage = ?SpendStage::ProofVerified, %nullifier, "spend");
            self.commit_transfer(request, image)
        });

        match outcome {
            Ok(id) => {
                info!(stage = ?SpendStage::Committed, %nullifier, output = %id, "transfer committed");
                SpendOutcome::Committed(vec![id])
            }
            Err(e) => {
                log_rejection(&nullifier, &e);
                SpendOutcome::Rejected(e)
            }
        }
    }

    fn check_transfer_inputs(inputs: &PublicInputs) -> Result<()> {
        let fees = inputs.fee.saturating_add(inputs.refund);
        if fees != 0 {
            return Err(PoolError::TransferFee { fees });
        }
        Ok(())
    }

    fn commit_transfer(&self, request: &SpendRequest, image: KeyImage) -> Result<PointId> {
        let message = request.message();
        let nullifier = request.inputs.nullifier_hash;
        let output = Commitment(request.inputs.recipient);
        let now = self.clock.now();

        let mut state = self.state.lock();
        state.ensure_active()?;
        state.check_treasury(&self.ledger)?;
        state.key_images.check(&image, &message)?;
        state.nullifiers.reserve(nullifier)?;
        debug!(stage = ?SpendStage::NullifierReserved, %nullifier, "spend");

        let inserted = if self.arena.contains_commitment(&output) {
            Err(PoolError::DuplicateCommitment)
        } else if self.arena.contains_owner(&request.output_owner) {
            Err(PoolError::DuplicateOwner)
        } else {
            state.tree.insert(output)
        };
        let leaf_index = match inserted {
            Ok(index) => index,
            Err(e) => {
                state.nullifiers.release(&nullifier);
                return Err(e);
            }
        };
        state.nullifiers.finalize(&nullifier)?;
        state.key_images.record(image, message)?;

        // one point out, one point in
        state.treasury.burn();
        state.treasury.mint();

        let id = codec::point_id(&output);
        self.arena.push(PointRecord {
            id,
            commitment: output,
            owner: request.output_owner,
            mass: self.config.default_mass,
            created_at: now,
            leaf_index,
        })?;

        state.recheck_treasury(&self.ledger);
        Ok(id)
    }

    // === withdrawal ===

    pub fn request_withdrawal(&self, request: WithdrawalRequest) -> WithdrawalOutcome {
        let nullifier = request.inputs.nullifier_hash;
        debug!(stage = ?SpendStage::Received, %nullifier, "withdrawal");

        let outcome = self.known_roots_if_active().and_then(|roots| {
            // relayer fee and refund alone must fit; the protocol fee is added under the lock
            Self::withdrawal_fees(self.config.unit_value, 0, &request.inputs)?;
            let image = self.verify_authorization(
                &request.proof,
                &request.signature,
                &request.ring,
                &request.inputs,
                &request.message(),
                &roots,
            )?;
            debug!(stage = ?SpendStage::ProofVerified, %nullifier, "withdrawal");
            self.reserve_withdrawal(&request, image)
        });

        match outcome {
            Ok((id, unlock_at)) => {
                info!(stage = ?SpendStage::PendingTimelock, %nullifier, %id, unlock_at, "withdrawal pending");
                WithdrawalOutcome::PendingTimelock { id, unlock_at }
            }
            Err(e) => {
                log_rejection(&nullifier, &e);
                WithdrawalOutcome::Rejected(e)
            }
        }
    }

    /// protocol fee, after checking everything fits in one unit
    fn withdrawal_fees(unit: u64, bps: u16, inputs: &PublicInputs) -> Result<u64> {
        let protocol_fee = fee_for(unit, bps);
        let fees = protocol_fee
            .saturating_add(inputs.fee)
            .saturating_add(inputs.refund);
        if fees > unit {
            return Err(PoolError::FeeExceedsDenomination { fees, unit });
        }
        Ok(protocol_fee)
    }

    fn reserve_withdrawal(&self, request: &WithdrawalRequest, image: KeyImage) -> Result<(WithdrawalId, u64)> {
        let message = request.message();
        let inputs = &request.inputs;
        let unit = self.config.unit_value;
        let now = self.clock.now();
        let unlock_at = now.saturating_add(WITHDRAWAL_TIMELOCK_SECS);

        let mut state = self.state.lock();
        state.ensure_active()?;
        state.check_treasury(&self.ledger)?;
        let protocol_fee = Self::withdrawal_fees(unit, state.fees.withdrawal_bps, inputs)?;
        state.key_images.check(&image, &message)?;
        state.nullifiers.reserve(inputs.nullifier_hash)?;
        debug!(stage = ?SpendStage::NullifierReserved, nullifier = %inputs.nullifier_hash, "withdrawal");
        state.key_images.record(image, message)?;

        let seq = state.withdrawal_seq;
        state.withdrawal_seq += 1;
        let id = withdrawal_id(&inputs.nullifier_hash, seq);

        state.withdrawals.insert(
            id,
            WithdrawalRecord {
                id,
                nullifier_hash: inputs.nullifier_hash,
                key_image: image,
                ring: request.ring.clone(),
                recipient: inputs.recipient,
                relayer: inputs.relayer,
                amount: unit,
                payout: unit - protocol_fee - inputs.fee - inputs.refund,
                relayer_fee: inputs.fee,
                refund: inputs.refund,
                protocol_fee,
                request_time: now,
                unlock_time: unlock_at,
                completed: false,
                cancelled: false,
                flagged: false,
            },
        );
        Ok((id, unlock_at))
    }

    /// withdraw the request, freeing its nullifier; first resolution wins
    ///
    /// `signature` is a ring signature over [`cancel_message`] with the
    /// request's own ring. only the requester's key image is accepted, so
    /// other ring members cannot cancel.
    pub fn cancel_withdrawal(&self, id: &WithdrawalId, signature: &[u8]) -> Result<()> {
        let (ring, requester) = {
            let state = self.state.lock();
            let record = state.withdrawals.get(id).ok_or(PoolError::UnknownWithdrawal)?;
            if record.is_resolved() {
                return Err(PoolError::AlreadyResolved);
            }
            (record.ring.clone(), record.key_image)
        };
        let image = self.rings.verify(&cancel_message(id), signature, &ring)?;
        if image != requester {
            warn!(%id, "cancel signed by a key other than the requester");
            return Err(PoolError::UnauthorizedCancel);
        }

        let mut state = self.state.lock();
        let record = state.withdrawal_mut(id)?;
        if record.is_resolved() {
            return Err(PoolError::AlreadyResolved);
        }
        record.cancelled = true;
        let (nullifier, image) = (record.nullifier_hash, record.key_image);

        state.nullifiers.release(&nullifier);
        state.key_images.release(&image);
        info!(stage = ?SpendStage::Rejected, %nullifier, %id, "withdrawal cancelled");
        Ok(())
    }

    /// release collateral once the timelock has elapsed uncontested
    pub fn complete_withdrawal(&self, id: &WithdrawalId) -> Result<WithdrawalReceipt> {
        let now = self.clock.now();

        let mut state = self.state.lock();
        state.ensure_active()?;
        state.check_treasury(&self.ledger)?;
        let record = state.withdrawal_mut(id)?;
        if record.is_resolved() {
            return Err(PoolError::AlreadyResolved);
        }
        if record.flagged {
            return Err(PoolError::WithdrawalPaused);
        }
        if now < record.unlock_time {
            return Err(PoolError::StillLocked {
                unlock_at: record.unlock_time,
            });
        }
        let record = record.clone();

        if self.ledger.collateral_held() < record.amount as u128 {
            return Err(PoolError::Ledger("collateral below one unit".into()));
        }
        self.ledger
            .release(&record.recipient, record.payout + record.refund)?;
        if record.relayer_fee > 0 {
            self.ledger.release(&record.relayer, record.relayer_fee)?;
        }
        if record.protocol_fee > 0 {
            self.ledger.collect_fee(record.protocol_fee)?;
        }

        state.nullifiers.finalize(&record.nullifier_hash)?;
        state.treasury.burn();
        state.withdrawal_mut(id)?.completed = true;

        info!(
            stage = ?SpendStage::Committed,
            nullifier = %record.nullifier_hash,
            %id,
            payout = record.payout,
            "withdrawal completed"
        );
        state.recheck_treasury(&self.ledger);

        Ok(WithdrawalReceipt {
            id: record.id,
            recipient: record.recipient,
            paid_to_recipient: record.payout + record.refund,
            relayer: record.relayer,
            relayer_fee: record.relayer_fee,
            protocol_fee: record.protocol_fee,
            completed_at: now,
        })
    }

    /// external monitor pause of one pending withdrawal
    pub fn flag_withdrawal(&self, id: &WithdrawalId) -> Result<()> {
        self.set_flag(id, true)
    }

    pub fn clear_withdrawal_flag(&self, id: &WithdrawalId) -> Result<()> {
        self.set_flag(id, false)
    }

    fn set_flag(&self, id: &WithdrawalId, flagged: bool) -> Result<()> {
        let mut state = self.state.lock();
        let record = state.withdrawal_mut(id)?;
        if record.is_resolved() {
            return Err(PoolError::AlreadyResolved);
        }
        record.flagged = flagged;
        warn!(%id, flagged, "withdrawal monitor flag changed");
        Ok(())
    }

    // === operator ===

    pub fn pause(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_not_halted()?;
        state.status = GateStatus::Paused;
        warn!("settlement paused");
        Ok(())
    }

    pub fn unpause(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_not_halted()?;
        state.status = GateStatus::Active;
        info!("settlement resumed");
        Ok(())
    }

    /// runtime fee change; pending withdrawals keep the fee they were priced at
    pub fn set_fees(&self, deposit_bps: u16, withdrawal_bps: u16) -> Result<()> {
        if deposit_bps > MAX_FEE_BPS || withdrawal_bps > MAX_FEE_BPS {
            return Err(PoolError::InvalidConfig(format!(
                "fee rates are capped at {} bps",
                MAX_FEE_BPS
            )));
        }
        let mut state = self.state.lock();
        state.ensure_not_halted()?;
        state.fees = FeeRates {
            deposit_bps,
            withdrawal_bps,
        };
        warn!(deposit_bps, withdrawal_bps, "fee rates updated");
        Ok(())
    }

    /// leave a halt once the ledger matches the outstanding supply again
    pub fn reconcile(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.treasury.check(&self.ledger)?;
        if let GateStatus::Halted { expected, held } = state.status {
            info!(expected, held, "treasury reconciled, settlement resumed");
            state.status = GateStatus::Active;
        }
        Ok(())
    }

    // === verification ===

    fn known_roots_if_active(&self) -> Result<Vec<Root>> {
        let state = self.state.lock();
        state.ensure_active()?;
        Ok(state.tree.known_roots())
    }

    /// proof against the root window, then the ring signature
    fn verify_authorization(
        &self,
        proof: &[u8],
        signature: &[u8],
        ring: &[OwnerKey],
        inputs: &PublicInputs,
        message: &[u8],
        roots: &[Root],
    ) -> Result<KeyImage> {
        self.proofs.verify(proof, inputs, roots)?;
        self.check_ring(ring)?;
        self.rings.verify(message, signature, ring)
    }

    fn check_ring(&self, ring: &[OwnerKey]) -> Result<()> {
        if ring.len() != self.config.ring_size {
            return Err(PoolError::InvalidRing(format!(
                "ring has {} members, protocol ring size is {}",
                ring.len(),
                self.config.ring_size
            )));
        }
        let distinct: HashSet<&OwnerKey> = ring.iter().collect();
        if distinct.len() != ring.len() {
            return Err(PoolError::InvalidRing("duplicate ring member".into()));
        }
        if let Some(stranger) = ring.iter().find(|k| !self.arena.contains_owner(k)) {
            return Err(PoolError::InvalidRing(format!("{:?} is not a pool point", stranger)));
        }
        Ok(())
    }

    // === reads ===

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn status(&self) -> GateStatus {
        self.state.lock().status
    }

    pub fn fees(&self) -> FeeRates {
        self.state.lock().fees
    }

    pub fn current_root(&self) -> Root {
        self.state.lock().tree.root()
    }

    pub fn known_roots(&self) -> Vec<Root> {
        self.state.lock().tree.known_roots()
    }

    pub fn is_known_root(&self, root: &Root) -> bool {
        self.state.lock().tree.is_known_root(root)
    }

    pub fn membership_proof(&self, leaf_index: u64) -> Result<MerkleProof> {
        self.state.lock().tree.prove(leaf_index)
    }

    /// path and the root it reaches, read under one lock so a concurrent
    /// insert cannot split them
    pub fn membership_witness(&self, leaf_index: u64) -> Result<(MerkleProof, Root)> {
        let state = self.state.lock();
        Ok((state.tree.prove(leaf_index)?, state.tree.root()))
    }

    pub fn is_spent(&self, nullifier: &NullifierHash) -> bool {
        self.state.lock().nullifiers.is_spent(nullifier)
    }

    pub fn collateral_held(&self) -> u128 {
        self.ledger.collateral_held()
    }

    pub fn outstanding_points(&self) -> u64 {
        self.state.lock().treasury.outstanding_points()
    }

    pub fn withdrawal(&self, id: &WithdrawalId) -> Option<WithdrawalRecord> {
        self.state.lock().withdrawals.get(id).cloned()
    }

    pub fn point(&self, id: &PointId) -> Option<PointRecord> {
        self.arena.get(id)
    }

    pub fn point_count(&self) -> usize {
        self.arena.len()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.arena.snapshot(self.clock.now())
    }

    /// decoy ring for `spender` over a fresh snapshot
    pub fn select_ring(
        &self,
        spender: &PointId,
        known_spent: &HashSet<PointId>,
        seed: &SelectionSeed,
    ) -> Result<RingSelection> {
        self.selector.select(&self.snapshot(), spender, known_spent, seed)
    }
}

fn withdrawal_id(nullifier: &NullifierHash, seq: u64) -> WithdrawalId {
    let mut hasher = blake3::Hasher::new_derive_key(WITHDRAWAL_ID_CONTEXT);
    hasher.update(&nullifier.to_bytes());
    hasher.update(&seq.to_le_bytes());
    WithdrawalId(*hasher.finalize().as_bytes())
}

fn log_rejection(nullifier: &NullifierHash, e: &PoolError) {
    if e.is_fatal() {
        error!(stage = ?SpendStage::Rejected, %nullifier, error = %e, "request rejected");
    } else if e.is_expected_race() {
        debug!(stage = ?SpendStage::Rejected, %nullifier, error = %e, "request lost a race");
    } else {
        warn!(stage = ?SpendStage::Rejected, %nullifier, error = %e, "request rejected");
    }
}
