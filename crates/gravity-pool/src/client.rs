//! request builders for the proof-generation client
//!
//! reads the gate's public state (root, membership path, pool snapshot),
//! proves, picks a decoy ring and signs. nothing here touches gate state.

use std::collections::HashSet;

use ark_bn254::Bn254;
use ark_groth16::ProvingKey;
use rand::{CryptoRng, RngCore};

use crate::circuit;
use crate::codec::PointId;
use crate::error::{PoolError, Result};
use crate::field::FieldElement;
use crate::note::PointNote;
use crate::ring::{Lsag, RingScheme};
use crate::selector::{RingSelection, SelectionSeed};
use crate::settlement::{
    cancel_message, spend_message, withdrawal_message, SettlementGate, SpendRequest, WithdrawalId,
    WithdrawalRequest,
};
use crate::treasury::CollateralLedger;
use crate::verifier::{ProofVerifier, PublicInputs};

/// where a withdrawal pays out
#[derive(Clone, Copy, Debug, Default)]
pub struct Payout {
    pub recipient: FieldElement,
    pub relayer: FieldElement,
    pub fee: u64,
    pub refund: u64,
}

struct Prepared {
    inputs: PublicInputs,
    proof: Vec<u8>,
    ring: RingSelection,
}

fn prepare<V, R, L, G>(
    gate: &SettlementGate<V, R, L>,
    pk: &ProvingKey<Bn254>,
    note: &PointNote,
    payout: Payout,
    known_spent: &HashSet<PointId>,
    seed: &SelectionSeed,
    rng: &mut G,
) -> Result<Prepared>
where
    V: ProofVerifier,
    R: RingScheme,
    L: CollateralLedger,
    G: RngCore + CryptoRng,
{
    let unit = gate.config().unit_value;
    let id = note.id(unit);
    let record = gate
        .point(&id)
        .ok_or_else(|| PoolError::InvalidRing("note is not in the pool".into()))?;

    let (path, root) = gate.membership_witness(record.leaf_index)?;
    let inputs = PublicInputs {
        root,
        nullifier_hash: note.nullifier_hash(unit),
        recipient: payout.recipient,
        relayer: payout.relayer,
        fee: payout.fee,
        refund: payout.refund,
    };
    let proof = circuit::prove(pk, unit, &inputs, &note.witness(unit, path), rng)?;
    let ring = gate.select_ring(&id, known_spent, seed)?;

    Ok(Prepared { inputs, proof, ring })
}

/// transfer `note` into `output`
pub fn build_transfer<V, R, L, G>(
    gate: &SettlementGate<V, R, L>,
    pk: &ProvingKey<Bn254>,
    note: &PointNote,
    output: &PointNote,
    known_spent: &HashSet<PointId>,
    seed: &SelectionSeed,
    rng: &mut G,
) -> Result<SpendRequest>
where
    V: ProofVerifier,
    R: RingScheme,
    L: CollateralLedger,
    G: RngCore + CryptoRng,
{
    let unit = gate.config().unit_value;
    let payout = Payout {
        recipient: output.commitment(unit).0,
        ..Payout::default()
    };
    let prepared = prepare(gate, pk, note, payout, known_spent, seed, rng)?;

    let output_owner = output.owner_key();
    let message = spend_message(&prepared.inputs, &output_owner);
    let ring = prepared.ring.owner_keys();
    let signature = Lsag::sign(&message, note.owner_secret(), &ring, prepared.ring.signer_index, rng)?;

    Ok(SpendRequest {
        proof: prepared.proof,
        signature: signature.to_bytes(),
        ring,
        inputs: prepared.inputs,
        output_owner,
    })
}

/// redeem `note` to `payout`
pub fn build_withdrawal<V, R, L, G>(
    gate: &SettlementGate<V, R, L>,
    pk: &ProvingKey<Bn254>,
    note: &PointNote,
    payout: Payout,
    known_spent: &HashSet<PointId>,
    seed: &SelectionSeed,
    rng: &mut G,
) -> Result<WithdrawalRequest>
where
    V: ProofVerifier,
    R: RingScheme,
    L: CollateralLedger,
    G: RngCore + CryptoRng,
{
    let prepared = prepare(gate, pk, note, payout, known_spent, seed, rng)?;

    let message = withdrawal_message(&prepared.inputs);
    let ring = prepared.ring.owner_keys();
    let signature = Lsag::sign(&message, note.owner_secret(), &ring, prepared.ring.signer_index, rng)?;

    Ok(WithdrawalRequest {
        proof: prepared.proof,
        signature: signature.to_bytes(),
        ring,
        inputs: prepared.inputs,
    })
}

/// signature cancelling the pending withdrawal `id` that `note` requested
pub fn sign_cancel<V, R, L, G>(
    gate: &SettlementGate<V, R, L>,
    note: &PointNote,
    id: &WithdrawalId,
    rng: &mut G,
) -> Result<Vec<u8>>
where
    V: ProofVerifier,
    R: RingScheme,
    L: CollateralLedger,
    G: RngCore + CryptoRng,
{
    let record = gate.withdrawal(id).ok_or(PoolError::UnknownWithdrawal)?;
    let owner = note.owner_key();
    let signer_index = record
        .ring
        .iter()
        .position(|k| *k == owner)
        .ok_or_else(|| PoolError::InvalidRing("note owner is not in the withdrawal ring".into()))?;
    let signature = Lsag::sign(&cancel_message(id), note.owner_secret(), &record.ring, signer_index, rng)?;
    Ok(signature.to_bytes())
}
